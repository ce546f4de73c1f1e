//! Live-page operations over a WebDriver client.
//!
//! Every wait is bounded by the configured timeout; a miss surfaces as
//! [`ScrapeError::Timeout`] so the run loop can skip the window or the
//! instrument instead of aborting.

use crate::models::{DateWindow, Instrument};
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::{Client, Locator};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::debug;

use super::cleaner::normalise_label;
use super::{
    HistoryPage, ScrapeError, ALERT_ID, APPLY_BUTTON_ID, DATE_FROM_ID, DATE_TO_ID,
    HISTORY_LINK_TEXT, HISTORY_TABLE_ID, NOTICE_CLASS, NO_DATA_PHRASE, SHARE_SELECT_ID,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

const SET_VALUE_SCRIPT: &str = "document.getElementById(arguments[0]).value = arguments[1];";

/// Decide from the error notice whether the table is worth parsing.
///
/// Only a visible notice whose text carries the no-data phrase counts as
/// "no data"; any other notice text still proceeds to parsing.
pub fn notice_allows_data(display: &str, alert_text: &str) -> bool {
    display.trim() != "block" || !alert_text.contains(NO_DATA_PHRASE)
}

/// A missing element becomes `None`; every other WebDriver error is kept.
fn found<T>(result: Result<T, CmdError>) -> Result<Option<T>, CmdError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_no_such_element() => Ok(None),
        Err(e) => Err(e),
    }
}

pub struct WebDriverPage {
    client: Client,
    landing_url: String,
    timeout: Duration,
}

impl WebDriverPage {
    pub fn new(client: Client, landing_url: String, timeout: Duration) -> Self {
        Self { client, landing_url, timeout }
    }

    /// Wait until an element matching `locator` is in the DOM.
    pub async fn wait_for_presence(
        &self,
        locator: Locator<'_>,
        timeout: Duration,
    ) -> Result<Element, ScrapeError> {
        let what = format!("{locator:?}");
        self.client
            .wait()
            .at_most(timeout)
            .every(POLL_INTERVAL)
            .for_element(locator)
            .await
            .map_err(|e| match e {
                CmdError::WaitTimeout => ScrapeError::Timeout { what, timeout },
                other => ScrapeError::WebDriver(other),
            })
    }

    /// Wait until no element matches `locator`, or the match is hidden.
    pub async fn wait_for_invisibility(
        &self,
        locator: Locator<'_>,
        timeout: Duration,
    ) -> Result<(), ScrapeError> {
        let deadline = Instant::now() + timeout;
        loop {
            let visible = match found(self.client.find(locator).await)? {
                Some(el) => el.is_displayed().await?,
                None => false,
            };
            if !visible {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::Timeout {
                    what: format!("{locator:?} to disappear"),
                    timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn goto_landing(&self) -> Result<Element, ScrapeError> {
        self.client
            .goto(&self.landing_url)
            .await
            .map_err(|e| ScrapeError::Navigation(format!("{}: {}", self.landing_url, e)))?;
        self.wait_for_presence(Locator::Id(SHARE_SELECT_ID), self.timeout).await
    }

    async fn try_open_history(&self) -> Result<(), ScrapeError> {
        let link = self
            .wait_for_presence(Locator::LinkText(HISTORY_LINK_TEXT), self.timeout)
            .await?;
        link.click().await?;
        self.wait_for_presence(Locator::Id(DATE_FROM_ID), self.timeout).await?;
        Ok(())
    }

    async fn set_input(&self, id: &str, value: &str) -> Result<(), ScrapeError> {
        self.client
            .execute(SET_VALUE_SCRIPT, vec![json!(id), json!(value)])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryPage for WebDriverPage {
    async fn list_instruments(&mut self) -> Result<Vec<Instrument>, ScrapeError> {
        let select = self.goto_landing().await?;

        let mut instruments = Vec::new();
        for option in select.find_all(Locator::Css("option")).await? {
            let value = option.attr("value").await?.unwrap_or_default();
            if value.trim().is_empty() {
                continue;
            }
            let label = normalise_label(&option.text().await?);
            instruments.push(Instrument { label, value });
        }
        Ok(instruments)
    }

    async fn select_instrument(&mut self, label: &str) -> Result<(), ScrapeError> {
        let select = self
            .wait_for_presence(Locator::Id(SHARE_SELECT_ID), self.timeout)
            .await?;

        for option in select.find_all(Locator::Css("option")).await? {
            if normalise_label(&option.text().await?) == label {
                option.click().await?;
                return Ok(());
            }
        }
        Err(ScrapeError::OptionNotFound(label.to_string()))
    }

    async fn open_history_view(&mut self) -> bool {
        match self.try_open_history().await {
            Ok(()) => true,
            Err(e) => {
                debug!("History view unavailable: {}", e);
                false
            }
        }
    }

    async fn set_date_window(&mut self, window: &DateWindow) -> Result<(), ScrapeError> {
        self.set_input(DATE_FROM_ID, &window.from_param()).await?;
        self.set_input(DATE_TO_ID, &window.to_param()).await?;

        self.wait_for_invisibility(Locator::Id(ALERT_ID), self.timeout).await?;

        let apply = self
            .wait_for_presence(Locator::Id(APPLY_BUTTON_ID), self.timeout)
            .await?;
        apply.click().await?;

        self.wait_for_presence(Locator::Id(HISTORY_TABLE_ID), self.timeout).await?;
        Ok(())
    }

    async fn has_data(&mut self) -> Result<bool, ScrapeError> {
        let notices = self
            .client
            .find_all(Locator::Css(&format!(".{NOTICE_CLASS}")))
            .await?;
        let Some(notice) = notices.first() else {
            return Ok(true);
        };

        let display = notice.css_value("display").await?;
        if display.trim() != "block" {
            return Ok(true);
        }

        let Some(alert) = found(self.client.find(Locator::Id(ALERT_ID)).await)? else {
            return Ok(true);
        };
        let text = alert.text().await?;
        Ok(notice_allows_data(&display, &text))
    }

    async fn page_source(&mut self) -> Result<String, ScrapeError> {
        Ok(self.client.source().await?)
    }

    async fn return_to_landing(&mut self) -> Result<(), ScrapeError> {
        self.goto_landing().await.map(|_| ())
    }

    async fn close(self) -> Result<(), ScrapeError> {
        self.client.close().await?;
        Ok(())
    }
}
