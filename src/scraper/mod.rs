pub mod cleaner;
pub mod page;
pub mod parsers;
pub mod session;

use crate::models::{DateWindow, Instrument};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use self::page::WebDriverPage;
pub use self::session::WebDriverLauncher;

// ── Landing page contract ─────────────────────────────────────────────────────

pub const SHARE_SELECT_ID: &str = "dpShares";
pub const HISTORY_LINK_TEXT: &str = "HISTORIQUES";
pub const DATE_FROM_ID: &str = "datefrom";
pub const DATE_TO_ID: &str = "dateto";
pub const ALERT_ID: &str = "alertMsg";
pub const APPLY_BUTTON_ID: &str = "btnChange";
pub const HISTORY_TABLE_ID: &str = "tblhistos";
pub const NOTICE_CLASS: &str = "notif_err";

/// Text of the error notice shown for an empty date range.
pub const NO_DATA_PHRASE: &str = "Pas de données à ces dates là";

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("no option labelled {0:?} in the share selector")]
    OptionNotFound(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("could not open a browser session at {url}: {source}")]
    Session {
        url: String,
        #[source]
        source: fantoccini::error::NewSessionError,
    },

    #[error("webdriver command failed: {0}")]
    WebDriver(#[from] fantoccini::error::CmdError),

    #[error("invalid selector {0}")]
    Selector(String),
}

// ── Page seam ─────────────────────────────────────────────────────────────────

/// Operations the run loop needs from the live history page.
#[async_trait]
pub trait HistoryPage: Send + Sized {
    /// Go to the landing page and list the selector's options that carry a
    /// non-empty value, in page order.
    async fn list_instruments(&mut self) -> Result<Vec<Instrument>, ScrapeError>;

    /// Choose the option whose visible text equals `label`.
    async fn select_instrument(&mut self, label: &str) -> Result<(), ScrapeError>;

    /// Follow the history link. `false` means the instrument should be skipped.
    async fn open_history_view(&mut self) -> bool;

    /// Inject both dates, apply, and wait for the table to render.
    async fn set_date_window(&mut self, window: &DateWindow) -> Result<(), ScrapeError>;

    /// `false` only when the site reports an empty date range.
    async fn has_data(&mut self) -> Result<bool, ScrapeError>;

    async fn page_source(&mut self) -> Result<String, ScrapeError>;

    async fn return_to_landing(&mut self) -> Result<(), ScrapeError>;

    /// End the browser session. Consumes the page so it runs once.
    async fn close(self) -> Result<(), ScrapeError>;
}

/// Opens browser sessions for a run.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Page: HistoryPage;

    async fn open(&self) -> Result<Self::Page, ScrapeError>;
}
