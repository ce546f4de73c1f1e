//! Run orchestrator: ties browser session → page → table parser → storage.
//!
//! ## Run shape
//!
//! 1. Open a browser session and list the share selector's instruments.
//! 2. For each instrument, open its history view and walk every date window
//!    of the requested period, appending parsed rows to the accumulator and
//!    rewriting the checkpoint file after each productive window.
//! 3. Close the session (on every path), then post-process the accumulator
//!    into the final CSV.
//!
//! Errors below the session level never abort a run: a failed window or
//! instrument is logged and skipped.

pub mod finalize;
pub mod report;

use crate::config::{OutputConfig, RunParams};
use crate::models::{DateWindow, Instrument, RawRecord, RunOutcome, RunStats};
use crate::scraper::parsers::parse_history_table;
use crate::scraper::{BrowserLauncher, HistoryPage, ScrapeError};
use crate::storage::write_records;
use tracing::debug;

use self::finalize::finalize;
use self::report::{emit, Reporter, StopSignal};

/// Coarse position of a run, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    PerInstrument,
    PerWindow,
    Finalizing,
    Done,
    Failed,
}

/// Per-window result, used for counters and logging.
enum WindowResult {
    Rows(usize),
    NoData,
    EmptyTable,
}

/// Mutable state of one run.
struct RunContext<'a> {
    reporter: &'a dyn Reporter,
    stop: &'a StopSignal,
    output: &'a OutputConfig,
    accumulator: Vec<RawRecord>,
    stats: RunStats,
    done_units: usize,
    total_units: usize,
    state: RunState,
}

impl RunContext<'_> {
    fn enter(&mut self, state: RunState) {
        if self.state != state {
            debug!("Run state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn log(&self, message: &str) {
        emit(self.reporter, message);
    }

    fn advance(&mut self, message: &str) {
        self.done_units += 1;
        let fraction = if self.total_units == 0 {
            1.0
        } else {
            self.done_units as f64 / self.total_units as f64
        };
        self.reporter.progress(fraction.min(1.0), message);
    }

    fn stopped(&mut self) -> bool {
        if self.stop.is_requested() {
            if !self.stats.cancelled {
                self.log("Stop requested, finishing with the rows collected so far");
            }
            self.stats.cancelled = true;
        }
        self.stats.cancelled
    }
}

pub struct Pipeline<L: BrowserLauncher> {
    launcher: L,
    output: OutputConfig,
}

impl<L: BrowserLauncher> Pipeline<L> {
    pub fn new(launcher: L, output: OutputConfig) -> Self {
        Self { launcher, output }
    }

    /// Run a full scrape. Only a failure to open the browser session is
    /// returned as an error; everything else ends up in the outcome.
    pub async fn run(
        &self,
        params: &RunParams,
        reporter: &dyn Reporter,
        stop: &StopSignal,
    ) -> Result<RunOutcome, ScrapeError> {
        let windows = DateWindow::tile(params.start, params.end, params.interval_days);

        let mut ctx = RunContext {
            reporter,
            stop,
            output: &self.output,
            accumulator: Vec::new(),
            stats: RunStats::default(),
            done_units: 0,
            total_units: 0,
            state: RunState::Init,
        };

        ctx.log("Connecting to the BRVM site...");
        let mut page = self.launcher.open().await?;

        if let Err(e) = scrape_all(&mut page, &windows, &mut ctx).await {
            ctx.log(&format!("ERROR while scraping: {}", e));
        }

        // Always release the browser before post-processing.
        if let Err(e) = page.close().await {
            ctx.log(&format!("Browser did not close cleanly: {}", e));
        }

        ctx.enter(RunState::Finalizing);
        let records = std::mem::take(&mut ctx.accumulator);
        let mut outcome = finalize(records, &self.output, reporter);
        ctx.enter(if outcome.success { RunState::Done } else { RunState::Failed });

        outcome.stats = ctx.stats;
        Ok(outcome)
    }
}

async fn scrape_all<P: HistoryPage>(
    page: &mut P,
    windows: &[DateWindow],
    ctx: &mut RunContext<'_>,
) -> Result<(), ScrapeError> {
    let instruments = page.list_instruments().await?;
    ctx.log(&format!("{} instruments found", instruments.len()));
    ctx.stats.instruments_found = instruments.len();
    ctx.total_units = instruments.len() * windows.len();

    for (i, instrument) in instruments.iter().enumerate() {
        if ctx.stopped() {
            break;
        }
        ctx.enter(RunState::PerInstrument);
        ctx.log(&format!(
            "Processing {} ({}/{})",
            instrument.label,
            i + 1,
            instruments.len()
        ));

        debug!("Selector value for {}: {:?}", instrument.label, instrument.value);

        let before = ctx.done_units;
        if let Err(e) = scrape_instrument(page, instrument, windows, ctx).await {
            ctx.log(&format!("ERROR on instrument {:?}: {}", instrument.label, e));
            let attempted = ctx.done_units - before;
            if attempted == 0 {
                ctx.stats.instruments_skipped += 1;
            }
            for window in windows.iter().skip(attempted) {
                ctx.advance(&format!("{} | {} (skipped)", instrument.label, window));
            }
        }
    }
    Ok(())
}

async fn scrape_instrument<P: HistoryPage>(
    page: &mut P,
    instrument: &Instrument,
    windows: &[DateWindow],
    ctx: &mut RunContext<'_>,
) -> Result<(), ScrapeError> {
    page.select_instrument(&instrument.label).await?;

    if !page.open_history_view().await {
        ctx.log(&format!(
            "ERROR: could not open {} for {}, skipping",
            crate::scraper::HISTORY_LINK_TEXT,
            instrument.label
        ));
        ctx.stats.instruments_skipped += 1;
        // Keep the bar honest about where we are in the plan.
        for window in windows {
            ctx.advance(&format!("{} | {} (skipped)", instrument.label, window));
        }
        if let Err(e) = page.return_to_landing().await {
            ctx.log(&format!("ERROR returning to the landing page: {}", e));
        }
        return Ok(());
    }
    ctx.log(&format!("{} opened", crate::scraper::HISTORY_LINK_TEXT));

    for window in windows {
        if ctx.stopped() {
            break;
        }
        ctx.enter(RunState::PerWindow);
        ctx.log(&format!("Scraping {}", window));
        ctx.advance(&format!("{} | {}", instrument.label, window));

        match scrape_window(page, instrument, window, ctx).await {
            Ok(WindowResult::Rows(n)) => {
                ctx.stats.windows_scraped += 1;
                ctx.log(&format!("{} records added", n));
            }
            Ok(WindowResult::NoData) => {
                ctx.stats.windows_empty += 1;
                ctx.log(&format!("No data between {} and {}", window.from_param(), window.to_param()));
            }
            Ok(WindowResult::EmptyTable) => {
                ctx.stats.windows_empty += 1;
                ctx.log("Empty table");
            }
            Err(e) => {
                ctx.stats.windows_failed += 1;
                ctx.log(&format!("ERROR scraping {}: {}", window, e));
            }
        }
    }

    // Not a skip: this instrument's rows are already in the accumulator.
    if let Err(e) = page.return_to_landing().await {
        ctx.log(&format!("ERROR returning to the landing page: {}", e));
    }
    Ok(())
}

async fn scrape_window<P: HistoryPage>(
    page: &mut P,
    instrument: &Instrument,
    window: &DateWindow,
    ctx: &mut RunContext<'_>,
) -> Result<WindowResult, ScrapeError> {
    page.set_date_window(window).await?;

    if !page.has_data().await? {
        return Ok(WindowResult::NoData);
    }

    let html = page.page_source().await?;
    let rows = parse_history_table(&html)?;
    if rows.is_empty() {
        return Ok(WindowResult::EmptyTable);
    }

    let n = rows.len();
    ctx.accumulator
        .extend(rows.into_iter().map(|r| r.tag(&instrument.label)));

    // Checkpoint: a killed process loses at most the window in flight.
    let path = ctx.output.temp_path();
    if let Err(e) = write_records(&path, &ctx.accumulator) {
        ctx.log(&format!("Checkpoint write to {:?} failed: {}", path, e));
    }
    Ok(WindowResult::Rows(n))
}

#[cfg(test)]
mod tests;
