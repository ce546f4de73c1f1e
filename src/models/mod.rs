use chrono::{Days, NaiveDate};
use std::path::PathBuf;

/// Column carrying the instrument label in every exported file.
pub const INSTRUMENT_COLUMN: &str = "ACTION";

/// Column parsed and normalised by the post-processor.
pub const DATE_COLUMN: &str = "Date";

/// Failure message of a run that collected nothing.
pub const NO_DATA_MESSAGE: &str = "no data collected";

// ── Instrument ────────────────────────────────────────────────────────────────

/// One option of the site's share selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instrument {
    pub label: String,
    pub value: String,
}

// ── Date window ───────────────────────────────────────────────────────────────

/// Inclusive `[from, to]` slice of the requested period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    /// Tile `[start, end]` into consecutive windows.
    ///
    /// Each window ends `interval_days` after it starts (capped at `end`) and
    /// the next one starts the following day, so windows never overlap and
    /// leave no gap. An interval of zero or `start > end` yields nothing.
    pub fn tile(start: NaiveDate, end: NaiveDate, interval_days: u32) -> Vec<DateWindow> {
        let mut windows = Vec::new();
        if interval_days == 0 {
            return windows;
        }

        let mut from = start;
        while from <= end {
            let to = from
                .checked_add_days(Days::new(u64::from(interval_days)))
                .map_or(end, |d| d.min(end));
            windows.push(DateWindow { from, to });

            match to.checked_add_days(Days::new(1)) {
                Some(next) => from = next,
                None => break,
            }
        }
        windows
    }

    /// Format used by the site's date inputs.
    pub fn from_param(&self) -> String {
        self.from.format("%Y-%m-%d").to_string()
    }

    pub fn to_param(&self) -> String {
        self.to.format("%Y-%m-%d").to_string()
    }

    pub fn len_days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    /// Longest window [`tile`](Self::tile) produces for `interval_days`.
    pub fn max_len_days(interval_days: u32) -> u32 {
        interval_days.saturating_add(1)
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.from_param(), self.to_param())
    }
}

// ── Raw rows ──────────────────────────────────────────────────────────────────

/// One body row of the history table, cells keyed by header text.
/// A row shorter than the header simply has fewer cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RawHistoricalRow {
    pub cells: Vec<(String, String)>,
}

impl RawHistoricalRow {
    pub fn tag(self, instrument: &str) -> RawRecord {
        RawRecord {
            instrument: instrument.to_string(),
            fields: self.cells,
        }
    }
}

/// A scraped row tagged with the instrument it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawRecord {
    pub instrument: String,
    pub fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    /// Overwrite `header` in place, appending it if the row lacks it.
    pub fn set(&mut self, header: &str, value: String) {
        match self.fields.iter_mut().find(|(h, _)| h == header) {
            Some((_, v)) => *v = value,
            None => self.fields.push((header.to_string(), value)),
        }
    }
}

// ── Run outcome ───────────────────────────────────────────────────────────────

/// Counters gathered while walking instruments and windows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub instruments_found: usize,
    pub instruments_skipped: usize,
    pub windows_scraped: usize,
    pub windows_empty: usize,
    pub windows_failed: usize,
    pub cancelled: bool,
}

/// Terminal record of a scrape run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub success: bool,
    pub records: usize,
    pub actions: usize,
    pub duplicates_removed: usize,
    pub file: Option<PathBuf>,
    pub message: Option<String>,
    pub fallback_file: Option<PathBuf>,
    pub stats: RunStats,
}

impl RunOutcome {
    pub fn no_data() -> Self {
        Self::failure(NO_DATA_MESSAGE.to_string(), None)
    }

    pub fn failure(message: String, fallback_file: Option<PathBuf>) -> Self {
        Self {
            success: false,
            records: 0,
            actions: 0,
            duplicates_removed: 0,
            file: None,
            message: Some(message),
            fallback_file,
            stats: RunStats::default(),
        }
    }

    pub fn completed(records: usize, actions: usize, duplicates_removed: usize, file: PathBuf) -> Self {
        Self {
            success: true,
            records,
            actions,
            duplicates_removed,
            file: Some(file),
            message: None,
            fallback_file: None,
            stats: RunStats::default(),
        }
    }
}
