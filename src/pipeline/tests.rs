use super::report::{ChannelReporter, RunEvent};
use super::*;
use crate::loader::load_checkpoint;
use crate::models::NO_DATA_MESSAGE;
use crate::storage::count_rows;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

// ── Scripted site ─────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Reply {
    Table(String),
    NoData,
    Fail,
}

#[derive(Default)]
struct Journal {
    closes: usize,
    windows: Vec<(String, DateWindow)>,
}

#[derive(Clone, Default)]
struct Site {
    instruments: Vec<Instrument>,
    no_history: HashSet<String>,
    unselectable: HashSet<String>,
    landing_fails: bool,
    replies: HashMap<(String, NaiveDate), Reply>,
    list_fails: bool,
    stop_after_windows: Option<(usize, StopSignal)>,
    journal: Arc<Mutex<Journal>>,
}

impl Site {
    fn with_instruments(labels: &[&str]) -> Self {
        Self {
            instruments: labels
                .iter()
                .enumerate()
                .map(|(i, l)| Instrument { label: l.to_string(), value: format!("v{i}") })
                .collect(),
            ..Self::default()
        }
    }

    fn reply(mut self, label: &str, from: NaiveDate, reply: Reply) -> Self {
        self.replies.insert((label.to_string(), from), reply);
        self
    }

    fn closes(&self) -> usize {
        self.journal.lock().unwrap().closes
    }

    fn visited(&self) -> Vec<(String, DateWindow)> {
        self.journal.lock().unwrap().windows.clone()
    }
}

struct FakePage {
    site: Site,
    current: Option<String>,
    window: Option<DateWindow>,
}

impl FakePage {
    fn lookup(&self, window: &DateWindow) -> Reply {
        let label = self.current.clone().unwrap_or_default();
        self.site
            .replies
            .get(&(label, window.from))
            .cloned()
            .unwrap_or(Reply::NoData)
    }

    fn current_reply(&self) -> Reply {
        match &self.window {
            Some(w) => self.lookup(w),
            None => Reply::NoData,
        }
    }
}

fn timeout(what: &str) -> ScrapeError {
    ScrapeError::Timeout { what: what.to_string(), timeout: Duration::from_secs(1) }
}

#[async_trait]
impl HistoryPage for FakePage {
    async fn list_instruments(&mut self) -> Result<Vec<Instrument>, ScrapeError> {
        if self.site.list_fails {
            return Err(timeout("Id(\"dpShares\")"));
        }
        Ok(self.site.instruments.clone())
    }

    async fn select_instrument(&mut self, label: &str) -> Result<(), ScrapeError> {
        if self.site.unselectable.contains(label)
            || !self.site.instruments.iter().any(|i| i.label == label)
        {
            return Err(ScrapeError::OptionNotFound(label.to_string()));
        }
        self.current = Some(label.to_string());
        Ok(())
    }

    async fn open_history_view(&mut self) -> bool {
        let label = self.current.clone().unwrap_or_default();
        !self.site.no_history.contains(&label)
    }

    async fn set_date_window(&mut self, window: &DateWindow) -> Result<(), ScrapeError> {
        let label = self.current.clone().unwrap_or_default();
        let seen = {
            let mut journal = self.site.journal.lock().unwrap();
            journal.windows.push((label, *window));
            journal.windows.len()
        };
        if let Some((n, stop)) = &self.site.stop_after_windows {
            if seen >= *n {
                stop.request();
            }
        }
        if let Reply::Fail = self.lookup(window) {
            return Err(timeout("Id(\"tblhistos\")"));
        }
        self.window = Some(*window);
        Ok(())
    }

    async fn has_data(&mut self) -> Result<bool, ScrapeError> {
        Ok(!matches!(self.current_reply(), Reply::NoData))
    }

    async fn page_source(&mut self) -> Result<String, ScrapeError> {
        match self.current_reply() {
            Reply::Table(html) => Ok(html),
            _ => Ok(String::new()),
        }
    }

    async fn return_to_landing(&mut self) -> Result<(), ScrapeError> {
        self.current = None;
        self.window = None;
        if self.site.landing_fails {
            return Err(ScrapeError::Navigation("https://www.brvm.org/fr/cours-actions/0".into()));
        }
        Ok(())
    }

    async fn close(self) -> Result<(), ScrapeError> {
        self.site.journal.lock().unwrap().closes += 1;
        Ok(())
    }
}

struct FakeLauncher {
    site: Site,
    unreachable: bool,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    type Page = FakePage;

    async fn open(&self) -> Result<FakePage, ScrapeError> {
        if self.unreachable {
            return Err(ScrapeError::Navigation("webdriver unreachable".into()));
        }
        Ok(FakePage { site: self.site.clone(), current: None, window: None })
    }
}

// ── Recording reporter ────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    checkpoint: Option<PathBuf>,
    progress: Mutex<Vec<(f64, String)>>,
    lines: Mutex<Vec<String>>,
    checkpoint_rows: Mutex<Vec<usize>>,
}

impl Reporter for Recorder {
    fn progress(&self, fraction: f64, message: &str) {
        self.progress.lock().unwrap().push((fraction, message.to_string()));
    }

    fn log(&self, line: &str) {
        if line.ends_with("records added") {
            if let Some(path) = &self.checkpoint {
                self.checkpoint_rows.lock().unwrap().push(count_rows(path).unwrap());
            }
        }
        self.lines.lock().unwrap().push(line.to_string());
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// 2023-01-01 .. 2023-03-05 by 30 days: three windows starting
/// 01-01, 02-01 and 03-04.
fn quarter() -> RunParams {
    RunParams::new(d(2023, 1, 1), d(2023, 3, 5), 30).unwrap()
}

fn table(rows: &[(&str, &str)]) -> Reply {
    let body: String = rows
        .iter()
        .map(|(date, close)| format!("<tr><td>{date}</td><td>{close}</td></tr>"))
        .collect();
    Reply::Table(format!(
        r#"<html><body><table id="tblhistos">
            <thead><tr><th>Date</th><th>Clôture</th></tr></thead>
            <tbody>{body}</tbody>
        </table></body></html>"#
    ))
}

fn pipeline(site: &Site, dir: &TempDir) -> Pipeline<FakeLauncher> {
    Pipeline::new(
        FakeLauncher { site: site.clone(), unreachable: false },
        OutputConfig::in_dir(dir.path()),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_run_collects_sorts_and_checkpoints() {
    let dir = TempDir::new().unwrap();
    let site = Site::with_instruments(&["SONATEL", "ORAGROUP"])
        .reply("SONATEL", d(2023, 1, 1), table(&[("02/04/2023", "15600,00"), ("15/03/2023", "15500,00")]))
        .reply("SONATEL", d(2023, 3, 4), Reply::Fail)
        .reply("ORAGROUP", d(2023, 1, 1), table(&[("10/01/2023", "3400,00")]))
        .reply("ORAGROUP", d(2023, 2, 1), table(&[("10/01/2023", "3400,00")]));

    let output = OutputConfig::in_dir(dir.path());
    let recorder = Recorder { checkpoint: Some(output.temp_path()), ..Recorder::default() };

    let outcome = pipeline(&site, &dir)
        .run(&quarter(), &recorder, &StopSignal::new())
        .await
        .unwrap();

    assert!(outcome.success, "{:?}", outcome.message);
    assert_eq!(outcome.records, 3);
    assert_eq!(outcome.actions, 2);
    assert_eq!(outcome.duplicates_removed, 1);
    assert_eq!(
        outcome.stats,
        RunStats {
            instruments_found: 2,
            instruments_skipped: 0,
            windows_scraped: 3,
            windows_empty: 2,
            windows_failed: 1,
            cancelled: false,
        }
    );
    assert_eq!(site.closes(), 1);

    // Checkpoint matches the accumulator after every productive window.
    assert_eq!(*recorder.checkpoint_rows.lock().unwrap(), vec![2, 3, 4]);

    let final_rows = load_checkpoint(&output.final_path()).unwrap();
    let dates: Vec<&str> = final_rows.iter().map(|r| r.get("Date").unwrap()).collect();
    assert_eq!(dates, vec!["10/01/2023", "15/03/2023", "02/04/2023"]);
    assert_eq!(final_rows[1].get("Clôture"), Some("15500.00"));
    assert_eq!(final_rows[0].instrument, "ORAGROUP");

    let progress = recorder.progress.lock().unwrap();
    assert_eq!(progress.len(), 6);
    assert_eq!(progress[0].1, "SONATEL | 2023-01-01 - 2023-01-31");
    assert!((progress.last().unwrap().0 - 1.0).abs() < f64::EPSILON);
    assert!(progress.windows(2).all(|p| p[0].0 <= p[1].0));
}

#[tokio::test]
async fn test_no_rows_means_no_final_file() {
    let dir = TempDir::new().unwrap();
    let site = Site::with_instruments(&["SONATEL"]);
    let output = OutputConfig::in_dir(dir.path());

    let outcome = pipeline(&site, &dir)
        .run(&quarter(), &Recorder::default(), &StopSignal::new())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.message.as_deref(), Some(NO_DATA_MESSAGE));
    assert_eq!(outcome.stats.windows_empty, 3);
    assert!(!output.final_path().exists());
    assert!(!output.temp_path().exists());
    assert_eq!(site.closes(), 1);
}

#[tokio::test]
async fn test_instrument_without_history_is_skipped() {
    let dir = TempDir::new().unwrap();
    let mut site = Site::with_instruments(&["SONATEL", "ORAGROUP"])
        .reply("ORAGROUP", d(2023, 1, 1), table(&[("10/01/2023", "3400")]));
    site.no_history.insert("SONATEL".to_string());
    let recorder = Recorder::default();

    let outcome = pipeline(&site, &dir)
        .run(&quarter(), &recorder, &StopSignal::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.actions, 1);
    assert_eq!(outcome.stats.instruments_skipped, 1);
    assert!(site.visited().iter().all(|(label, _)| label == "ORAGROUP"));

    // Skipped windows still count toward progress.
    let progress = recorder.progress.lock().unwrap();
    assert_eq!(progress.len(), 6);
    assert!((progress.last().unwrap().0 - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_instrument_errors_keep_progress_and_counts() {
    let dir = TempDir::new().unwrap();
    let mut site = Site::with_instruments(&["BROKEN", "SONATEL"])
        .reply("SONATEL", d(2023, 1, 1), table(&[("15/03/2023", "15500")]));
    site.unselectable.insert("BROKEN".to_string());
    site.landing_fails = true;
    let recorder = Recorder::default();

    let outcome = pipeline(&site, &dir)
        .run(&quarter(), &recorder, &StopSignal::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.records, 1);
    // BROKEN never got a window; SONATEL's landing failure is not a skip.
    assert_eq!(outcome.stats.instruments_skipped, 1);
    assert_eq!(outcome.stats.windows_scraped, 1);
    assert_eq!(site.closes(), 1);

    let progress = recorder.progress.lock().unwrap();
    assert_eq!(progress.len(), 6);
    assert_eq!(progress[0].1, "BROKEN | 2023-01-01 - 2023-01-31 (skipped)");
    assert!((progress.last().unwrap().0 - 1.0).abs() < f64::EPSILON);
    assert!(progress.windows(2).all(|p| p[0].0 <= p[1].0));

    let lines = recorder.lines.lock().unwrap();
    assert!(lines.iter().any(|l| l.contains("ERROR on instrument \"BROKEN\"")));
    assert!(lines.iter().any(|l| l.contains("ERROR returning to the landing page")));
}

#[tokio::test]
async fn test_stop_takes_effect_within_one_window() {
    let dir = TempDir::new().unwrap();
    let stop = StopSignal::new();
    let mut site = Site::with_instruments(&["SONATEL", "ORAGROUP"])
        .reply("SONATEL", d(2023, 1, 1), table(&[("15/03/2023", "15500")]));
    site.stop_after_windows = Some((2, stop.clone()));

    let outcome = pipeline(&site, &dir)
        .run(&quarter(), &Recorder::default(), &stop)
        .await
        .unwrap();

    assert_eq!(site.visited().len(), 2);
    assert!(outcome.stats.cancelled);
    assert!(outcome.success);
    assert_eq!(outcome.records, 1);
    assert_eq!(site.closes(), 1);
}

#[tokio::test]
async fn test_listing_failure_still_closes_session() {
    let dir = TempDir::new().unwrap();
    let mut site = Site::with_instruments(&["SONATEL"]);
    site.list_fails = true;
    let recorder = Recorder::default();

    let outcome = pipeline(&site, &dir)
        .run(&quarter(), &recorder, &StopSignal::new())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(site.closes(), 1);
    assert!(recorder.lines.lock().unwrap().iter().any(|l| l.contains("ERROR while scraping")));
}

#[tokio::test]
async fn test_unreachable_browser_is_an_error() {
    let dir = TempDir::new().unwrap();
    let site = Site::with_instruments(&["SONATEL"]);
    let pipeline = Pipeline::new(
        FakeLauncher { site: site.clone(), unreachable: true },
        OutputConfig::in_dir(dir.path()),
    );

    let result = pipeline
        .run(&quarter(), &Recorder::default(), &StopSignal::new())
        .await;

    assert!(matches!(result, Err(ScrapeError::Navigation(_))));
    assert_eq!(site.closes(), 0);
}

#[tokio::test]
async fn test_background_run_hands_off_events() {
    let dir = TempDir::new().unwrap();
    let site = Site::with_instruments(&["SONATEL"])
        .reply("SONATEL", d(2023, 2, 1), table(&[("01/02/2023", "15000")]));
    let pipeline = pipeline(&site, &dir);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reporter = ChannelReporter::new(tx);
    let handle = tokio::spawn(async move {
        let outcome = pipeline.run(&quarter(), &reporter, &StopSignal::new()).await;
        if let Ok(o) = &outcome {
            reporter.finished(o.clone());
        }
        outcome
    });

    let mut progress = 0;
    let mut finished = None;
    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::Progress { .. } => progress += 1,
            RunEvent::Log(_) => {}
            RunEvent::Finished(o) => finished = Some(o),
        }
    }

    let outcome = tokio_test::assert_ok!(handle.await.unwrap());
    assert_eq!(progress, 3);
    assert_eq!(finished, Some(outcome.clone()));
    assert_eq!(outcome.records, 1);
}
