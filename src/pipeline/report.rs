//! How a run talks to whoever is watching it.

use crate::models::RunOutcome;
use crate::utils::{fmt_percent, timestamped};
use chrono::Local;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

/// Progress and log sink handed to the pipeline.
pub trait Reporter: Send + Sync {
    /// `fraction` is in [0, 1].
    fn progress(&self, fraction: f64, message: &str);

    /// `line` is already timestamped.
    fn log(&self, line: &str);
}

/// Emit a timestamped log line through `reporter`.
pub fn emit(reporter: &dyn Reporter, message: &str) {
    reporter.log(&timestamped(Local::now(), message));
}

/// Writes everything to the tracing subscriber.
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn progress(&self, fraction: f64, message: &str) {
        info!("{} {}", fmt_percent(fraction), message);
    }

    fn log(&self, line: &str) {
        info!("{}", line);
    }
}

// ── Channel hand-off ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Progress { fraction: f64, message: String },
    Log(String),
    Finished(RunOutcome),
}

/// Forwards events to the task that owns the terminal, so the run itself
/// never touches presentation state.
#[derive(Clone)]
pub struct ChannelReporter {
    tx: UnboundedSender<RunEvent>,
}

impl ChannelReporter {
    pub fn new(tx: UnboundedSender<RunEvent>) -> Self {
        Self { tx }
    }

    pub fn finished(&self, outcome: RunOutcome) {
        let _ = self.tx.send(RunEvent::Finished(outcome));
    }
}

impl Reporter for ChannelReporter {
    fn progress(&self, fraction: f64, message: &str) {
        // Receiver gone means nobody is watching; keep scraping.
        let _ = self.tx.send(RunEvent::Progress {
            fraction,
            message: message.to_string(),
        });
    }

    fn log(&self, line: &str) {
        let _ = self.tx.send(RunEvent::Log(line.to_string()));
    }
}

// ── Cancellation ──────────────────────────────────────────────────────────────

/// Cooperative stop flag, checked before every instrument and window.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
