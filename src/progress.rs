//! Status-message progress reporting.
//!
//! Renders a 20-segment bar and edits the job's status message with it.
//! Every edit of one status message, from either phase, goes through a
//! single [`StatusMessage`] so the transport's edit rate is respected across
//! phase changes. Reporting is best-effort: a failed edit is logged at debug
//! level and otherwise ignored, so it can never interrupt a transfer.

use crate::transport::{ProgressSink, StatusDisplay, Transport};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Number of segments in the rendered bar.
pub const BAR_WIDTH: usize = 20;

const FILLED: char = '█';
const EMPTY: char = '░';

/// Completion in percent. A zero total counts as no progress.
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}

/// Bar with one filled segment per full 5%.
pub fn render_bar(percent: f64) -> String {
    let step = 100.0 / BAR_WIDTH as f64;
    let filled = ((percent / step).floor().max(0.0) as usize).min(BAR_WIDTH);
    let mut bar = String::with_capacity(BAR_WIDTH * FILLED.len_utf8());
    bar.extend(std::iter::repeat(FILLED).take(filled));
    bar.extend(std::iter::repeat(EMPTY).take(BAR_WIDTH - filled));
    bar
}

/// Full status text, e.g. `Downloading...\n[██░░…] 10.0%`.
pub fn format_status(label: &str, done: u64, total: u64) -> String {
    let pct = percent(done, total);
    format!("{}\n[{}] {:.1}%", label, render_bar(pct), pct)
}

/// One job's status message, edited at most once per `interval`.
///
/// Posting the message counts as the first edit.
pub struct StatusMessage {
    transport: Arc<dyn Transport>,
    display: StatusDisplay,
    interval: Duration,
    last_edit: Mutex<Instant>,
}

impl StatusMessage {
    pub fn new(transport: Arc<dyn Transport>, display: StatusDisplay, interval: Duration) -> Self {
        Self {
            transport,
            display,
            interval,
            last_edit: Mutex::new(Instant::now()),
        }
    }

    pub fn display(&self) -> &StatusDisplay {
        &self.display
    }

    /// Time left before the next edit is allowed.
    pub fn remaining(&self) -> Duration {
        let last = *self.last_edit.lock().unwrap_or_else(PoisonError::into_inner);
        self.interval.saturating_sub(last.elapsed())
    }

    /// Waits until an edit is allowed, then replaces the text. Never fails.
    pub async fn set(&self, text: &str) {
        let wait = self.remaining();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        *self.last_edit.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        if let Err(e) = self.transport.update_status(&self.display, text).await {
            debug!(error = %e, "status update dropped");
        }
    }
}

/// Mirrors one phase's progress onto a job's status message.
pub struct ProgressReporter {
    status: Arc<StatusMessage>,
    label: String,
}

impl ProgressReporter {
    pub fn new(status: Arc<StatusMessage>, label: impl Into<String>) -> Self {
        Self {
            status,
            label: label.into(),
        }
    }

    /// Edits the status message once, as soon as the edit rate allows.
    /// Never fails.
    pub async fn report(&self, done: u64, total: u64) {
        self.status
            .set(&format_status(&self.label, done, total))
            .await;
    }

    /// Starts a task that mirrors sink updates onto the status message.
    ///
    /// Updates arriving faster than the edit rate are merged: the newest
    /// one is shown once the interval has passed. The task ends once every
    /// clone of the returned sink is dropped; a pending update is then
    /// discarded, since the phase-end edit replaces it.
    pub fn spawn(self) -> (ProgressSink, JoinHandle<()>) {
        let (tx, rx) = watch::channel((0, 0));
        let handle = tokio::spawn(self.run(rx));
        (ProgressSink::new(tx), handle)
    }

    async fn run(self, mut rx: watch::Receiver<(u64, u64)>) {
        while rx.changed().await.is_ok() {
            let wait = self.status.remaining();
            if !wait.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = sender_gone(&mut rx) => return,
                }
            }
            let (done, total) = *rx.borrow_and_update();
            self.report(done, total).await;
        }
    }
}

/// Resolves once the sink side is dropped. Values seen meanwhile stay
/// readable through `borrow`.
async fn sender_gone(rx: &mut watch::Receiver<(u64, u64)>) {
    while rx.changed().await.is_ok() {}
}
