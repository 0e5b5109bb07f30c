use crate::job::JobId;
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const RECENT_FAILURES: usize = 5;

/// One failed job, kept for the operator panel.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub job: JobId,
    pub error: String,
    pub at: DateTime<Local>,
}

/// Pool-wide transfer counters for the operator panel.
///
/// Tracks how many jobs finished, failed or were dropped after a rate-limit
/// wait, how many are running right now, and the last few failure reasons.
#[derive(Debug)]
pub struct TransferStats {
    start_time: Instant,
    active: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    rate_limited: AtomicUsize,
    recent_failures: Mutex<VecDeque<FailureRecord>>,
}

/// Point-in-time copy of [`TransferStats`].
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub rate_limited: usize,
    pub recent_failures: Vec<FailureRecord>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            active: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            rate_limited: AtomicUsize::new(0),
            recent_failures: Mutex::new(VecDeque::with_capacity(RECENT_FAILURES)),
        }
    }

    /// Marks a job as running until the guard is dropped.
    pub fn track_active(&self) -> ActiveGuard<'_> {
        ActiveGuard::new(&self.active)
    }

    pub fn record_success(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self, job: JobId, error: String) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let mut recent = self
            .recent_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if recent.len() == RECENT_FAILURES {
            recent.pop_front();
        }
        recent.push_back(FailureRecord {
            job,
            error,
            at: Local::now(),
        });
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::SeqCst);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.start_time.elapsed(),
            active: self.active(),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            rate_limited: self.rate_limited.load(Ordering::SeqCst),
            recent_failures: self
                .recent_failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned()
                .collect(),
        }
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSnapshot {
    /// Multi-line summary appended to the admin panel.
    pub fn summary(&self) -> String {
        let mut text = format!(
            "Active: {}\nCompleted: {}\nFailed: {}\nRate limited: {}\nUptime: {:.0}s",
            self.active,
            self.completed,
            self.failed,
            self.rate_limited,
            self.uptime.as_secs_f64()
        );
        for failure in &self.recent_failures {
            text.push_str(&format!(
                "\n#{} {} {}",
                failure.job,
                failure.at.format("%Y-%m-%d %H:%M:%S"),
                failure.error
            ));
        }
        text
    }
}

/// RAII guard for tracking active jobs
///
/// Automatically increments counter on creation and
/// decrements it when dropped
pub struct ActiveGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> ActiveGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
