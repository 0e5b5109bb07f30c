use crate::error::{AppError, Result};
use crate::job::TransferJob;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Unbounded FIFO of transfer jobs shared by every session and worker.
///
/// Producers never wait. Consumers wait in [`JobQueue::dequeue`] until a job
/// arrives, and each job is handed to exactly one of them. After
/// [`JobQueue::close`] new jobs are refused while queued ones can still be
/// drained.
#[derive(Debug)]
pub struct JobQueue {
    sender: Mutex<Option<UnboundedSender<TransferJob>>>,
    receiver: tokio::sync::Mutex<UnboundedReceiver<TransferJob>>,
    depth: AtomicUsize,
}

impl JobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            depth: AtomicUsize::new(0),
        }
    }

    /// Appends a job. Fails only once the queue has been closed.
    pub fn enqueue(&self, job: TransferJob) -> Result<()> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(AppError::QueueClosed)?;
        let id = job.id();
        // Count before sending so a fast consumer never drives depth below zero.
        self.depth.fetch_add(1, Ordering::SeqCst);
        if sender.send(job).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(AppError::QueueClosed);
        }
        debug!(job = %id, depth = self.len(), "job enqueued");
        Ok(())
    }

    /// Waits for the next job. Returns `None` once the queue is closed and
    /// fully drained.
    pub async fn dequeue(&self) -> Option<TransferJob> {
        let job = self.receiver.lock().await.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(job)
    }

    /// Stops accepting new jobs.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Number of jobs waiting to be picked up.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
