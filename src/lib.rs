//! A relay for large files between a messaging service and local storage.
//!
//! Submitters send a 1–4 GiB file, optionally pick a new name and a caption,
//! and the relay queues the job. A fixed pool of workers downloads each
//! payload, re-uploads it to the submitter and keeps a status message
//! updated along the way.
//!
//! # Architecture
//!
//! - `Config`: Runtime configuration
//! - `AdmissionPolicy`: Size gate for new submissions
//! - `SessionManager`: Per-submitter rename/caption state machine
//! - `JobQueue`: Unbounded FIFO shared by sessions and workers
//! - `WorkerPool`: Fixed set of workers running download → upload
//! - `StatusMessage`, `ProgressReporter`: Throttled, best-effort status message updates
//! - `Transport`: Everything the relay needs from the messaging service
//! - `Bot`: Inbound event routing
//!
//! # Example
//! ```no_run
//! use relay::{Bot, Config, JobQueue, LocalTransport, TransferStats, WorkerPool};
//! use std::sync::Arc;
//!
//! async fn example() -> relay::error::Result<()> {
//!     let config = Config::default();
//!     let queue = Arc::new(JobQueue::new());
//!     let stats = Arc::new(TransferStats::new());
//!     let transport = Arc::new(LocalTransport::new(&config.outbox_dir).await?);
//!     let pool = WorkerPool::start(&config, queue.clone(), transport.clone(), stats.clone()).await?;
//!     let bot = Bot::new(&config, transport, queue, stats);
//!     // ... feed events into `bot.handle`
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod bot;
pub mod config;
pub mod error;
pub mod job;
pub mod progress;
pub mod queue;
pub mod session;
pub mod stats;
pub mod transport;
pub mod worker;

// Re-export commonly used items
pub use admission::{Admission, AdmissionPolicy};
pub use bot::{Bot, Event, Inbound};
pub use config::{Config, RateLimitPolicy};
pub use error::AppError;
pub use job::{JobId, SourceRef, SubmitterId, TransferJob};
pub use progress::ProgressReporter;
pub use queue::JobQueue;
pub use session::{SessionManager, SessionReply, Stage};
pub use stats::TransferStats;
pub use transport::{LocalTransport, MemoryTransport, Transport};
pub use worker::WorkerPool;
