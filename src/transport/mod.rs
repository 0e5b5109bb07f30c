//! Capability set the pipeline needs from the messaging service.
//!
//! Everything the workers and sessions do to the outside world goes through
//! [`Transport`]: resolving and downloading the submitted file, uploading the
//! result, keeping a status message up to date and replying to submitters.
//! Authentication and flood-control detection live behind this trait; a
//! flood-control signal must surface as [`AppError::RateLimited`].
//!
//! [`AppError::RateLimited`]: crate::error::AppError::RateLimited

pub mod local;
pub mod memory;

use crate::error::Result;
use crate::job::SourceRef;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

pub use local::LocalTransport;
pub use memory::MemoryTransport;

/// Metadata for a payload the transport can download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub handle: String,
    pub name: Option<String>,
    pub size: u64,
}

/// A message that can be edited in place to show job status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusDisplay {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Buttons offered after an eligible file arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Rename,
    Skip,
}

impl Choice {
    pub fn label(&self) -> &'static str {
        match self {
            Choice::Rename => "Rename",
            Choice::Skip => "Skip",
        }
    }

    /// Callback payload carried by the button.
    pub fn data(&self) -> &'static str {
        match self {
            Choice::Rename => "rename",
            Choice::Skip => "skip",
        }
    }

    pub fn from_data(data: &str) -> Option<Self> {
        match data {
            "rename" => Some(Choice::Rename),
            "skip" => Some(Choice::Skip),
            _ => None,
        }
    }
}

/// Everything needed to send the finished file back.
#[derive(Debug, Clone)]
pub struct Upload<'a> {
    pub chat_id: i64,
    pub path: &'a Path,
    pub file_name: &'a str,
    pub thumbnail: Option<&'a Path>,
    pub caption: &'a str,
}

/// Write end of a progress channel handed to the transport during a
/// download or upload. Updates are coalesced; only the newest one is kept.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Arc<watch::Sender<(u64, u64)>>,
}

impl ProgressSink {
    pub(crate) fn new(tx: watch::Sender<(u64, u64)>) -> Self {
        Self { tx: Arc::new(tx) }
    }

    /// A sink nobody listens to.
    pub fn disabled() -> Self {
        let (tx, _rx) = watch::channel((0, 0));
        Self::new(tx)
    }

    pub fn report(&self, done: u64, total: u64) {
        self.tx.send_replace((done, total));
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Looks up the downloadable payload behind a submitted message.
    async fn resolve_file(&self, source: &SourceRef) -> Result<RemoteFile>;

    /// Downloads `file` to `dest`, returning where it ended up. The sink must
    /// not be kept past the returned future.
    async fn download_to(
        &self,
        file: &RemoteFile,
        dest: &Path,
        progress: ProgressSink,
    ) -> Result<PathBuf>;

    /// Sends a local file to `upload.chat_id`.
    async fn upload_from(&self, upload: Upload<'_>, progress: ProgressSink) -> Result<()>;

    /// Posts a new status message in reply to `source`.
    async fn create_status(&self, source: &SourceRef, text: &str) -> Result<StatusDisplay>;

    /// Edits a status message. Callers treat failures as non-fatal.
    async fn update_status(&self, display: &StatusDisplay, text: &str) -> Result<()>;

    async fn reply(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Replies with a row of buttons.
    async fn reply_with_choices(
        &self,
        chat_id: i64,
        text: &str,
        choices: &[Choice],
    ) -> Result<()>;
}
