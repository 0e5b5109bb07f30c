use super::{Choice, ProgressSink, RemoteFile, StatusDisplay, Transport, Upload};
use crate::error::{AppError, Result};
use crate::job::SourceRef;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Scripted outcome for one download or upload attempt.
#[derive(Debug, Clone)]
pub enum Failure {
    RateLimited(Duration),
    Error(String),
}

impl Failure {
    fn into_error(self) -> AppError {
        match self {
            Failure::RateLimited(retry_after) => AppError::RateLimited { retry_after },
            Failure::Error(msg) => AppError::Transport(msg),
        }
    }
}

/// A finished upload as seen by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub chat_id: i64,
    pub file_name: String,
    pub caption: String,
    pub thumbnail: Option<PathBuf>,
    pub content: Vec<u8>,
}

/// In-memory test double for the messaging service.
///
/// Files are registered up front with [`MemoryTransport::add_file`]; every
/// reply, status edit and upload is recorded for later inspection.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    transfer_delay: Duration,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<String, (RemoteFile, Vec<u8>)>,
    download_failures: HashMap<String, VecDeque<Failure>>,
    upload_failures: HashMap<String, VecDeque<Failure>>,
    failing_status: bool,
    next_message_id: i64,
    created_statuses: usize,
    statuses: Vec<(StatusDisplay, String)>,
    replies: Vec<(i64, String)>,
    choices: Vec<(i64, String, Vec<Choice>)>,
    uploads: Vec<UploadRecord>,
    downloads_started: usize,
    active: usize,
    max_active: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every download sleeps this long midway, so overlapping jobs are
    /// observable.
    pub fn with_transfer_delay(delay: Duration) -> Self {
        Self {
            transfer_delay: delay,
            ..Self::default()
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a downloadable file. `size` is the size the service
    /// advertises; `content` is what actually gets written.
    pub fn add_file(&self, file_id: &str, name: Option<&str>, size: u64, content: &[u8]) {
        let file = RemoteFile {
            handle: file_id.to_string(),
            name: name.map(str::to_string),
            size,
        };
        self.state()
            .files
            .insert(file_id.to_string(), (file, content.to_vec()));
    }

    pub fn fail_download(&self, file_id: &str, failure: Failure) {
        self.state()
            .download_failures
            .entry(file_id.to_string())
            .or_default()
            .push_back(failure);
    }

    pub fn fail_upload(&self, file_name: &str, failure: Failure) {
        self.state()
            .upload_failures
            .entry(file_name.to_string())
            .or_default()
            .push_back(failure);
    }

    /// Makes every status edit fail, as when the message was deleted.
    pub fn fail_status_updates(&self, failing: bool) {
        self.state().failing_status = failing;
    }

    pub fn replies(&self) -> Vec<(i64, String)> {
        self.state().replies.clone()
    }

    pub fn choices(&self) -> Vec<(i64, String, Vec<Choice>)> {
        self.state().choices.clone()
    }

    pub fn status_texts(&self) -> Vec<String> {
        self.state().statuses.iter().map(|(_, t)| t.clone()).collect()
    }

    /// How many status messages were posted, as opposed to edited.
    pub fn status_messages_created(&self) -> usize {
        self.state().created_statuses
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.state().uploads.clone()
    }

    pub fn downloads_started(&self) -> usize {
        self.state().downloads_started
    }

    /// Highest number of downloads that were in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.state().max_active
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn resolve_file(&self, source: &SourceRef) -> Result<RemoteFile> {
        self.state()
            .files
            .get(&source.file_id)
            .map(|(file, _)| file.clone())
            .ok_or_else(|| AppError::Transport(format!("no media in message {}", source.message_id)))
    }

    async fn download_to(
        &self,
        file: &RemoteFile,
        dest: &Path,
        progress: ProgressSink,
    ) -> Result<PathBuf> {
        let (content, failure) = {
            let mut state = self.state();
            state.downloads_started += 1;
            state.active += 1;
            state.max_active = state.max_active.max(state.active);
            let failure = state
                .download_failures
                .get_mut(&file.handle)
                .and_then(VecDeque::pop_front);
            let content = state.files.get(&file.handle).map(|(_, c)| c.clone());
            (content, failure)
        };

        progress.report(0, file.size);
        if !self.transfer_delay.is_zero() {
            tokio::time::sleep(self.transfer_delay).await;
        }

        let result = match (failure, content) {
            (Some(failure), _) => Err(failure.into_error()),
            (None, None) => Err(AppError::Transport(format!("unknown file {}", file.handle))),
            (None, Some(content)) => match tokio::fs::write(dest, &content).await {
                Ok(()) => {
                    progress.report(file.size, file.size);
                    Ok(dest.to_path_buf())
                }
                Err(e) => Err(e.into()),
            },
        };

        self.state().active -= 1;
        result
    }

    async fn upload_from(&self, upload: Upload<'_>, progress: ProgressSink) -> Result<()> {
        let failure = self
            .state()
            .upload_failures
            .get_mut(upload.file_name)
            .and_then(VecDeque::pop_front);
        if let Some(failure) = failure {
            return Err(failure.into_error());
        }

        let content = tokio::fs::read(upload.path).await?;
        let total = content.len() as u64;
        progress.report(total, total);
        self.state().uploads.push(UploadRecord {
            chat_id: upload.chat_id,
            file_name: upload.file_name.to_string(),
            caption: upload.caption.to_string(),
            thumbnail: upload.thumbnail.map(Path::to_path_buf),
            content,
        });
        Ok(())
    }

    async fn create_status(&self, source: &SourceRef, text: &str) -> Result<StatusDisplay> {
        let mut state = self.state();
        state.next_message_id += 1;
        state.created_statuses += 1;
        let display = StatusDisplay {
            chat_id: source.chat_id,
            message_id: state.next_message_id,
        };
        state.statuses.push((display.clone(), text.to_string()));
        Ok(display)
    }

    async fn update_status(&self, display: &StatusDisplay, text: &str) -> Result<()> {
        let mut state = self.state();
        if state.failing_status {
            return Err(AppError::Transport("message to edit not found".into()));
        }
        state.statuses.push((display.clone(), text.to_string()));
        Ok(())
    }

    async fn reply(&self, chat_id: i64, text: &str) -> Result<()> {
        self.state().replies.push((chat_id, text.to_string()));
        Ok(())
    }

    async fn reply_with_choices(
        &self,
        chat_id: i64,
        text: &str,
        choices: &[Choice],
    ) -> Result<()> {
        self.state()
            .choices
            .push((chat_id, text.to_string(), choices.to_vec()));
        Ok(())
    }
}
