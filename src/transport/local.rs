use super::{Choice, ProgressSink, RemoteFile, StatusDisplay, Transport, Upload};
use crate::error::{AppError, Result};
use crate::job::SourceRef;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

const CHUNK_SIZE: usize = 1 << 20;

/// Loopback transport for running the relay on one machine.
///
/// A submitted message's `file_id` is a path on the local file system.
/// Uploads land in the outbox directory, with the caption written next to
/// the file when there is one. Replies and status messages go to stdout.
#[derive(Debug)]
pub struct LocalTransport {
    outbox_dir: PathBuf,
    next_message_id: AtomicI64,
}

impl LocalTransport {
    pub async fn new(outbox_dir: impl Into<PathBuf>) -> Result<Self> {
        let outbox_dir = outbox_dir.into();
        tokio::fs::create_dir_all(&outbox_dir).await?;
        Ok(Self {
            outbox_dir,
            next_message_id: AtomicI64::new(1),
        })
    }

    fn next_message_id(&self) -> i64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Streams `from` into `to` in fixed chunks, reporting each step.
async fn copy_with_progress(from: &Path, to: &Path, progress: &ProgressSink) -> Result<u64> {
    let mut reader = tokio::fs::File::open(from).await?;
    let total = reader.metadata().await?.len();
    let mut writer = tokio::fs::File::create(to).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut done = 0u64;

    progress.report(0, total);
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        done += n as u64;
        progress.report(done, total);
    }
    writer.flush().await?;
    Ok(done)
}

#[async_trait]
impl Transport for LocalTransport {
    async fn resolve_file(&self, source: &SourceRef) -> Result<RemoteFile> {
        let path = PathBuf::from(&source.file_id);
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(AppError::Transport(format!("{} is not a file", path.display())));
        }
        Ok(RemoteFile {
            handle: source.file_id.clone(),
            name: path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string),
            size: meta.len(),
        })
    }

    async fn download_to(
        &self,
        file: &RemoteFile,
        dest: &Path,
        progress: ProgressSink,
    ) -> Result<PathBuf> {
        let bytes = copy_with_progress(Path::new(&file.handle), dest, &progress).await?;
        debug!(src = %file.handle, dest = %dest.display(), bytes, "download finished");
        Ok(dest.to_path_buf())
    }

    async fn upload_from(&self, upload: Upload<'_>, progress: ProgressSink) -> Result<()> {
        let target = self.outbox_dir.join(upload.file_name);
        let bytes = copy_with_progress(upload.path, &target, &progress).await?;

        if !upload.caption.is_empty() {
            let caption_path = self
                .outbox_dir
                .join(format!("{}.caption.txt", upload.file_name));
            tokio::fs::write(caption_path, upload.caption).await?;
        }
        if let Some(thumb) = upload.thumbnail {
            let thumb_path = self.outbox_dir.join(format!("{}.thumb.jpg", upload.file_name));
            tokio::fs::copy(thumb, thumb_path).await?;
        }

        info!(chat = upload.chat_id, target = %target.display(), bytes, "upload finished");
        Ok(())
    }

    async fn create_status(&self, source: &SourceRef, text: &str) -> Result<StatusDisplay> {
        let display = StatusDisplay {
            chat_id: source.chat_id,
            message_id: self.next_message_id(),
        };
        println!("[status #{}] {}", display.message_id, text);
        Ok(display)
    }

    async fn update_status(&self, display: &StatusDisplay, text: &str) -> Result<()> {
        println!("[status #{}] {}", display.message_id, text.replace('\n', " "));
        Ok(())
    }

    async fn reply(&self, _chat_id: i64, text: &str) -> Result<()> {
        println!("{text}");
        Ok(())
    }

    async fn reply_with_choices(
        &self,
        _chat_id: i64,
        text: &str,
        choices: &[Choice],
    ) -> Result<()> {
        let options: Vec<_> = choices
            .iter()
            .map(|c| format!("[{}] type '{}'", c.label(), c.data()))
            .collect();
        println!("{text}: {}", options.join("  "));
        Ok(())
    }
}
