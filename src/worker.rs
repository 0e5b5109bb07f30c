use crate::config::{Config, RateLimitPolicy};
use crate::error::{AppError, Result};
use crate::job::TransferJob;
use crate::progress::{ProgressReporter, StatusMessage};
use crate::queue::JobQueue;
use crate::stats::TransferStats;
use crate::transport::{RemoteFile, Transport, Upload};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

const DOWNLOADING: &str = "Downloading...";
const UPLOADING: &str = "Uploading...";
const COMPLETED: &str = "Completed";

/// Fixed set of workers draining the job queue.
///
/// Each worker takes one job at a time and runs it to completion, to a
/// rate-limit abort, or to an error, then goes back to the queue. A failing
/// or panicking job never takes its worker down.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handles: Vec<JoinHandle<()>>,
}

/// Everything a worker needs, shared by the whole pool.
struct WorkerContext {
    transport: Arc<dyn Transport>,
    queue: Arc<JobQueue>,
    stats: Arc<TransferStats>,
    download_dir: PathBuf,
    thumbnail_path: PathBuf,
    progress_interval: Duration,
    rate_limit_policy: RateLimitPolicy,
}

impl WorkerPool {
    /// Creates the download directory and spawns `config.workers` workers.
    ///
    /// # Errors
    /// * If the download directory cannot be created
    #[instrument(skip_all, fields(workers = config.workers))]
    pub async fn start(
        config: &Config,
        queue: Arc<JobQueue>,
        transport: Arc<dyn Transport>,
        stats: Arc<TransferStats>,
    ) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.download_dir).await?;

        let ctx = Arc::new(WorkerContext {
            transport,
            queue: Arc::clone(&queue),
            stats,
            download_dir: config.download_dir.clone(),
            thumbnail_path: config.thumbnail_path.clone(),
            progress_interval: config.progress_interval(),
            rate_limit_policy: config.rate_limit_policy,
        });

        let handles = (0..config.workers)
            .map(|index| {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(run_worker(ctx).instrument(info_span!("worker", index)))
            })
            .collect();

        info!("worker pool started");
        Ok(Self { queue, handles })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Stops accepting jobs, lets the workers finish everything already
    /// queued, and waits for them to exit.
    pub async fn shutdown(self) {
        self.queue.close();
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "worker exited abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

async fn run_worker(ctx: Arc<WorkerContext>) {
    debug!("worker idle");
    while let Some(job) = ctx.queue.dequeue().await {
        let id = job.id();
        let task = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            async move { ctx.process(job).await }.in_current_span()
        });
        if let Err(e) = task.await {
            ctx.stats.record_failure(id, format!("worker task failed: {e}"));
            error!(job = %id, error = %e, "job panicked");
        }
    }
    debug!("queue closed, worker exiting");
}

impl WorkerContext {
    /// Runs one job and settles its outcome. Never returns an error.
    #[instrument(skip_all, fields(job = %job.id(), submitter = %job.submitter()))]
    async fn process(&self, job: TransferJob) {
        let _active = self.stats.track_active();
        let waited = chrono::Utc::now() - job.enqueued_at();
        debug!(waited_ms = waited.num_milliseconds(), "job started");

        let mut status = None;
        let mut retried = false;
        loop {
            let err = match self.attempt(&job, &mut status).await {
                Ok(()) => {
                    self.stats.record_success();
                    info!("job completed");
                    return;
                }
                Err(e) => e,
            };

            let Some(wait) = err.retry_after() else {
                error!(error = %err, "job failed");
                self.fail(&job, &err).await;
                return;
            };

            self.stats.record_rate_limited();
            match self.rate_limit_policy {
                RateLimitPolicy::RetryOnce if retried => {
                    warn!(wait_secs = wait.as_secs(), "rate limited again, giving up");
                    self.fail(&job, &err).await;
                    return;
                }
                RateLimitPolicy::RetryOnce => {
                    warn!(wait_secs = wait.as_secs(), "rate limited, retrying after wait");
                    tokio::time::sleep(wait).await;
                    retried = true;
                }
                RateLimitPolicy::Drop => {
                    warn!(wait_secs = wait.as_secs(), "rate limited, dropping job after wait");
                    tokio::time::sleep(wait).await;
                    return;
                }
            }
        }
    }

    async fn fail(&self, job: &TransferJob, err: &AppError) {
        self.stats.record_failure(job.id(), err.to_string());
        let text = format!("Error: {err}");
        if let Err(e) = self.transport.reply(job.source().chat_id, &text).await {
            warn!(error = %e, "could not report failure to submitter");
        }
    }

    /// One run of the job. The status message is posted on the first run
    /// and reused by a retry.
    async fn attempt(
        &self,
        job: &TransferJob,
        slot: &mut Option<Arc<StatusMessage>>,
    ) -> Result<()> {
        let status = if let Some(existing) = slot.as_ref() {
            existing.set(DOWNLOADING).await;
            Arc::clone(existing)
        } else {
            let display = self
                .transport
                .create_status(job.source(), DOWNLOADING)
                .await?;
            let created = Arc::new(StatusMessage::new(
                Arc::clone(&self.transport),
                display,
                self.progress_interval,
            ));
            Arc::clone(slot.insert(created))
        };
        self.execute(job, &status).await
    }

    /// Download then upload. Local files are removed whatever happens.
    async fn execute(&self, job: &TransferJob, status: &Arc<StatusMessage>) -> Result<()> {
        let file = self.transport.resolve_file(job.source()).await?;
        let final_name = job.final_name(file.name.as_deref());
        let local_path = self.download_dir.join(job.local_file_name(&final_name));
        debug!(name = %final_name, size = file.size, path = %local_path.display(), "resolved source");

        let mut downloaded = None;
        let result = self
            .transfer(job, &file, &final_name, &local_path, status, &mut downloaded)
            .await;

        remove_local(&local_path).await;
        if let Some(path) = downloaded.filter(|p| *p != local_path) {
            remove_local(&path).await;
        }
        result
    }

    /// `downloaded` receives the path the transport actually wrote to, so
    /// the caller can clean it up even if the upload fails.
    async fn transfer(
        &self,
        job: &TransferJob,
        file: &RemoteFile,
        final_name: &str,
        local_path: &Path,
        status: &Arc<StatusMessage>,
        downloaded: &mut Option<PathBuf>,
    ) -> Result<()> {
        let (sink, reporter) = ProgressReporter::new(Arc::clone(status), DOWNLOADING).spawn();
        let result = self.transport.download_to(file, local_path, sink).await;
        let _ = reporter.await;
        let path: &Path = downloaded.insert(result?);

        status.set(UPLOADING).await;
        let thumbnail = self.thumbnail().await;
        let (sink, reporter) = ProgressReporter::new(Arc::clone(status), UPLOADING).spawn();
        let uploaded = self
            .transport
            .upload_from(
                Upload {
                    chat_id: job.source().chat_id,
                    path,
                    file_name: final_name,
                    thumbnail: thumbnail.as_deref(),
                    caption: job.caption(),
                },
                sink,
            )
            .await;
        let _ = reporter.await;
        uploaded?;

        status.set(COMPLETED).await;
        Ok(())
    }

    async fn thumbnail(&self) -> Option<PathBuf> {
        match tokio::fs::try_exists(&self.thumbnail_path).await {
            Ok(true) => Some(self.thumbnail_path.clone()),
            _ => None,
        }
    }
}

async fn remove_local(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove local file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{SourceRef, SubmitterId};
    use crate::transport::memory::{Failure, MemoryTransport};
    use crate::transport::{Choice, ProgressSink, StatusDisplay};

    struct Harness {
        _dir: tempfile::TempDir,
        config: Config,
        queue: Arc<JobQueue>,
        transport: Arc<MemoryTransport>,
        stats: Arc<TransferStats>,
    }

    impl Harness {
        fn new(transport: MemoryTransport, policy: RateLimitPolicy) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = Config {
                workers: 2,
                download_dir: dir.path().join("downloads"),
                thumbnail_path: dir.path().join("thumbnail.jpg"),
                progress_interval_ms: 0,
                rate_limit_policy: policy,
                ..Config::default()
            };
            Self {
                _dir: dir,
                config,
                queue: Arc::new(JobQueue::new()),
                transport: Arc::new(transport),
                stats: Arc::new(TransferStats::new()),
            }
        }

        async fn start(&self) -> WorkerPool {
            WorkerPool::start(
                &self.config,
                Arc::clone(&self.queue),
                self.transport.clone(),
                Arc::clone(&self.stats),
            )
            .await
            .unwrap()
        }

        fn submit(&self, file_id: &str, rename: Option<&str>, caption: &str) {
            let job = TransferJob::new(
                SubmitterId(7),
                SourceRef {
                    chat_id: 70,
                    message_id: 1,
                    file_id: file_id.to_string(),
                },
                rename.map(str::to_string),
                caption,
            );
            self.queue.enqueue(job).unwrap();
        }
    }

    #[tokio::test]
    async fn successful_job_uploads_and_cleans_up() {
        let transport = MemoryTransport::new();
        transport.add_file("a", Some("orig.mkv"), 3, b"abc");
        let h = Harness::new(transport, RateLimitPolicy::Drop);
        tokio::fs::write(&h.config.thumbnail_path, b"jpg").await.unwrap();

        let pool = h.start().await;
        h.submit("a", Some("new.mkv"), "cap");
        pool.shutdown().await;

        let uploads = h.transport.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].file_name, "new.mkv");
        assert_eq!(uploads[0].caption, "cap");
        assert_eq!(uploads[0].content, b"abc");
        assert_eq!(uploads[0].chat_id, 70);
        assert_eq!(uploads[0].thumbnail.as_deref(), Some(h.config.thumbnail_path.as_path()));

        let statuses = h.transport.status_texts();
        assert_eq!(statuses.first().map(String::as_str), Some(DOWNLOADING));
        assert!(statuses.iter().any(|s| s == UPLOADING));
        assert_eq!(statuses.last().map(String::as_str), Some(COMPLETED));

        let mut leftovers = tokio::fs::read_dir(&h.config.download_dir).await.unwrap();
        assert!(leftovers.next_entry().await.unwrap().is_none());
        assert_eq!(h.stats.snapshot().completed, 1);
    }

    #[tokio::test]
    async fn missing_thumbnail_is_not_attached() {
        let transport = MemoryTransport::new();
        transport.add_file("a", None, 1, b"x");
        let h = Harness::new(transport, RateLimitPolicy::Drop);

        let pool = h.start().await;
        h.submit("a", None, "");
        pool.shutdown().await;

        let uploads = h.transport.uploads();
        assert_eq!(uploads[0].thumbnail, None);
        assert_eq!(uploads[0].file_name, crate::job::FALLBACK_FILE_NAME);
    }

    #[tokio::test]
    async fn failure_is_reported_and_next_job_still_runs() {
        let transport = MemoryTransport::new();
        transport.add_file("bad", Some("bad.bin"), 1, b"x");
        transport.add_file("good", Some("good.bin"), 1, b"y");
        transport.fail_download("bad", Failure::Error("connection reset".into()));
        let mut h = Harness::new(transport, RateLimitPolicy::Drop);
        h.config.workers = 1;

        let pool = h.start().await;
        h.submit("bad", None, "");
        h.submit("good", None, "");
        pool.shutdown().await;

        assert_eq!(
            h.transport.replies(),
            vec![(70, "Error: Transport error: connection reset".to_string())]
        );
        let uploads = h.transport.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].file_name, "good.bin");

        let snap = h.stats.snapshot();
        assert_eq!((snap.completed, snap.failed), (1, 1));
    }

    #[tokio::test]
    async fn rate_limit_with_drop_policy_waits_then_drops_silently() {
        let transport = MemoryTransport::new();
        transport.add_file("a", None, 1, b"x");
        transport.fail_download("a", Failure::RateLimited(Duration::from_millis(20)));
        let h = Harness::new(transport, RateLimitPolicy::Drop);

        let pool = h.start().await;
        let started = std::time::Instant::now();
        h.submit("a", None, "");
        pool.shutdown().await;

        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(h.transport.uploads().is_empty());
        assert!(h.transport.replies().is_empty());
        assert_eq!(h.transport.downloads_started(), 1);
        assert_eq!(h.stats.snapshot().rate_limited, 1);
    }

    #[tokio::test]
    async fn rate_limit_with_retry_policy_retries_once() {
        let transport = MemoryTransport::new();
        transport.add_file("a", None, 1, b"x");
        transport.fail_upload(
            crate::job::FALLBACK_FILE_NAME,
            Failure::RateLimited(Duration::from_millis(5)),
        );
        let h = Harness::new(transport, RateLimitPolicy::RetryOnce);

        let pool = h.start().await;
        h.submit("a", None, "");
        pool.shutdown().await;

        assert_eq!(h.transport.downloads_started(), 2);
        assert_eq!(h.transport.uploads().len(), 1);
        assert!(h.transport.replies().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_twice_with_retry_policy_reports() {
        let transport = MemoryTransport::new();
        transport.add_file("a", None, 1, b"x");
        for _ in 0..2 {
            transport.fail_download("a", Failure::RateLimited(Duration::from_millis(5)));
        }
        let h = Harness::new(transport, RateLimitPolicy::RetryOnce);

        let pool = h.start().await;
        h.submit("a", None, "");
        pool.shutdown().await;

        assert!(h.transport.uploads().is_empty());
        let replies = h.transport.replies();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].1.starts_with("Error: Rate limited"));
    }

    #[tokio::test]
    async fn broken_status_display_does_not_fail_the_job() {
        let transport = MemoryTransport::new();
        transport.add_file("a", None, 1, b"x");
        transport.fail_status_updates(true);
        let h = Harness::new(transport, RateLimitPolicy::Drop);

        let pool = h.start().await;
        h.submit("a", None, "");
        pool.shutdown().await;

        assert_eq!(h.transport.uploads().len(), 1);
        assert!(h.transport.replies().is_empty());
        assert_eq!(h.transport.status_texts(), vec![DOWNLOADING.to_string()]);
    }

    #[tokio::test]
    async fn upload_failure_still_removes_downloaded_file() {
        let transport = MemoryTransport::new();
        transport.add_file("a", Some("x.bin"), 4, b"data");
        transport.fail_upload("x.bin", Failure::Error("upload refused".into()));
        let h = Harness::new(transport, RateLimitPolicy::Drop);

        let pool = h.start().await;
        h.submit("a", None, "");
        pool.shutdown().await;

        assert!(h.transport.uploads().is_empty());
        assert_eq!(
            h.transport.replies(),
            vec![(70, "Error: Transport error: upload refused".to_string())]
        );
        let mut leftovers = tokio::fs::read_dir(&h.config.download_dir).await.unwrap();
        assert!(leftovers.next_entry().await.unwrap().is_none());
    }

    /// Saves downloads next to the requested path instead of at it.
    struct Relocating(Arc<MemoryTransport>);

    #[async_trait::async_trait]
    impl Transport for Relocating {
        async fn resolve_file(&self, source: &SourceRef) -> Result<RemoteFile> {
            self.0.resolve_file(source).await
        }

        async fn download_to(
            &self,
            file: &RemoteFile,
            dest: &Path,
            progress: ProgressSink,
        ) -> Result<PathBuf> {
            self.0
                .download_to(file, &dest.with_extension("part"), progress)
                .await
        }

        async fn upload_from(&self, upload: Upload<'_>, progress: ProgressSink) -> Result<()> {
            self.0.upload_from(upload, progress).await
        }

        async fn create_status(&self, source: &SourceRef, text: &str) -> Result<StatusDisplay> {
            self.0.create_status(source, text).await
        }

        async fn update_status(&self, display: &StatusDisplay, text: &str) -> Result<()> {
            self.0.update_status(display, text).await
        }

        async fn reply(&self, chat_id: i64, text: &str) -> Result<()> {
            self.0.reply(chat_id, text).await
        }

        async fn reply_with_choices(
            &self,
            chat_id: i64,
            text: &str,
            choices: &[Choice],
        ) -> Result<()> {
            self.0.reply_with_choices(chat_id, text, choices).await
        }
    }

    #[tokio::test]
    async fn relocated_download_is_uploaded_and_removed() {
        let memory = MemoryTransport::new();
        memory.add_file("a", Some("orig.mkv"), 3, b"abc");
        let h = Harness::new(memory, RateLimitPolicy::Drop);
        let relocating = Arc::new(Relocating(Arc::clone(&h.transport)));

        let pool = WorkerPool::start(
            &h.config,
            Arc::clone(&h.queue),
            relocating,
            Arc::clone(&h.stats),
        )
        .await
        .unwrap();
        h.submit("a", None, "");
        pool.shutdown().await;

        let uploads = h.transport.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].content, b"abc");
        let mut leftovers = tokio::fs::read_dir(&h.config.download_dir).await.unwrap();
        assert!(leftovers.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn phase_changes_respect_edit_interval() {
        let transport = MemoryTransport::new();
        transport.add_file("a", None, 1, b"x");
        let mut h = Harness::new(transport, RateLimitPolicy::Drop);
        h.config.progress_interval_ms = 200;

        let pool = h.start().await;
        let started = std::time::Instant::now();
        h.submit("a", None, "");
        pool.shutdown().await;

        assert!(started.elapsed() >= Duration::from_millis(400));
        assert_eq!(
            h.transport.status_texts(),
            vec![DOWNLOADING, UPLOADING, COMPLETED]
        );
    }

    #[tokio::test]
    async fn retry_reuses_status_message() {
        let transport = MemoryTransport::new();
        transport.add_file("a", None, 1, b"x");
        transport.fail_upload(
            crate::job::FALLBACK_FILE_NAME,
            Failure::RateLimited(Duration::from_millis(5)),
        );
        let h = Harness::new(transport, RateLimitPolicy::RetryOnce);

        let pool = h.start().await;
        h.submit("a", None, "");
        pool.shutdown().await;

        assert_eq!(h.transport.uploads().len(), 1);
        assert_eq!(h.transport.status_messages_created(), 1);
        assert_eq!(
            h.transport.status_texts().last().map(String::as_str),
            Some(COMPLETED)
        );
    }
}
