//! Inbound event routing.
//!
//! Turns what submitters send (commands, files, button presses, text) into
//! admission checks, session steps and operator queries, and sends the
//! matching replies.

use crate::admission::{Admission, AdmissionPolicy};
use crate::config::Config;
use crate::error::Result;
use crate::job::{SourceRef, SubmitterId};
use crate::queue::JobQueue;
use crate::session::{SessionManager, SessionReply};
use crate::stats::TransferStats;
use crate::transport::{Choice, ProgressSink, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What an inbound event carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `/start`
    Start,
    /// `/admin`
    Admin,
    /// `/setthumb` with a photo attached.
    SetThumbnail { file_id: String },
    /// A document, video or audio message.
    Media {
        file_id: String,
        name: Option<String>,
        size: u64,
    },
    /// A button press with its callback payload.
    Callback { data: String },
    /// `/skipcaption`
    SkipCaption,
    /// Any other text.
    Text(String),
}

/// One inbound event together with who sent it and where.
#[derive(Debug, Clone)]
pub struct Event {
    pub submitter: SubmitterId,
    pub chat_id: i64,
    pub message_id: i64,
    pub inbound: Inbound,
}

impl Event {
    fn source(&self, file_id: &str) -> SourceRef {
        SourceRef {
            chat_id: self.chat_id,
            message_id: self.message_id,
            file_id: file_id.to_string(),
        }
    }
}

/// Queue depth and worker count, as shown on the admin panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub queue_depth: usize,
    pub workers: usize,
}

pub struct Bot {
    transport: Arc<dyn Transport>,
    sessions: SessionManager,
    queue: Arc<JobQueue>,
    stats: Arc<TransferStats>,
    admission: AdmissionPolicy,
    admin_id: Option<SubmitterId>,
    thumbnail_path: PathBuf,
    workers: usize,
}

impl Bot {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        queue: Arc<JobQueue>,
        stats: Arc<TransferStats>,
    ) -> Self {
        Self {
            transport,
            sessions: SessionManager::from_config(Arc::clone(&queue), config),
            queue,
            stats,
            admission: AdmissionPolicy::from_config(config),
            admin_id: config.admin_id.map(SubmitterId),
            thumbnail_path: config.thumbnail_path.clone(),
            workers: config.workers,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn pool_status(&self) -> PoolStatus {
        PoolStatus {
            queue_depth: self.queue.len(),
            workers: self.workers,
        }
    }

    fn is_admin(&self, submitter: SubmitterId) -> bool {
        self.admin_id == Some(submitter)
    }

    /// Routes one event.
    ///
    /// # Errors
    /// * If a reply cannot be sent
    /// * If the job queue has been closed
    /// * If saving a thumbnail fails
    #[instrument(skip_all, fields(submitter = %event.submitter))]
    pub async fn handle(&self, event: Event) -> Result<()> {
        let submitter = event.submitter;
        let chat = event.chat_id;

        match &event.inbound {
            Inbound::Start => {
                let text = format!("Send file {}", self.admission.range_label());
                self.transport.reply(chat, &text).await
            }
            Inbound::Admin => {
                if !self.is_admin(submitter) {
                    debug!("admin command from non-admin ignored");
                    return Ok(());
                }
                let text = self.admin_panel();
                self.transport.reply(chat, &text).await
            }
            Inbound::SetThumbnail { file_id } => {
                if !self.is_admin(submitter) {
                    debug!("thumbnail upload from non-admin ignored");
                    return Ok(());
                }
                self.save_thumbnail(&event.source(file_id)).await?;
                self.transport.reply(chat, "Thumbnail Saved").await
            }
            Inbound::Media { file_id, size, name } => {
                if let Admission::Rejected(message) = self.admission.check(*size) {
                    debug!(size, "file rejected");
                    return self.transport.reply(chat, &message).await;
                }
                debug!(size, name = ?name, "file admitted");
                let reply = self.sessions.open(submitter, event.source(file_id)).await;
                self.transport
                    .reply_with_choices(chat, reply.text(), &[Choice::Rename, Choice::Skip])
                    .await
            }
            Inbound::Callback { data } => {
                let Some(choice) = Choice::from_data(data) else {
                    debug!(data, "unknown callback ignored");
                    return Ok(());
                };
                let reply = self.sessions.choose(submitter, choice).await?;
                self.send(chat, reply).await
            }
            Inbound::SkipCaption => {
                let reply = self.sessions.skip_caption(submitter).await?;
                self.send(chat, reply).await
            }
            Inbound::Text(text) => {
                let reply = self.sessions.text(submitter, text).await?;
                self.send(chat, reply).await
            }
        }
    }

    async fn send(&self, chat: i64, reply: Option<SessionReply>) -> Result<()> {
        match reply {
            Some(reply) => self.transport.reply(chat, reply.text()).await,
            None => Ok(()),
        }
    }

    fn admin_panel(&self) -> String {
        let status = self.pool_status();
        format!(
            "Admin Panel\nQueue Size: {}\nWorkers: {}\n{}",
            status.queue_depth,
            status.workers,
            self.stats.snapshot().summary()
        )
    }

    async fn save_thumbnail(&self, source: &SourceRef) -> Result<()> {
        if let Some(parent) = self.thumbnail_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = self.transport.resolve_file(source).await?;
        self.transport
            .download_to(&file, &self.thumbnail_path, ProgressSink::disabled())
            .await?;
        info!(path = %self.thumbnail_path.display(), "thumbnail saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::GIB;
    use crate::session::Stage;
    use crate::transport::MemoryTransport;

    const ADMIN: SubmitterId = SubmitterId(1);
    const USER: SubmitterId = SubmitterId(2);

    struct Fixture {
        _dir: tempfile::TempDir,
        bot: Bot,
        queue: Arc<JobQueue>,
        transport: Arc<MemoryTransport>,
        thumbnail: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let thumbnail = dir.path().join("thumbs").join("thumbnail.jpg");
        let config = Config {
            admin_id: Some(ADMIN.0),
            thumbnail_path: thumbnail.clone(),
            ..Config::default()
        };
        let queue = Arc::new(JobQueue::new());
        let transport = Arc::new(MemoryTransport::new());
        let bot = Bot::new(
            &config,
            transport.clone(),
            Arc::clone(&queue),
            Arc::new(TransferStats::new()),
        );
        Fixture {
            _dir: dir,
            bot,
            queue,
            transport,
            thumbnail,
        }
    }

    fn event(submitter: SubmitterId, inbound: Inbound) -> Event {
        Event {
            submitter,
            chat_id: submitter.0 as i64 * 100,
            message_id: 5,
            inbound,
        }
    }

    fn media(size: u64) -> Inbound {
        Inbound::Media {
            file_id: "f1".into(),
            name: Some("movie.mkv".into()),
            size,
        }
    }

    #[tokio::test]
    async fn start_lists_size_window() {
        let f = fixture();
        f.bot.handle(event(USER, Inbound::Start)).await.unwrap();
        assert_eq!(f.transport.replies(), vec![(200, "Send file 1GB–4GB".to_string())]);
    }

    #[tokio::test]
    async fn ineligible_file_is_rejected_without_session() {
        let f = fixture();
        f.bot.handle(event(USER, media(GIB - 1))).await.unwrap();
        f.bot.handle(event(USER, media(5 * GIB))).await.unwrap();

        assert_eq!(f.transport.replies().len(), 2);
        assert!(f.transport.replies().iter().all(|(_, t)| t == "File must be 1GB–4GB"));
        assert!(f.transport.choices().is_empty());
        assert!(f.bot.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn full_rename_and_caption_flow() {
        let f = fixture();
        f.bot.handle(event(USER, media(2 * GIB))).await.unwrap();
        let choices = f.transport.choices();
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0].1, "Choose option");
        assert_eq!(choices[0].2, vec![Choice::Rename, Choice::Skip]);

        let steps = [
            Inbound::Callback { data: "rename".into() },
            Inbound::Text("renamed.mkv".into()),
            Inbound::Text("a caption".into()),
        ];
        for step in steps {
            f.bot.handle(event(USER, step)).await.unwrap();
        }

        let replies: Vec<_> = f.transport.replies().into_iter().map(|(_, t)| t).collect();
        assert_eq!(
            replies,
            vec![
                "Send new file name",
                "Send caption or type /skipcaption",
                "Added to Queue"
            ]
        );

        let job = f.queue.dequeue().await.unwrap();
        assert_eq!(job.rename_to(), Some("renamed.mkv"));
        assert_eq!(job.caption(), "a caption");
        assert_eq!(job.source().chat_id, 200);
        assert_eq!(job.source().file_id, "f1");
    }

    #[tokio::test]
    async fn stray_text_gets_no_reply() {
        let f = fixture();
        f.bot
            .handle(event(USER, Inbound::Text("hello?".into())))
            .await
            .unwrap();
        f.bot.handle(event(USER, Inbound::SkipCaption)).await.unwrap();
        f.bot
            .handle(event(USER, Inbound::Callback { data: "bogus".into() }))
            .await
            .unwrap();

        assert!(f.transport.replies().is_empty());
        assert_eq!(f.bot.sessions().stage(USER).await, None);
    }

    #[tokio::test]
    async fn admin_panel_only_for_admin() {
        let f = fixture();
        f.bot.handle(event(USER, Inbound::Admin)).await.unwrap();
        assert!(f.transport.replies().is_empty());

        f.bot.handle(event(USER, media(GIB))).await.unwrap();
        f.bot
            .handle(event(USER, Inbound::Callback { data: "skip".into() }))
            .await
            .unwrap();
        f.bot.handle(event(ADMIN, Inbound::Admin)).await.unwrap();

        let replies = f.transport.replies();
        let (chat, panel) = replies.last().unwrap();
        assert_eq!(*chat, 100);
        assert!(panel.starts_with("Admin Panel\nQueue Size: 1\nWorkers: 3\n"));
        assert_eq!(
            f.bot.pool_status(),
            PoolStatus {
                queue_depth: 1,
                workers: 3
            }
        );
    }

    #[tokio::test]
    async fn admin_can_set_thumbnail() {
        let f = fixture();
        f.transport.add_file("photo", Some("p.jpg"), 3, b"jpg");

        let set = Inbound::SetThumbnail {
            file_id: "photo".into(),
        };
        f.bot.handle(event(USER, set.clone())).await.unwrap();
        assert!(!f.thumbnail.exists());

        f.bot.handle(event(ADMIN, set)).await.unwrap();
        assert_eq!(tokio::fs::read(&f.thumbnail).await.unwrap(), b"jpg");
        assert_eq!(
            f.transport.replies(),
            vec![(100, "Thumbnail Saved".to_string())]
        );
    }

    #[tokio::test]
    async fn resubmission_restarts_session() {
        let f = fixture();
        f.bot.handle(event(USER, media(GIB))).await.unwrap();
        f.bot
            .handle(event(USER, Inbound::Callback { data: "rename".into() }))
            .await
            .unwrap();
        f.bot.handle(event(USER, media(GIB))).await.unwrap();
        assert_eq!(f.bot.sessions().stage(USER).await, Some(Stage::Collected));
    }
}
