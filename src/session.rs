//! Per-submitter collection of a job's parameters.
//!
//! After an eligible file arrives the submitter picks rename or skip. A
//! rename is followed by the new name and then a caption (or an explicit
//! skip). Whichever input completes the sequence pushes exactly one
//! [`TransferJob`] onto the queue and forgets the session.

use crate::config::Config;
use crate::error::Result;
use crate::job::{JobId, SourceRef, SubmitterId, TransferJob};
use crate::queue::JobQueue;
use crate::transport::Choice;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Where a live session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// File accepted, waiting for rename-or-skip.
    Collected,
    /// Next free text is the new file name.
    AwaitingRename,
    /// Next free text is the caption, or the submitter skips it.
    AwaitingCaption,
}

/// What to tell the submitter after a session step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReply {
    ChooseOption,
    SendNewName,
    SendCaption,
    Queued(JobId),
}

impl SessionReply {
    pub fn text(&self) -> &'static str {
        match self {
            SessionReply::ChooseOption => "Choose option",
            SessionReply::SendNewName => "Send new file name",
            SessionReply::SendCaption => "Send caption or type /skipcaption",
            SessionReply::Queued(_) => "Added to Queue",
        }
    }
}

#[derive(Debug)]
struct Session {
    source: SourceRef,
    stage: Stage,
    rename_to: Option<String>,
    touched: Instant,
}

/// Table of live sessions, one per submitter.
///
/// Abandoned sessions expire after `ttl`; when the table is full the least
/// recently touched session is evicted to make room.
#[derive(Debug)]
pub struct SessionManager {
    sessions: Mutex<HashMap<SubmitterId, Session>>,
    queue: Arc<JobQueue>,
    ttl: Duration,
    capacity: usize,
}

impl SessionManager {
    pub fn new(queue: Arc<JobQueue>, ttl: Duration, capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            queue,
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(queue: Arc<JobQueue>, config: &Config) -> Self {
        Self::new(queue, config.session_ttl(), config.max_sessions)
    }

    /// Starts a session for an already-admitted file, replacing any
    /// unfinished one from the same submitter.
    #[instrument(skip(self, source), fields(message = source.message_id))]
    pub async fn open(&self, submitter: SubmitterId, source: SourceRef) -> SessionReply {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        sessions.retain(|_, s| now.duration_since(s.touched) < self.ttl);

        if !sessions.contains_key(&submitter) && sessions.len() >= self.capacity {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, s)| s.touched)
                .map(|(id, _)| *id);
            if let Some(id) = oldest {
                debug!(evicted = %id, "session table full");
                sessions.remove(&id);
            }
        }

        let replaced = sessions.insert(
            submitter,
            Session {
                source,
                stage: Stage::Collected,
                rename_to: None,
                touched: now,
            },
        );
        if replaced.is_some() {
            debug!("replaced unfinished session");
        }
        SessionReply::ChooseOption
    }

    /// Handles the rename-or-skip button. Ignored unless the session is
    /// waiting for exactly that choice.
    #[instrument(skip(self))]
    pub async fn choose(
        &self,
        submitter: SubmitterId,
        choice: Choice,
    ) -> Result<Option<SessionReply>> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = self.live(&mut sessions, submitter, Stage::Collected) else {
            return Ok(None);
        };

        match choice {
            Choice::Rename => {
                session.stage = Stage::AwaitingRename;
                session.touched = Instant::now();
                Ok(Some(SessionReply::SendNewName))
            }
            Choice::Skip => self.emit(&mut sessions, submitter, None).map(Some),
        }
    }

    /// Handles free text: the new name, then the caption. Text nobody is
    /// waiting for is ignored.
    #[instrument(skip(self, text))]
    pub async fn text(&self, submitter: SubmitterId, text: &str) -> Result<Option<SessionReply>> {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        let Some(session) = sessions
            .get_mut(&submitter)
            .filter(|s| now.duration_since(s.touched) < self.ttl)
        else {
            return Ok(None);
        };

        match session.stage {
            Stage::AwaitingRename => {
                session.rename_to = Some(text.to_string());
                session.stage = Stage::AwaitingCaption;
                session.touched = now;
                Ok(Some(SessionReply::SendCaption))
            }
            Stage::AwaitingCaption => self.emit(&mut sessions, submitter, Some(text)).map(Some),
            Stage::Collected => Ok(None),
        }
    }

    /// Handles the explicit skip-caption signal.
    #[instrument(skip(self))]
    pub async fn skip_caption(&self, submitter: SubmitterId) -> Result<Option<SessionReply>> {
        let mut sessions = self.sessions.lock().await;
        if self
            .live(&mut sessions, submitter, Stage::AwaitingCaption)
            .is_none()
        {
            return Ok(None);
        }
        self.emit(&mut sessions, submitter, None).map(Some)
    }

    /// Current stage of a submitter's session, if one is live.
    pub async fn stage(&self, submitter: SubmitterId) -> Option<Stage> {
        let sessions = self.sessions.lock().await;
        let now = Instant::now();
        sessions
            .get(&submitter)
            .filter(|s| now.duration_since(s.touched) < self.ttl)
            .map(|s| s.stage)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn live<'a>(
        &self,
        sessions: &'a mut HashMap<SubmitterId, Session>,
        submitter: SubmitterId,
        stage: Stage,
    ) -> Option<&'a mut Session> {
        let now = Instant::now();
        sessions
            .get_mut(&submitter)
            .filter(|s| s.stage == stage && now.duration_since(s.touched) < self.ttl)
    }

    /// Removes the session and queues its job.
    fn emit(
        &self,
        sessions: &mut HashMap<SubmitterId, Session>,
        submitter: SubmitterId,
        caption: Option<&str>,
    ) -> Result<SessionReply> {
        let Some(session) = sessions.remove(&submitter) else {
            return Err("session vanished while emitting".into());
        };
        let job = TransferJob::new(
            submitter,
            session.source,
            session.rename_to,
            caption.unwrap_or_default(),
        );
        let id = job.id();
        self.queue.enqueue(job)?;
        info!(job = %id, submitter = %submitter, "job queued");
        Ok(SessionReply::Queued(id))
    }
}
