use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Name used when neither a rename nor the source's own name is available.
pub const FALLBACK_FILE_NAME: &str = "file.bin";

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of whoever sent an inbound event. Sessions are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubmitterId(pub u64);

impl fmt::Display for SubmitterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-unique job number, also used to keep local filenames apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl JobId {
    fn next() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to the remote message carrying the payload.
///
/// `file_id` is only interpreted by the transport. Replies and the
/// re-upload go back to `chat_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub chat_id: i64,
    pub message_id: i64,
    pub file_id: String,
}

/// The unit of work handed from a completed session to the worker pool.
#[derive(Debug, Clone)]
pub struct TransferJob {
    id: JobId,
    submitter: SubmitterId,
    source: SourceRef,
    rename_to: Option<String>,
    caption: String,
    enqueued_at: DateTime<Utc>,
}

impl TransferJob {
    pub fn new(
        submitter: SubmitterId,
        source: SourceRef,
        rename_to: Option<String>,
        caption: impl Into<String>,
    ) -> Self {
        Self {
            id: JobId::next(),
            submitter,
            source,
            rename_to,
            caption: caption.into(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn submitter(&self) -> SubmitterId {
        self.submitter
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn rename_to(&self) -> Option<&str> {
        self.rename_to.as_deref()
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Name the payload is uploaded under: the rename if one was given,
    /// else the source's own name, else [`FALLBACK_FILE_NAME`].
    pub fn final_name(&self, source_name: Option<&str>) -> String {
        self.rename_to
            .as_deref()
            .and_then(sanitize_file_name)
            .or_else(|| source_name.and_then(sanitize_file_name))
            .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
    }

    /// Name of the temporary file inside the download directory. Prefixed
    /// with the job id so concurrent jobs never share a path.
    pub fn local_file_name(&self, final_name: &str) -> String {
        format!("{}_{}", self.id, final_name)
    }
}

/// Strips anything that could move the file out of its directory.
/// Returns `None` when nothing usable is left.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => None,
        _ => Some(cleaned),
    }
}
