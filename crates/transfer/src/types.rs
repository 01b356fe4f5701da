use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use reelup_protocol::OffsetWindow;

/// Lifecycle of an upload session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    NotStarted,
    Started,
    Transferring,
    Finishing,
    Completed,
    Failed(String),
}

impl SessionState {
    /// Returns `true` once the session can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::Started => f.write_str("started"),
            Self::Transferring => f.write_str("transferring"),
            Self::Finishing => f.write_str("finishing"),
            Self::Completed => f.write_str("completed"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Outcome of one acknowledged transfer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkResult {
    /// Range that was sent.
    pub sent: OffsetWindow,
    /// Window the server asks for next.
    pub next: OffsetWindow,
}

impl ChunkResult {
    pub fn start_offset(&self) -> u64 {
        self.next.start_offset
    }

    pub fn end_offset(&self) -> u64 {
        self.next.end_offset
    }
}

/// Caller metadata sent with the finish call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishMetadata {
    /// Sent as `description` (the caption).
    pub description: String,
    /// Additional form fields, sent verbatim.
    pub extra: BTreeMap<String, String>,
}

impl FinishMetadata {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// All form fields, `description` first.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![("description".to_string(), self.description.clone())];
        fields.extend(
            self.extra
                .iter()
                .filter(|(k, _)| k.as_str() != "description")
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        fields
    }
}

/// Coarse progress notifications emitted by the uploader.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Started {
        session_id: String,
        total_size: u64,
        window: OffsetWindow,
    },
    ChunkAcknowledged {
        sent: OffsetWindow,
        next: OffsetWindow,
        total_size: u64,
    },
    Retrying {
        window: OffsetWindow,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Finishing {
        session_id: String,
    },
    Completed {
        session_id: String,
        resource_id: Option<String>,
    },
    Failed {
        error: String,
    },
}

impl UploadEvent {
    /// Fraction of the file acknowledged by the server (0.0–1.0), if known.
    pub fn progress(&self) -> Option<f64> {
        match self {
            Self::Started { total_size: 0, .. } => Some(0.0),
            Self::Started {
                total_size, window, ..
            } => Some(fraction(window.start_offset, *total_size)),
            Self::ChunkAcknowledged {
                next, total_size, ..
            } => Some(fraction(next.start_offset, *total_size)),
            Self::Completed { .. } => Some(1.0),
            _ => None,
        }
    }
}

fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 1.0;
    }
    (done.min(total) as f64) / (total as f64)
}
