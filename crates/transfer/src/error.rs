//! Upload error types.

use reelup_protocol::{OffsetWindow, UploadPhase};

use crate::types::SessionState;

/// Failure of a single call to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The request never produced a response: timeout, connection reset, DNS.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response ({reason}): {body}")]
    Malformed { reason: String, body: String },
}

impl CallError {
    /// Returns `true` for failures worth retrying with the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Raw response body, when the server answered at all.
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            Self::Transport(_) => None,
            Self::Status { body, .. } | Self::Malformed { body, .. } => Some(body),
        }
    }
}

/// Errors produced while driving an upload session.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("session start failed: {0}")]
    SessionStart(#[source] CallError),

    #[error("chunk transfer failed for window {window}: {error}")]
    ChunkTransfer {
        window: OffsetWindow,
        #[source]
        error: CallError,
    },

    /// The finish call failed after every byte was acknowledged. The remote
    /// side may or may not have committed the upload.
    #[error("session finish failed, remote outcome unknown: {0}")]
    SessionFinish(#[source] CallError),

    #[error("protocol violation during {phase}: {reason}")]
    ProtocolViolation { phase: UploadPhase, reason: String },

    #[error("declared size {declared} does not match source size {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// Protocol phase the error belongs to, if any.
    pub fn phase(&self) -> Option<UploadPhase> {
        match self {
            Self::SessionStart(_) => Some(UploadPhase::Start),
            Self::ChunkTransfer { .. } => Some(UploadPhase::Transfer),
            Self::SessionFinish(_) => Some(UploadPhase::Finish),
            Self::ProtocolViolation { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Transport-level chunk failures, retried automatically with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChunkTransfer { error, .. } if error.is_transient())
    }

    /// Raw server response attached to the failure, for diagnostics.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Self::SessionStart(e) | Self::SessionFinish(e) => e.raw_body(),
            Self::ChunkTransfer { error, .. } => error.raw_body(),
            _ => None,
        }
    }
}
