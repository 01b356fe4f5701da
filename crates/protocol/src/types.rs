use std::fmt;

use serde::{Deserialize, Serialize};

/// Remote destination of an upload: endpoint, page and credential.
///
/// Immutable for the lifetime of a session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub base_url: String,
    pub container_id: String,
    pub access_token: String,
}

impl UploadTarget {
    pub fn new(
        base_url: impl Into<String>,
        container_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            container_id: container_id.into(),
            access_token: access_token.into(),
        }
    }

    /// URL used by the `start` and `finish` phases.
    pub fn videos_url(&self) -> String {
        format!(
            "{}/{}/videos",
            self.base_url.trim_end_matches('/'),
            self.container_id
        )
    }
}

// The access token never ends up in logs.
impl fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTarget")
            .field("base_url", &self.base_url)
            .field("container_id", &self.container_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Phase of the upload protocol, sent as `upload_phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPhase {
    Start,
    Transfer,
    Finish,
}

impl UploadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Transfer => "transfer",
            Self::Finish => "finish",
        }
    }
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open byte range `[start_offset, end_offset)` the server expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetWindow {
    pub start_offset: u64,
    pub end_offset: u64,
}

impl OffsetWindow {
    pub fn new(start_offset: u64, end_offset: u64) -> Self {
        Self {
            start_offset,
            end_offset,
        }
    }

    /// Width of the window in bytes (0 for inverted windows).
    pub fn len(&self) -> u64 {
        self.end_offset.saturating_sub(self.start_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once the server asks for nothing below `total_size`.
    pub fn is_complete(&self, total_size: u64) -> bool {
        self.start_offset >= total_size
    }

    /// Checks `start_offset <= end_offset <= total_size`.
    ///
    /// Returns a human-readable reason when the window is inconsistent.
    pub fn check_bounds(&self, total_size: u64) -> Result<(), String> {
        if self.end_offset < self.start_offset {
            return Err(format!(
                "end_offset {} precedes start_offset {}",
                self.end_offset, self.start_offset
            ));
        }
        if self.end_offset > total_size {
            return Err(format!(
                "end_offset {} exceeds file size {}",
                self.end_offset, total_size
            ));
        }
        Ok(())
    }
}

impl fmt::Display for OffsetWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_offset, self.end_offset)
    }
}
