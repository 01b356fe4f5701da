//! State machine for one resumable upload.

use reelup_protocol::{FinishResult, OffsetWindow, UploadPhase, UploadTarget};
use tokio::io::{AsyncRead, AsyncSeek};
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::source::SourceFile;
use crate::transport::{TransferRequest, UploadTransport};
use crate::types::{ChunkResult, FinishMetadata, SessionState};

/// Consecutive responses that may repeat the same window before the
/// session is declared stuck.
pub const DEFAULT_STALL_LIMIT: u32 = 3;

/// Drives one file through `start → transfer* → finish`.
///
/// The window only ever takes values returned by the server; the session
/// never advances it by the number of bytes it sent. Calls are strictly
/// sequential because every call depends on the previous response.
pub struct UploadSession<'a> {
    transport: &'a dyn UploadTransport,
    target: &'a UploadTarget,
    total_size: u64,
    session_id: String,
    upload_url: String,
    window: OffsetWindow,
    state: SessionState,
    stall_limit: u32,
    stalled: u32,
    acknowledged: u32,
}

impl<'a> UploadSession<'a> {
    /// Creates a session for `total_size` bytes. Nothing is sent until
    /// [`start`](Self::start).
    pub fn new(
        transport: &'a dyn UploadTransport,
        target: &'a UploadTarget,
        total_size: u64,
    ) -> Self {
        Self {
            transport,
            target,
            total_size,
            session_id: String::new(),
            upload_url: String::new(),
            window: OffsetWindow::new(0, 0),
            state: SessionState::NotStarted,
            stall_limit: DEFAULT_STALL_LIMIT,
            stalled: 0,
            acknowledged: 0,
        }
    }

    /// Overrides how many repeated windows are tolerated.
    pub fn with_stall_limit(mut self, limit: u32) -> Self {
        self.stall_limit = limit;
        self
    }

    /// Opens the remote session and records the initial window.
    pub async fn start(&mut self) -> Result<OffsetWindow, UploadError> {
        self.expect_state("start", |s| matches!(s, SessionState::NotStarted))?;

        let resp = match self.transport.start(self.target, self.total_size).await {
            Ok(resp) => resp,
            Err(e) => {
                self.fail(e.to_string());
                return Err(UploadError::SessionStart(e));
            }
        };

        let window = resp.window();
        if let Err(reason) = window.check_bounds(self.total_size) {
            return Err(self.violation(UploadPhase::Start, reason));
        }

        self.session_id = resp.upload_session_id;
        self.upload_url = resp.upload_url;
        self.window = window;
        self.state = SessionState::Started;

        info!(
            session = %self.session_id,
            total_size = self.total_size,
            window = %window,
            "upload session started"
        );
        Ok(window)
    }

    /// Sends the bytes of the current window and adopts the server's next window.
    ///
    /// On a failed call the window is left untouched, so calling this again
    /// re-sends exactly the same range.
    pub async fn transfer_next<R>(
        &mut self,
        source: &mut SourceFile<R>,
    ) -> Result<ChunkResult, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        self.expect_state("transfer", |s| {
            matches!(s, SessionState::Started | SessionState::Transferring)
        })?;
        if self.is_transferred() {
            return Err(UploadError::InvalidState {
                operation: "transfer past the end of the file",
                state: self.state.clone(),
            });
        }
        if source.size() != self.total_size {
            return Err(UploadError::SizeMismatch {
                declared: self.total_size,
                actual: source.size(),
            });
        }

        let sent = self.window;
        let chunk = match source.read_range(sent).await {
            Ok(chunk) => chunk,
            Err(e) => {
                self.fail(e.to_string());
                return Err(e);
            }
        };
        self.state = SessionState::Transferring;

        let request = TransferRequest {
            session_id: &self.session_id,
            upload_url: &self.upload_url,
            start_offset: sent.start_offset,
            chunk,
        };
        let resp = self
            .transport
            .transfer(self.target, request)
            .await
            .map_err(|error| UploadError::ChunkTransfer {
                window: sent,
                error,
            })?;

        let next = resp.window();
        self.check_next_window(sent, next)?;
        self.window = next;
        self.acknowledged += 1;

        debug!(
            session = %self.session_id,
            sent = %sent,
            next = %next,
            total_size = self.total_size,
            "chunk acknowledged"
        );
        Ok(ChunkResult { sent, next })
    }

    /// Commits the upload. Allowed once, after the whole file was acknowledged.
    pub async fn finish(&mut self, metadata: &FinishMetadata) -> Result<FinishResult, UploadError> {
        self.expect_state("finish", |s| {
            matches!(s, SessionState::Started | SessionState::Transferring)
        })?;
        if !self.is_transferred() {
            return Err(UploadError::InvalidState {
                operation: "finish before the file is fully transferred",
                state: self.state.clone(),
            });
        }

        self.state = SessionState::Finishing;
        match self
            .transport
            .finish(self.target, &self.session_id, metadata)
            .await
        {
            Ok(result) => {
                self.state = SessionState::Completed;
                info!(
                    session = %self.session_id,
                    chunks = self.acknowledged,
                    "upload session finished"
                );
                Ok(result)
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(UploadError::SessionFinish(e))
            }
        }
    }

    /// Marks the session as failed. Terminal states are kept.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed(reason.into());
        }
    }

    /// Returns `true` once the server asks for nothing below the file size.
    pub fn is_transferred(&self) -> bool {
        self.window.is_complete(self.total_size)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current window `[start_offset, end_offset)`.
    pub fn window(&self) -> OffsetWindow {
        self.window
    }

    /// Remote session id (empty before start).
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of transfer calls the server acknowledged.
    pub fn acknowledged_chunks(&self) -> u32 {
        self.acknowledged
    }

    fn check_next_window(
        &mut self,
        sent: OffsetWindow,
        next: OffsetWindow,
    ) -> Result<(), UploadError> {
        if let Err(reason) = next.check_bounds(self.total_size) {
            return Err(self.violation(UploadPhase::Transfer, reason));
        }
        if next.start_offset < sent.start_offset {
            return Err(self.violation(
                UploadPhase::Transfer,
                format!(
                    "start_offset moved backwards from {} to {}",
                    sent.start_offset, next.start_offset
                ),
            ));
        }
        if next.start_offset > sent.end_offset {
            return Err(self.violation(
                UploadPhase::Transfer,
                format!(
                    "start_offset {} skips bytes never sent (last sent up to {})",
                    next.start_offset, sent.end_offset
                ),
            ));
        }

        if next.start_offset == sent.start_offset {
            self.stalled += 1;
            warn!(
                session = %self.session_id,
                window = %next,
                stalled = self.stalled,
                "server repeated the previous window"
            );
            if self.stalled > self.stall_limit {
                return Err(self.violation(
                    UploadPhase::Transfer,
                    format!(
                        "offset stuck at {} after {} responses",
                        next.start_offset, self.stalled
                    ),
                ));
            }
        } else {
            self.stalled = 0;
        }
        Ok(())
    }

    fn violation(&mut self, phase: UploadPhase, reason: String) -> UploadError {
        self.fail(reason.clone());
        UploadError::ProtocolViolation { phase, reason }
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: impl Fn(&SessionState) -> bool,
    ) -> Result<(), UploadError> {
        if allowed(&self.state) {
            Ok(())
        } else {
            Err(UploadError::InvalidState {
                operation,
                state: self.state.clone(),
            })
        }
    }
}
