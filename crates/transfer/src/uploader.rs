//! End-to-end driver: one call uploads one file.

use std::future::Future;
use std::path::Path;

use reelup_protocol::{FinishResult, UploadTarget};
use tokio::io::{AsyncRead, AsyncSeek};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::UploadError;
use crate::retry::RetryConfig;
use crate::session::{DEFAULT_STALL_LIMIT, UploadSession};
use crate::source::SourceFile;
use crate::transport::UploadTransport;
use crate::types::{ChunkResult, FinishMetadata, UploadEvent};

/// Runs complete upload sessions over a shared transport.
///
/// Each call to [`upload_file`](Self::upload_file) owns an independent
/// session, so one `Uploader` can serve many concurrent uploads.
pub struct Uploader<'a> {
    transport: &'a dyn UploadTransport,
    retry: RetryConfig,
    stall_limit: u32,
    cancel: CancellationToken,
    events_tx: Option<mpsc::Sender<UploadEvent>>,
}

impl<'a> Uploader<'a> {
    pub fn new(transport: &'a dyn UploadTransport) -> Self {
        Self {
            transport,
            retry: RetryConfig::default(),
            stall_limit: DEFAULT_STALL_LIMIT,
            cancel: CancellationToken::new(),
            events_tx: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stall_limit(mut self, limit: u32) -> Self {
        self.stall_limit = limit;
        self
    }

    /// Aborts in-flight and future calls once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Emits progress events on `events_tx`. Events are dropped if the
    /// channel is full.
    pub fn with_events(mut self, events_tx: mpsc::Sender<UploadEvent>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    /// Uploads the file at `path`, which must be exactly `size_bytes` long.
    ///
    /// The file is opened read-only and closed before this returns, on
    /// success and on failure alike. It is never modified or removed.
    pub async fn upload_file(
        &self,
        path: &Path,
        size_bytes: u64,
        caption: &str,
        target: &UploadTarget,
    ) -> Result<FinishResult, UploadError> {
        let source = match SourceFile::open(path, size_bytes).await {
            Ok(source) => source,
            Err(e) => {
                self.report_failure(&e);
                return Err(e);
            }
        };
        self.upload(source, FinishMetadata::new(caption), target)
            .await
    }

    /// Uploads an already opened source.
    pub async fn upload<R>(
        &self,
        mut source: SourceFile<R>,
        metadata: FinishMetadata,
        target: &UploadTarget,
    ) -> Result<FinishResult, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let mut session = UploadSession::new(self.transport, target, source.size())
            .with_stall_limit(self.stall_limit);

        let result = self.drive(&mut session, &mut source, &metadata).await;
        drop(source);

        match &result {
            Ok(finish) => {
                self.emit(UploadEvent::Completed {
                    session_id: session.session_id().to_string(),
                    resource_id: finish.resource_id(),
                });
            }
            Err(e) => {
                session.fail(e.to_string());
                error!(
                    session = %session.session_id(),
                    window = %session.window(),
                    phase = ?e.phase(),
                    raw_response = e.raw_response().unwrap_or(""),
                    error = %e,
                    "upload failed"
                );
                self.report_failure(e);
            }
        }
        result
    }

    async fn drive<R>(
        &self,
        session: &mut UploadSession<'_>,
        source: &mut SourceFile<R>,
        metadata: &FinishMetadata,
    ) -> Result<FinishResult, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let window = self.cancellable(session.start()).await?;
        self.emit(UploadEvent::Started {
            session_id: session.session_id().to_string(),
            total_size: session.total_size(),
            window,
        });

        while !session.is_transferred() {
            let chunk = self.transfer_with_retry(session, source).await?;
            self.emit(UploadEvent::ChunkAcknowledged {
                sent: chunk.sent,
                next: chunk.next,
                total_size: session.total_size(),
            });
        }

        self.emit(UploadEvent::Finishing {
            session_id: session.session_id().to_string(),
        });
        let result = self.cancellable(session.finish(metadata)).await?;
        info!(
            session = %session.session_id(),
            resource = result.resource_id().as_deref().unwrap_or("-"),
            "upload completed"
        );
        Ok(result)
    }

    /// One chunk, retrying transport failures with the unchanged window.
    async fn transfer_with_retry<R>(
        &self,
        session: &mut UploadSession<'_>,
        source: &mut SourceFile<R>,
    ) -> Result<ChunkResult, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let mut attempt: u32 = 1;
        loop {
            match self.cancellable(session.transfer_next(source)).await {
                Ok(chunk) => return Ok(chunk),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        session = %session.session_id(),
                        window = %session.window(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "chunk transfer failed, retrying"
                    );
                    self.emit(UploadEvent::Retrying {
                        window: session.window(),
                        attempt,
                        delay,
                        error: e.to_string(),
                    });

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Races `fut` against cancellation; a cancelled call is abandoned.
    async fn cancellable<T>(
        &self,
        fut: impl Future<Output = Result<T, UploadError>>,
    ) -> Result<T, UploadError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UploadError::Cancelled),
            result = fut => result,
        }
    }

    fn report_failure(&self, e: &UploadError) {
        self.emit(UploadEvent::Failed {
            error: e.to_string(),
        });
    }

    fn emit(&self, event: UploadEvent) {
        if let Some(tx) = &self.events_tx
            && let Err(e) = tx.try_send(event)
        {
            debug!("dropped upload event: {e}");
        }
    }
}

/// Uploads one file with default retry and stall settings.
pub async fn upload_file(
    transport: &dyn UploadTransport,
    path: &Path,
    size_bytes: u64,
    caption: &str,
    target: &UploadTarget,
) -> Result<FinishResult, UploadError> {
    Uploader::new(transport)
        .upload_file(path, size_bytes, caption, target)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::CallError;
    use crate::mock::{Call, MockServer, payload, target};
    use reelup_protocol::OffsetWindow;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
        }
    }

    fn write_temp(data: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        std::fs::write(&path, data).unwrap();
        (dir, path)
    }

    fn drain(mut rx: mpsc::Receiver<UploadEvent>) -> Vec<UploadEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn uploads_500_bytes_in_five_chunks() {
        let data = payload(500);
        let (_dir, path) = write_temp(&data);
        let server = MockServer::new(500, 100).with_finish(Ok(FinishResult(
            serde_json::json!({"success": true, "video_id": "777", "note": "kept"}),
        )));
        let target = target();

        let result = Uploader::new(&server)
            .upload_file(&path, 500, "Uploaded via bot", &target)
            .await
            .unwrap();

        assert_eq!(
            result.into_inner(),
            serde_json::json!({"success": true, "video_id": "777", "note": "kept"})
        );

        let calls = server.calls();
        assert_eq!(calls.len(), 7);
        assert_eq!(calls[0], Call::Start { file_size: 500 });
        let offsets: Vec<u64> = server.acknowledged().iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![0, 100, 200, 300, 400]);
        assert_eq!(
            calls[6],
            Call::Finish {
                session_id: "session-1".into(),
                description: "Uploaded via bot".into(),
            }
        );
        // File untouched.
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[tokio::test]
    async fn transient_failure_on_third_chunk_is_retried() {
        let data = payload(500);
        let server =
            MockServer::new(500, 100).fail_transfer(3, CallError::Transport("timed out".into()));
        let target = target();
        let (tx, rx) = mpsc::channel(64);

        Uploader::new(&server)
            .with_retry(fast_retry())
            .with_events(tx)
            .upload(SourceFile::from_bytes(data.clone()), FinishMetadata::new("c"), &target)
            .await
            .unwrap();

        assert_eq!(server.transfer_attempts(), 6);
        let acked = server.acknowledged();
        assert_eq!(acked.len(), 5);
        let wire: Vec<u8> = acked.into_iter().flat_map(|(_, d)| d).collect();
        assert_eq!(wire, data);

        // The retry re-sent the range of the failed attempt.
        let transfers: Vec<_> = server
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Transfer {
                    start_offset, data, ..
                } => Some((start_offset, data)),
                _ => None,
            })
            .collect();
        assert_eq!(transfers[2], transfers[3]);
        assert_eq!(transfers[2].0, 200);

        let events = drain(rx);
        let retries: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, UploadEvent::Retrying { .. }))
            .collect();
        assert_eq!(retries.len(), 1);
        assert!(matches!(
            retries[0],
            UploadEvent::Retrying { window, attempt: 1, .. } if *window == OffsetWindow::new(200, 300)
        ));
        let acks = events
            .iter()
            .filter(|e| matches!(e, UploadEvent::ChunkAcknowledged { .. }))
            .count();
        assert_eq!(acks, 5);
        assert!(matches!(events.last(), Some(UploadEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let mut server = MockServer::new(200, 100);
        for n in 1..=3 {
            server = server.fail_transfer(n, CallError::Transport("connection reset".into()));
        }
        let target = target();

        let err = Uploader::new(&server)
            .with_retry(fast_retry())
            .upload(SourceFile::from_bytes(payload(200)), FinishMetadata::new(""), &target)
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(server.transfer_attempts(), 3);
        assert!(!server.calls().iter().any(|c| matches!(c, Call::Finish { .. })));
    }

    #[tokio::test]
    async fn http_rejection_is_not_retried() {
        let server = MockServer::new(200, 100).fail_transfer(
            1,
            CallError::Status {
                status: 400,
                body: "bad".into(),
            },
        );
        let target = target();

        let err = Uploader::new(&server)
            .with_retry(fast_retry())
            .upload(SourceFile::from_bytes(payload(200)), FinishMetadata::new(""), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ChunkTransfer { .. }));
        assert_eq!(server.transfer_attempts(), 1);
    }

    #[tokio::test]
    async fn protocol_violation_is_not_retried() {
        let server = MockServer::new(300, 100).respond_transfer(2, 0, 100);
        let target = target();
        let err = Uploader::new(&server)
            .with_retry(fast_retry())
            .with_stall_limit(0)
            .upload(SourceFile::from_bytes(payload(300)), FinishMetadata::new(""), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ProtocolViolation { .. }));
        assert_eq!(server.transfer_attempts(), 2);
    }

    #[tokio::test]
    async fn empty_file_start_and_finish_only() {
        let (_dir, path) = write_temp(b"");
        let server = MockServer::new(0, 100);
        let target = target();

        upload_file(&server, &path, 0, "empty", &target)
            .await
            .unwrap();

        let calls = server.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], Call::Start { file_size: 0 }));
        assert!(matches!(calls[1], Call::Finish { .. }));
    }

    #[tokio::test]
    async fn size_mismatch_sends_nothing() {
        let (_dir, path) = write_temp(b"12345");
        let server = MockServer::new(5, 5);
        let target = target();
        let (tx, rx) = mpsc::channel(8);

        let err = Uploader::new(&server)
            .with_events(tx)
            .upload_file(&path, 6, "", &target)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::SizeMismatch { .. }));
        assert!(server.calls().is_empty());
        assert!(matches!(drain(rx).as_slice(), [UploadEvent::Failed { .. }]));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let server = MockServer::new(100, 10);
        let target = target();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Uploader::new(&server)
            .with_cancel(cancel)
            .upload(SourceFile::from_bytes(payload(100)), FinishMetadata::new(""), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
        assert!(server.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_during_backoff_stops_promptly() {
        let server =
            MockServer::new(200, 100).fail_transfer(1, CallError::Transport("timed out".into()));
        let target = target();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);

        let slow_retry = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
            backoff_factor: 1.0,
        };
        let uploader = Uploader::new(&server)
            .with_retry(slow_retry)
            .with_cancel(cancel.clone())
            .with_events(tx);

        let canceller = async {
            while let Some(e) = rx.recv().await {
                if matches!(e, UploadEvent::Retrying { .. }) {
                    cancel.cancel();
                }
            }
        };
        let upload = async move {
            let result = uploader
                .upload(SourceFile::from_bytes(payload(200)), FinishMetadata::new(""), &target)
                .await;
            // Closes the event channel so the canceller ends.
            drop(uploader);
            result
        };

        let (result, ()) = tokio::join!(upload, canceller);
        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert_eq!(server.transfer_attempts(), 1);
    }

    #[tokio::test]
    async fn finish_failure_surfaces_distinctly() {
        let server = MockServer::new(50, 50).with_finish(Err(CallError::Status {
            status: 500,
            body: "oops".into(),
        }));
        let target = target();
        let err = Uploader::new(&server)
            .upload(SourceFile::from_bytes(payload(50)), FinishMetadata::new(""), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::SessionFinish(_)));
        let finishes = server
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Finish { .. }))
            .count();
        assert_eq!(finishes, 1);
    }

    #[tokio::test]
    async fn concurrent_sessions_are_independent() {
        let server_a = MockServer::new(300, 100);
        let server_b = MockServer::new(250, 50);
        let target = target();
        let a = Uploader::new(&server_a);
        let b = Uploader::new(&server_b);

        let (ra, rb) = tokio::join!(
            a.upload(SourceFile::from_bytes(payload(300)), FinishMetadata::new("a"), &target),
            b.upload(SourceFile::from_bytes(payload(250)), FinishMetadata::new("b"), &target),
        );
        ra.unwrap();
        rb.unwrap();
        assert_eq!(server_a.acknowledged().len(), 3);
        assert_eq!(server_b.acknowledged().len(), 5);
    }
}
