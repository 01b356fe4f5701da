//! Scripted in-process server used by the session and uploader tests.

use std::collections::HashMap;
use std::sync::Mutex;

use reelup_protocol::{FinishResult, StartResponse, TransferResponse, UploadTarget};

use crate::error::CallError;
use crate::transport::{TransferRequest, TransportFuture, UploadTransport};
use crate::types::FinishMetadata;

/// A call observed by the mock server.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Start {
        file_size: u64,
    },
    Transfer {
        session_id: String,
        start_offset: u64,
        data: Vec<u8>,
        ok: bool,
    },
    Finish {
        session_id: String,
        description: String,
    },
}

/// Serves fixed-width windows of `chunk` bytes over a file of `total` bytes.
///
/// Individual transfer attempts (1-based) can be scripted to fail or to
/// answer with a specific window.
pub(crate) struct MockServer {
    chunk: u64,
    total: u64,
    calls: Mutex<Vec<Call>>,
    start_response: Option<Result<StartResponse, CallError>>,
    finish_response: Result<FinishResult, CallError>,
    faults: Mutex<HashMap<usize, CallError>>,
    overrides: Mutex<HashMap<usize, TransferResponse>>,
}

impl MockServer {
    pub(crate) fn new(total: u64, chunk: u64) -> Self {
        Self {
            chunk,
            total,
            calls: Mutex::new(Vec::new()),
            start_response: None,
            finish_response: Ok(FinishResult(serde_json::json!({
                "success": true,
                "video_id": "v-1",
            }))),
            faults: Mutex::new(HashMap::new()),
            overrides: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn with_start(mut self, response: Result<StartResponse, CallError>) -> Self {
        self.start_response = Some(response);
        self
    }

    pub(crate) fn with_finish(mut self, response: Result<FinishResult, CallError>) -> Self {
        self.finish_response = response;
        self
    }

    /// Makes transfer attempt `n` fail with `error`.
    pub(crate) fn fail_transfer(self, n: usize, error: CallError) -> Self {
        self.faults.lock().unwrap().insert(n, error);
        self
    }

    /// Makes transfer attempt `n` answer with the given window.
    pub(crate) fn respond_transfer(self, n: usize, start: u64, end: u64) -> Self {
        self.overrides.lock().unwrap().insert(
            n,
            TransferResponse {
                start_offset: start,
                end_offset: end,
            },
        );
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Successful transfer calls as `(start_offset, data)`.
    pub(crate) fn acknowledged(&self) -> Vec<(u64, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Transfer {
                    start_offset,
                    data,
                    ok: true,
                    ..
                } => Some((start_offset, data)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn transfer_attempts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Transfer { .. }))
            .count()
    }

    fn window_from(&self, start: u64) -> TransferResponse {
        TransferResponse {
            start_offset: start,
            end_offset: (start + self.chunk).min(self.total),
        }
    }
}

impl UploadTransport for MockServer {
    fn start<'a>(
        &'a self,
        _target: &'a UploadTarget,
        file_size: u64,
    ) -> TransportFuture<'a, StartResponse> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Call::Start { file_size });
            match &self.start_response {
                Some(resp) => resp.clone(),
                None => {
                    let first = self.window_from(0);
                    Ok(StartResponse {
                        upload_session_id: "session-1".into(),
                        upload_url: "https://upload.test/session-1".into(),
                        start_offset: first.start_offset,
                        end_offset: first.end_offset,
                    })
                }
            }
        })
    }

    fn transfer<'a>(
        &'a self,
        _target: &'a UploadTarget,
        request: TransferRequest<'a>,
    ) -> TransportFuture<'a, TransferResponse> {
        Box::pin(async move {
            let attempt = self.transfer_attempts() + 1;
            let fault = self.faults.lock().unwrap().remove(&attempt);
            let len = request.chunk.len() as u64;
            self.calls.lock().unwrap().push(Call::Transfer {
                session_id: request.session_id.to_string(),
                start_offset: request.start_offset,
                data: request.chunk,
                ok: fault.is_none(),
            });
            if let Some(err) = fault {
                return Err(err);
            }
            if let Some(resp) = self.overrides.lock().unwrap().remove(&attempt) {
                return Ok(resp);
            }
            Ok(self.window_from(request.start_offset + len))
        })
    }

    fn finish<'a>(
        &'a self,
        _target: &'a UploadTarget,
        session_id: &'a str,
        metadata: &'a FinishMetadata,
    ) -> TransportFuture<'a, FinishResult> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Call::Finish {
                session_id: session_id.to_string(),
                description: metadata.description.clone(),
            });
            self.finish_response.clone()
        })
    }
}

pub(crate) fn target() -> UploadTarget {
    UploadTarget::new("https://graph.test/v19.0", "page-1", "token-1")
}

/// Deterministic test payload of `len` bytes.
pub(crate) fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
