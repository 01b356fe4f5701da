//! Graph video upload client.
//!
//! Async HTTP client using `reqwest`. One client holds the connection pool
//! and can serve any number of concurrent sessions and targets.

use std::time::Duration;

use reelup_protocol::{
    CHUNK_FIELD, FinishResult, ProtocolError, StartResponse, TransferResponse, UploadPhase,
    UploadTarget, parse_finish_response, parse_start_response, parse_transfer_response,
};
use reelup_transfer::{
    CallError, FinishMetadata, TransferRequest, TransportFuture, UploadTransport,
};
use reqwest::multipart::{Form, Part};
use tracing::{debug, trace};

/// Errors from building the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Timeouts applied to every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Whole-request timeout, including the body upload of a chunk.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// Graph video upload client.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
}

impl Client {
    /// Creates a client with the given timeouts.
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("reelup/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// Posts a URL-encoded form and returns the response body.
    async fn post_form(&self, url: &str, fields: &[(String, String)]) -> Result<String, CallError> {
        let resp = self
            .http
            .post(url)
            .form(fields)
            .send()
            .await
            .map_err(transport_error)?;
        read_body(resp).await
    }

    /// Posts a multipart form and returns the response body.
    async fn post_multipart(&self, url: &str, form: Form) -> Result<String, CallError> {
        let resp = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        read_body(resp).await
    }

    async fn start_session(
        &self,
        target: &UploadTarget,
        file_size: u64,
    ) -> Result<StartResponse, CallError> {
        let fields = vec![
            phase_field(UploadPhase::Start),
            ("access_token".to_string(), target.access_token.clone()),
            ("file_size".to_string(), file_size.to_string()),
        ];
        debug!(upload_target = ?target, file_size, "starting upload session");
        let body = self.post_form(&target.videos_url(), &fields).await?;
        parse_start_response(&body).map_err(|e| malformed(e, body))
    }

    async fn transfer_chunk(
        &self,
        target: &UploadTarget,
        request: TransferRequest<'_>,
    ) -> Result<TransferResponse, CallError> {
        let len = request.chunk.len();
        let part = Part::bytes(request.chunk).file_name("chunk");
        let form = Form::new()
            .text("upload_phase", UploadPhase::Transfer.as_str())
            .text("start_offset", request.start_offset.to_string())
            .text("upload_session_id", request.session_id.to_string())
            .text("access_token", target.access_token.clone())
            .part(CHUNK_FIELD, part);

        trace!(
            session = %request.session_id,
            start_offset = request.start_offset,
            bytes = len,
            "sending chunk"
        );
        let body = self.post_multipart(request.upload_url, form).await?;
        parse_transfer_response(&body).map_err(|e| malformed(e, body))
    }

    async fn finish_session(
        &self,
        target: &UploadTarget,
        session_id: &str,
        metadata: &FinishMetadata,
    ) -> Result<FinishResult, CallError> {
        let mut fields = vec![
            phase_field(UploadPhase::Finish),
            ("upload_session_id".to_string(), session_id.to_string()),
            ("access_token".to_string(), target.access_token.clone()),
        ];
        fields.extend(metadata.form_fields());
        debug!(session = %session_id, "finishing upload session");
        let body = self.post_form(&target.videos_url(), &fields).await?;
        parse_finish_response(&body).map_err(|e| malformed(e, body))
    }
}

impl UploadTransport for Client {
    fn start<'a>(
        &'a self,
        target: &'a UploadTarget,
        file_size: u64,
    ) -> TransportFuture<'a, StartResponse> {
        Box::pin(self.start_session(target, file_size))
    }

    fn transfer<'a>(
        &'a self,
        target: &'a UploadTarget,
        request: TransferRequest<'a>,
    ) -> TransportFuture<'a, TransferResponse> {
        Box::pin(self.transfer_chunk(target, request))
    }

    fn finish<'a>(
        &'a self,
        target: &'a UploadTarget,
        session_id: &'a str,
        metadata: &'a FinishMetadata,
    ) -> TransportFuture<'a, FinishResult> {
        Box::pin(self.finish_session(target, session_id, metadata))
    }
}

fn phase_field(phase: UploadPhase) -> (String, String) {
    ("upload_phase".to_string(), phase.as_str().to_string())
}

/// Checks the status and returns the body as text.
async fn read_body(resp: reqwest::Response) -> Result<String, CallError> {
    let status = resp.status();
    let body = resp.text().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(CallError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

fn transport_error(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::Transport(format!("request timed out: {e}"))
    } else {
        CallError::Transport(e.to_string())
    }
}

fn malformed(e: ProtocolError, body: String) -> CallError {
    CallError::Malformed {
        reason: e.to_string(),
        body,
    }
}
