//! Transport seam between the session state machine and the remote service.
//!
//! `reelup-graph` implements [`UploadTransport`] over HTTP. Keeping the
//! session logic behind a trait makes it testable against scripted servers.

use std::future::Future;
use std::pin::Pin;

use reelup_protocol::{FinishResult, StartResponse, TransferResponse, UploadTarget};

use crate::error::CallError;
use crate::types::FinishMetadata;

/// Boxed future returned by transport calls.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CallError>> + Send + 'a>>;

/// One transfer call: the bytes of the current window.
#[derive(Debug, Clone)]
pub struct TransferRequest<'a> {
    pub session_id: &'a str,
    pub upload_url: &'a str,
    pub start_offset: u64,
    pub chunk: Vec<u8>,
}

/// Remote side of the three-phase upload protocol.
pub trait UploadTransport: Send + Sync {
    /// Opens a session announcing `file_size` bytes.
    fn start<'a>(
        &'a self,
        target: &'a UploadTarget,
        file_size: u64,
    ) -> TransportFuture<'a, StartResponse>;

    /// Sends one chunk and returns the next window.
    fn transfer<'a>(
        &'a self,
        target: &'a UploadTarget,
        request: TransferRequest<'a>,
    ) -> TransportFuture<'a, TransferResponse>;

    /// Commits the session with caller metadata.
    fn finish<'a>(
        &'a self,
        target: &'a UploadTarget,
        session_id: &'a str,
        metadata: &'a FinishMetadata,
    ) -> TransportFuture<'a, FinishResult>;
}
