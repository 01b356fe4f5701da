//! Resumable upload sessions with server-dictated offset windows.
//!
//! A session opens with `start`, sends whatever byte range the server asks
//! for until the requested window reaches the end of the file, and commits
//! with `finish`. Transient transport failures are retried with the same
//! window; anything inconsistent in the server's answers is fatal.

mod error;
#[cfg(test)]
mod mock;
mod retry;
mod session;
mod source;
mod transport;
mod types;
mod uploader;

pub use error::{CallError, UploadError};
pub use retry::RetryConfig;
pub use session::{DEFAULT_STALL_LIMIT, UploadSession};
pub use source::SourceFile;
pub use transport::{TransferRequest, TransportFuture, UploadTransport};
pub use types::{ChunkResult, FinishMetadata, SessionState, UploadEvent};
pub use uploader::{Uploader, upload_file};
