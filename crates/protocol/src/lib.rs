//! Wire types for the resumable video upload protocol.
//!
//! An upload runs in three phases against the remote media endpoint:
//! `start` opens a session and returns the first offset window, `transfer`
//! sends the requested byte range and returns the next window, and `finish`
//! commits the upload with its metadata. This crate only describes the
//! payloads; driving a session lives in `reelup-transfer`.

pub mod messages;
pub mod types;

pub use messages::{
    FinishResult, ProtocolError, StartResponse, TransferResponse, parse_finish_response,
    parse_start_response, parse_transfer_response,
};
pub use types::{OffsetWindow, UploadPhase, UploadTarget};

/// Default Graph API base for video ingestion.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph-video.facebook.com/v19.0";

/// Multipart field name carrying the chunk bytes of a transfer call.
pub const CHUNK_FIELD: &str = "video_file_chunk";
