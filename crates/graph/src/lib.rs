//! Graph video endpoint transport.
//!
//! Implements [`reelup_transfer::UploadTransport`] over HTTP with `reqwest`:
//! form-encoded `start`/`finish` calls against `{base}/{page}/videos` and
//! multipart `transfer` calls against the session's upload URL.

pub mod client;

pub use client::{Client, ClientConfig, Error};
