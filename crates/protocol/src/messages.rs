use serde::{Deserialize, Serialize};

use crate::types::OffsetWindow;

/// Errors produced while decoding a response body.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("field `{0}` is empty")]
    EmptyField(&'static str),
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Response to `upload_phase=start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub upload_session_id: String,
    pub upload_url: String,
    #[serde(with = "offset_value")]
    pub start_offset: u64,
    #[serde(with = "offset_value")]
    pub end_offset: u64,
}

impl StartResponse {
    /// The initial window the server asks for.
    pub fn window(&self) -> OffsetWindow {
        OffsetWindow::new(self.start_offset, self.end_offset)
    }
}

/// Response to `upload_phase=transfer`: the next window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResponse {
    #[serde(with = "offset_value")]
    pub start_offset: u64,
    #[serde(with = "offset_value")]
    pub end_offset: u64,
}

impl TransferResponse {
    pub fn window(&self) -> OffsetWindow {
        OffsetWindow::new(self.start_offset, self.end_offset)
    }
}

/// Terminal payload of `upload_phase=finish`, kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinishResult(pub serde_json::Value);

impl FinishResult {
    /// The `success` flag, when the service reports one.
    pub fn success(&self) -> Option<bool> {
        self.0.get("success").and_then(serde_json::Value::as_bool)
    }

    /// Identifier of the created resource (`video_id` or `id`), if present.
    pub fn resource_id(&self) -> Option<String> {
        ["video_id", "id"].iter().find_map(|key| match self.0.get(*key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes a start response; every field is required.
pub fn parse_start_response(body: &str) -> Result<StartResponse, ProtocolError> {
    let resp: StartResponse = serde_json::from_str(body)?;
    if resp.upload_session_id.is_empty() {
        return Err(ProtocolError::EmptyField("upload_session_id"));
    }
    if resp.upload_url.is_empty() {
        return Err(ProtocolError::EmptyField("upload_url"));
    }
    Ok(resp)
}

/// Decodes a transfer response; both offsets are required.
pub fn parse_transfer_response(body: &str) -> Result<TransferResponse, ProtocolError> {
    Ok(serde_json::from_str(body)?)
}

/// Decodes a finish response. Any JSON document is accepted.
pub fn parse_finish_response(body: &str) -> Result<FinishResult, ProtocolError> {
    Ok(FinishResult(serde_json::from_str(body)?))
}

/// Offsets arrive as decimal strings (`"1048576"`) from the Graph API, but
/// plain JSON integers are accepted too. Serialized as strings.
mod offset_value {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Int(v) => Ok(v),
            Raw::Str(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|e| serde::de::Error::custom(format!("invalid offset {s:?}: {e}"))),
        }
    }
}
