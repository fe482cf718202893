//! Wire shapes for the browser-facing API and the daemon-facing API.
//!
//! Everything here is transient: built per request and dropped when the
//! response (or the stream) finishes.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Inbound body for `/chat` and `/stream_chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    /// The user's message. Absent and empty are treated the same.
    #[serde(default)]
    pub message: Option<String>,
}

impl ChatRequest {
    /// The message, if present and non-empty.
    pub fn prompt(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.is_empty())
    }
}

/// Successful `/chat` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
}

/// Error body shared by every JSON route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// `/status` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub server: String,
    pub status: String,
    /// RFC 3339 time the report was produced.
    pub timestamp: String,
    pub daemon_url: String,
}

/// Request sent to the daemon's `/api/generate`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

/// Non-streaming daemon reply. Only `response` matters to the relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationReply {
    #[serde(default)]
    pub response: Option<String>,
}

/// One decoded line of the daemon's streaming body.
///
/// Fields are read one by one from a loose JSON value, so a line whose other
/// fields have unexpected types still yields its token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationChunk {
    pub response: Option<String>,
    pub done: bool,
}

impl GenerationChunk {
    /// Decode one line. Anything that is not a JSON object yields `None`.
    pub fn from_json_line(line: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(line).ok()?;
        let object = value.as_object()?;
        Some(Self {
            response: object
                .get("response")
                .and_then(Value::as_str)
                .map(str::to_string),
            done: object
                .get("done")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// One server-sent event delivered to the browser.
///
/// Serialized as exactly one of `{"token": ..}`, `{"done": true}` or
/// `{"error": ..}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Token(String),
    Done,
    Error(String),
}

impl RelayEvent {
    /// Whether the stream ends after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayEvent::Done | RelayEvent::Error(_))
    }
}

impl Serialize for RelayEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            RelayEvent::Token(token) => map.serialize_entry("token", token)?,
            RelayEvent::Done => map.serialize_entry("done", &true)?,
            RelayEvent::Error(message) => map.serialize_entry("error", message)?,
        }
        map.end()
    }
}
