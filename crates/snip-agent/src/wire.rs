//! HTTP wire protocol shared by the chat server and the remote agent.
//!
//! - [`EndpointPaths`] -- the fixed endpoint set with per-endpoint overrides.
//!   An empty path selects the default; `"-"` disables the endpoint.
//! - Request and reply envelopes.
//! - Server-sent event payloads: intermediate chunks
//!   `{"message":{"response":..}}`, the final chunk
//!   `{"result":{"response":..,"finish_reason":..}}`, then `[DONE]`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Path value that disables an endpoint.
pub const DISABLED: &str = "-";

/// Sentinel data line terminating an event stream.
pub const STREAM_DONE: &str = "[DONE]";

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// The endpoints published by a chat server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Healthcheck,
    Information,
    Messages,
    Chat,
    ChatStream,
    AddSystemMessage,
    CancelStream,
    Shutdown,
}

impl Endpoint {
    pub const ALL: [Endpoint; 8] = [
        Endpoint::Healthcheck,
        Endpoint::Information,
        Endpoint::Messages,
        Endpoint::Chat,
        Endpoint::ChatStream,
        Endpoint::AddSystemMessage,
        Endpoint::CancelStream,
        Endpoint::Shutdown,
    ];

    pub fn default_path(self) -> &'static str {
        match self {
            Self::Healthcheck => "/healthcheck",
            Self::Information => "/api/information",
            Self::Messages => "/api/messages",
            Self::Chat => "/api/chat",
            Self::ChatStream => "/api/chat-stream",
            Self::AddSystemMessage => "/api/add-system-message",
            Self::CancelStream => "/api/cancel-stream-completion",
            Self::Shutdown => DISABLED,
        }
    }

    /// HTTP method of the endpoint.
    pub fn method(self) -> &'static str {
        match self {
            Self::Healthcheck | Self::Information | Self::Messages => "GET",
            Self::Chat
            | Self::ChatStream
            | Self::AddSystemMessage
            | Self::CancelStream
            | Self::Shutdown => "POST",
        }
    }
}

/// Configured endpoint paths.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointPaths {
    pub healthcheck: String,
    pub information: String,
    pub messages: String,
    pub chat: String,
    pub chat_stream: String,
    pub add_system_message: String,
    pub cancel_stream: String,
    pub shutdown: String,
}

impl EndpointPaths {
    fn raw(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Healthcheck => &self.healthcheck,
            Endpoint::Information => &self.information,
            Endpoint::Messages => &self.messages,
            Endpoint::Chat => &self.chat,
            Endpoint::ChatStream => &self.chat_stream,
            Endpoint::AddSystemMessage => &self.add_system_message,
            Endpoint::CancelStream => &self.cancel_stream,
            Endpoint::Shutdown => &self.shutdown,
        }
    }

    fn raw_mut(&mut self, endpoint: Endpoint) -> &mut String {
        match endpoint {
            Endpoint::Healthcheck => &mut self.healthcheck,
            Endpoint::Information => &mut self.information,
            Endpoint::Messages => &mut self.messages,
            Endpoint::Chat => &mut self.chat,
            Endpoint::ChatStream => &mut self.chat_stream,
            Endpoint::AddSystemMessage => &mut self.add_system_message,
            Endpoint::CancelStream => &mut self.cancel_stream,
            Endpoint::Shutdown => &mut self.shutdown,
        }
    }

    /// Override the path of `endpoint`.
    pub fn with(mut self, endpoint: Endpoint, path: impl Into<String>) -> Self {
        *self.raw_mut(endpoint) = path.into();
        self
    }

    /// Effective path of `endpoint`, or `None` when disabled.
    pub fn resolve(&self, endpoint: Endpoint) -> Option<&str> {
        let raw = self.raw(endpoint).trim();
        let path = if raw.is_empty() {
            endpoint.default_path()
        } else {
            raw
        };
        (path != DISABLED).then_some(path)
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Body of a chat request.  `{"message": ..}` is canonical;
/// `{"data": {"message": ..}}` is accepted as well.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequestBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ChatRequestData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequestData {
    #[serde(default)]
    pub message: Option<String>,
}

impl ChatRequestBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            data: None,
        }
    }

    /// The user message, top level first.
    pub fn into_message(self) -> Option<String> {
        self.message
            .or_else(|| self.data.and_then(|d| d.message))
    }
}

/// Body of a non-streaming chat reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_message: Option<String>,
}

/// Body of the add-system-message endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMessageBody {
    pub context: String,
}

/// `{"status": .., "message": ..}` acknowledgement or error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBody {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusBody {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: None,
        }
    }

    pub fn ok() -> Self {
        Self::new("ok")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_owned(),
            message: Some(message.into()),
        }
    }
}

/// Text of a reply: `response`, `text` or `message` (string) at the top
/// level, else the same fields under `result` or `data`.
pub fn extract_reply_text(v: &Value) -> Option<String> {
    fn direct(v: &Value) -> Option<String> {
        ["response", "text", "message"]
            .iter()
            .find_map(|field| v[*field].as_str().map(str::to_owned))
    }
    direct(v)
        .or_else(|| direct(&v["result"]))
        .or_else(|| direct(&v["data"]))
}

/// A field of a reply at the top level, else under `result` or `data`.
pub fn extract_reply_field(v: &Value, field: &str) -> Option<String> {
    [&v[field], &v["result"][field], &v["data"][field]]
        .into_iter()
        .find_map(|f| f.as_str().map(str::to_owned))
}

// ---------------------------------------------------------------------------
// Event stream payloads
// ---------------------------------------------------------------------------

/// Intermediate chunk payload.
pub fn chunk_payload(text: &str) -> Value {
    json!({"message": {"response": text}})
}

/// Final chunk payload carrying the full text.
pub fn final_payload(text: &str, finish_reason: &str, finish_message: &str) -> Value {
    let mut result = json!({"response": text, "finish_reason": finish_reason});
    if !finish_message.is_empty() {
        result["finish_message"] = json!(finish_message);
    }
    json!({ "result": result })
}

/// Error payload sent in place of the final chunk.
pub fn error_payload(message: &str) -> Value {
    json!({"status": "error", "message": message})
}

/// A decoded `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The `[DONE]` sentinel.
    Done,
    /// A text delta.
    Chunk(String),
    /// The final chunk; `text` is the full response.
    Final {
        text: String,
        finish_reason: String,
        finish_message: String,
    },
    /// The server reported an error.
    Error(String),
}

/// Decode the payload of one `data:` line.  Non-JSON payloads are raw text.
pub fn parse_stream_payload(data: &str) -> StreamEvent {
    if data.trim() == STREAM_DONE {
        return StreamEvent::Done;
    }

    let Ok(v) = serde_json::from_str::<Value>(data) else {
        return StreamEvent::Chunk(data.to_owned());
    };

    if v["status"].as_str() == Some("error") {
        let message = v["message"].as_str().unwrap_or("remote stream error");
        return StreamEvent::Error(message.to_owned());
    }

    let text = [
        &v["message"]["response"],
        &v["result"]["response"],
        &v["message"],
        &v["text"],
    ]
    .into_iter()
    .find_map(|f| f.as_str())
    .unwrap_or_default()
    .to_owned();

    let finish_reason = v["message"]["finish_reason"]
        .as_str()
        .or_else(|| v["result"]["finish_reason"].as_str())
        .filter(|r| !r.is_empty());

    match finish_reason {
        Some(reason) => StreamEvent::Final {
            text,
            finish_reason: reason.to_owned(),
            finish_message: v["message"]["finish_message"]
                .as_str()
                .or_else(|| v["result"]["finish_message"].as_str())
                .unwrap_or_default()
                .to_owned(),
        },
        None => StreamEvent::Chunk(text),
    }
}
