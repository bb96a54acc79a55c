//! Remote agent.
//!
//! [`RemoteAgent`] satisfies [`ChatOps`] against a chat server publishing the
//! endpoints of [`crate::wire`].  Both chat flows with and without memory map
//! onto the server's memory-enabled endpoints.  History replacement and
//! context compression cannot be expressed over the wire and fail with
//! [`AgentError::UnsupportedOnRemote`].

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{
    Agent, AgentInfo, AgentKind, ChatOps, ChatResponse, ChunkCallback, ContextCompression,
};
use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::{AgentError, Result};
use crate::llm::types::Message;
use crate::wire::{
    ChatRequestBody, Endpoint, EndpointPaths, StatusBody, StreamEvent, SystemMessageBody,
    extract_reply_field, extract_reply_text, parse_stream_payload,
};

/// Client of a remote chat server.
pub struct RemoteAgent {
    name: String,
    base_url: String,
    paths: EndpointPaths,
    timeout: Duration,
    http: reqwest::Client,
    active_stream: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for RemoteAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAgent")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RemoteAgent {
    /// Create a client for the server at `base_url` (scheme, host and port).
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            return Err(AgentError::InvalidConfig {
                reason: "remote agent base URL must not be empty".into(),
            });
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AgentError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url,
            paths: EndpointPaths::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            http,
            active_stream: Mutex::new(None),
        })
    }

    /// Use non-default endpoint paths.
    pub fn with_paths(mut self, paths: EndpointPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Timeout of non-streaming requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: Endpoint) -> Result<String> {
        let path = self
            .paths
            .resolve(endpoint)
            .ok_or_else(|| AgentError::InvalidConfig {
                reason: format!("endpoint {endpoint:?} is disabled"),
            })?;
        Ok(format!("{}{path}", self.base_url))
    }

    async fn read_json(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(AgentError::http(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn get(&self, endpoint: Endpoint) -> Result<Value> {
        let url = self.url(endpoint)?;
        debug!(agent = %self.name, url = %url, "GET");
        let resp = self.http.get(&url).timeout(self.timeout).send().await?;
        Self::read_json(resp).await
    }

    async fn post<B: Serialize + Sync>(&self, endpoint: Endpoint, body: &B) -> Result<Value> {
        let url = self.url(endpoint)?;
        debug!(agent = %self.name, url = %url, "POST");
        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;
        Self::read_json(resp).await
    }

    /// `GET healthcheck`; succeeds when the server answers `{"status":"ok"}`.
    pub async fn health(&self) -> Result<()> {
        let v = self.get(Endpoint::Healthcheck).await?;
        match v["status"].as_str() {
            Some("ok") => Ok(()),
            other => Err(AgentError::Internal(format!(
                "unexpected health status: {}",
                other.unwrap_or("<missing>")
            ))),
        }
    }

    /// Ask the server to cancel its in-flight stream.
    pub async fn cancel_remote_stream(&self) -> Result<()> {
        self.post(Endpoint::CancelStream, &serde_json::json!({})).await?;
        Ok(())
    }

    async fn chat(&self, prompt: &str) -> Result<ChatResponse> {
        let v = self
            .post(Endpoint::Chat, &ChatRequestBody::new(prompt))
            .await?;
        let text = extract_reply_text(&v).unwrap_or_default();
        let mut response = ChatResponse::complete(
            text,
            extract_reply_field(&v, "finish_reason").unwrap_or_default(),
        );
        response.finish_message = extract_reply_field(&v, "finish_message").unwrap_or_default();
        Ok(response)
    }

    async fn chat_stream(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse> {
        let url = self.url(Endpoint::ChatStream)?;
        let token = CancellationToken::new();
        *self
            .active_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        let _guard = ClearOnDrop(&self.active_stream);

        debug!(agent = %self.name, url = %url, "POST (stream)");
        let resp = self
            .http
            .post(&url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(&ChatRequestBody::new(prompt))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::http(status.as_u16(), &body));
        }

        let mut state = RemoteStream::default();
        let mut bytes = resp.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        'read: loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!(agent = %self.name, "remote stream cancelled");
                    return Err(AgentError::StreamCancelled { partial: state.text });
                }
                next = bytes.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| AgentError::Transport(format!("stream read error: {e}")))?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                if state.feed_line(line.trim_end(), on_chunk)? {
                    break 'read;
                }
            }
        }
        if !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).into_owned();
            state.feed_line(line.trim_end(), on_chunk)?;
        }

        state.finish(on_chunk)
    }
}

/// Clears the published stream token on every exit path.
struct ClearOnDrop<'a>(&'a Mutex<Option<CancellationToken>>);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Accumulated state of one remote event stream.
#[derive(Default)]
struct RemoteStream {
    text: String,
    final_text: Option<String>,
    finish_reason: String,
    finish_message: String,
    terminal_sent: bool,
}

impl RemoteStream {
    /// Handle one line.  Returns `true` once `[DONE]` was seen.
    fn feed_line(&mut self, line: &str, on_chunk: &mut ChunkCallback<'_>) -> Result<bool> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(false);
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        match parse_stream_payload(data) {
            StreamEvent::Done => return Ok(true),
            StreamEvent::Chunk(text) => {
                if text.is_empty() {
                    return Ok(false);
                }
                let chunk = ChatResponse::chunk(text);
                self.emit(&chunk, on_chunk)?;
                self.text.push_str(&chunk.text);
            }
            StreamEvent::Final {
                text,
                finish_reason,
                finish_message,
            } => {
                self.final_text = Some(text);
                self.finish_reason = finish_reason;
                self.finish_message = finish_message;
                let terminal =
                    ChatResponse::terminal(self.finish_reason.clone(), self.finish_message.clone(), "");
                self.emit(&terminal, on_chunk)?;
                self.terminal_sent = true;
            }
            StreamEvent::Error(message) => {
                warn!(message = %message, "remote server reported a stream error");
                return Err(AgentError::RemoteStreamFailed {
                    message,
                    partial: std::mem::take(&mut self.text),
                });
            }
        }
        Ok(false)
    }

    fn emit(&mut self, chunk: &ChatResponse, on_chunk: &mut ChunkCallback<'_>) -> Result<()> {
        on_chunk(chunk).map_err(|source| AgentError::CallbackFailed {
            partial: self.text.clone(),
            source,
        })
    }

    fn finish(mut self, on_chunk: &mut ChunkCallback<'_>) -> Result<ChatResponse> {
        if !self.terminal_sent {
            let terminal = ChatResponse::terminal("", "", "");
            self.emit(&terminal, on_chunk)?;
            self.finish_reason = terminal.finish_reason;
        }
        let text = self.final_text.take().unwrap_or(self.text);
        let mut response = ChatResponse::complete(text, self.finish_reason);
        response.finish_message = self.finish_message;
        Ok(response)
    }
}

#[async_trait]
impl Agent for RemoteAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Remote
    }

    async fn info(&self) -> Result<AgentInfo> {
        let v = self.get(Endpoint::Information).await?;
        Ok(serde_json::from_value(v)?)
    }
}

#[async_trait]
impl ChatOps for RemoteAgent {
    async fn ask(&self, prompt: &str) -> Result<ChatResponse> {
        self.chat(prompt).await
    }

    async fn ask_stream(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse> {
        self.chat_stream(prompt, on_chunk).await
    }

    async fn ask_with_memory(&self, prompt: &str) -> Result<ChatResponse> {
        self.chat(prompt).await
    }

    async fn ask_stream_with_memory(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse> {
        self.chat_stream(prompt, on_chunk).await
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        let v = self.get(Endpoint::Messages).await?;
        if v.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(v)?)
    }

    async fn add_system_message(&self, context: &str) -> Result<()> {
        let v = self
            .post(
                Endpoint::AddSystemMessage,
                &SystemMessageBody {
                    context: context.to_owned(),
                },
            )
            .await?;
        if let Ok(StatusBody {
            status,
            message: Some(message),
        }) = serde_json::from_value::<StatusBody>(v)
        {
            if status == "error" {
                return Err(AgentError::Internal(message));
            }
        }
        Ok(())
    }

    async fn replace_messages(&self, _messages: Vec<Message>) -> Result<()> {
        Err(unsupported("replace_messages"))
    }

    async fn replace_messages_with_system(
        &self,
        _system: &str,
        _messages: Vec<Message>,
    ) -> Result<()> {
        Err(unsupported("replace_messages_with_system"))
    }

    async fn context_size(&self) -> Result<usize> {
        Ok(self.messages().await?.iter().map(Message::char_len).sum())
    }

    fn cancel_stream(&self) -> bool {
        match self
            .active_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ContextCompression for RemoteAgent {
    async fn compress_context(&self) -> Result<ChatResponse> {
        Err(unsupported("compress_context"))
    }

    async fn compress_context_stream(
        &self,
        _on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse> {
        Err(unsupported("compress_context_stream"))
    }
}

fn unsupported(operation: &str) -> AgentError {
    AgentError::UnsupportedOnRemote {
        operation: operation.to_owned(),
    }
}
