//! Agent polymorphism.
//!
//! Every agent answers to the small [`Agent`] interface (`name`, `kind`,
//! `info`).  Capabilities are separate traits so callers detect them
//! explicitly: [`ChatOps`] for conversational agents and
//! [`ContextCompression`] for agents able to summarize their own history.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AgentConfig, ModelConfig};
use crate::error::{AgentError, BoxError, Result};
use crate::llm::client::{ChatModel, OpenAiClient, OpenAiClientConfig, model_matches};
use crate::llm::types::{Completion, ContentPart, Message, Role};

// ---------------------------------------------------------------------------
// Kinds and metadata
// ---------------------------------------------------------------------------

/// The closed set of agent kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    Basic,
    Chat,
    Remote,
    Tool,
    Intent,
    Rag,
    Compressor,
    Structured,
    Macro,
    ChatServer,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Chat => "Chat",
            Self::Remote => "Remote",
            Self::Tool => "Tool",
            Self::Intent => "Intent",
            Self::Rag => "Rag",
            Self::Compressor => "Compressor",
            Self::Structured => "Structured",
            Self::Macro => "Macro",
            Self::ChatServer => "ChatServer",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent metadata as published by the information endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub model_id: String,
    #[serde(default)]
    pub config: ModelConfig,
}

// ---------------------------------------------------------------------------
// Chat response
// ---------------------------------------------------------------------------

/// Finish reason used when the engine did not report one.
pub const FINISH_REASON_UNKNOWN: &str = "unknown";

/// Result of a generation, or one chunk of a streaming generation.
///
/// Intermediate chunks carry the text delta and an empty finish reason.  The
/// terminal chunk carries empty text and a non-empty finish reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub parts: Vec<ContentPart>,
    pub role: Role,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub finish_message: String,
    #[serde(default)]
    pub reasoning_content: String,
}

impl Default for ChatResponse {
    fn default() -> Self {
        Self {
            text: String::new(),
            parts: Vec::new(),
            role: Role::Assistant,
            finish_reason: String::new(),
            finish_message: String::new(),
            reasoning_content: String::new(),
        }
    }
}

impl ChatResponse {
    /// An intermediate streaming chunk.
    pub fn chunk(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            parts: vec![ContentPart::text(text.clone())],
            text,
            ..Self::default()
        }
    }

    /// The terminal streaming chunk.  An empty reason becomes `unknown`.
    pub fn terminal(
        finish_reason: impl Into<String>,
        finish_message: impl Into<String>,
        reasoning_content: impl Into<String>,
    ) -> Self {
        let mut finish_reason = finish_reason.into();
        if finish_reason.is_empty() {
            finish_reason = FINISH_REASON_UNKNOWN.to_owned();
        }
        Self {
            finish_reason,
            finish_message: finish_message.into(),
            reasoning_content: reasoning_content.into(),
            ..Self::default()
        }
    }

    /// A complete response with the given text and finish reason.
    pub fn complete(text: impl Into<String>, finish_reason: impl Into<String>) -> Self {
        let text = text.into();
        let mut response = Self::terminal(finish_reason, "", "");
        response.parts = vec![ContentPart::text(text.clone())];
        response.text = text;
        response
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn is_finish_reason_stop(&self) -> bool {
        self.finish_reason == "stop"
    }

    pub fn is_finish_reason_length(&self) -> bool {
        self.finish_reason == "length"
    }

    pub fn is_finish_reason_content_filter(&self) -> bool {
        self.finish_reason == "content_filter"
    }

    pub fn is_finish_reason_unknown(&self) -> bool {
        self.finish_reason == FINISH_REASON_UNKNOWN
    }

    /// Whether this is the terminal chunk of a stream.
    pub fn is_terminal(&self) -> bool {
        !self.finish_reason.is_empty()
    }
}

impl From<Completion> for ChatResponse {
    fn from(completion: Completion) -> Self {
        let mut parts = Vec::new();
        if !completion.reasoning.is_empty() {
            parts.push(ContentPart::Reasoning {
                text: completion.reasoning.clone(),
            });
        }
        if !completion.text.is_empty() || completion.tool_calls.is_empty() {
            parts.push(ContentPart::text(completion.text.clone()));
        }
        parts.extend(completion.tool_calls.iter().map(|c| ContentPart::ToolRequest {
            name: c.name.clone(),
            ref_id: c.id.clone(),
            input: c.arguments.clone(),
        }));

        Self {
            text: completion.text,
            parts,
            role: Role::Assistant,
            finish_reason: completion
                .finish_reason
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| FINISH_REASON_UNKNOWN.to_owned()),
            finish_message: completion.finish_message.unwrap_or_default(),
            reasoning_content: completion.reasoning,
        }
    }
}

/// Caller-supplied chunk consumer.  Returning an error stops the stream.
pub type ChunkCallback<'a> =
    dyn FnMut(&ChatResponse) -> std::result::Result<(), BoxError> + Send + 'a;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// The interface shared by every agent kind.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> AgentKind;

    /// Metadata about the agent and the model behind it.
    async fn info(&self) -> Result<AgentInfo>;
}

/// Conversational capability: the four chat flows plus history access.
#[async_trait]
pub trait ChatOps: Agent {
    /// Stateless, non-streaming generation.
    async fn ask(&self, prompt: &str) -> Result<ChatResponse>;

    /// Stateless, streaming generation.
    async fn ask_stream(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse>;

    /// Non-streaming generation that records the turn in memory.
    async fn ask_with_memory(&self, prompt: &str) -> Result<ChatResponse>;

    /// Streaming generation that records the turn in memory on success.
    async fn ask_stream_with_memory(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse>;

    /// Snapshot of the conversation history.
    async fn messages(&self) -> Result<Vec<Message>>;

    /// Append a system message to the history.
    async fn add_system_message(&self, context: &str) -> Result<()>;

    /// Replace the whole history.
    async fn replace_messages(&self, messages: Vec<Message>) -> Result<()>;

    /// Replace the whole history with `system` followed by `messages`.
    async fn replace_messages_with_system(
        &self,
        system: &str,
        messages: Vec<Message>,
    ) -> Result<()>;

    /// System instructions plus history, in characters.
    async fn context_size(&self) -> Result<usize>;

    /// Cancel the in-flight streaming generation, if any.  Returns whether a
    /// handle was published.
    fn cancel_stream(&self) -> bool;
}

/// Agents able to summarize their own history in place.
#[async_trait]
pub trait ContextCompression: Send + Sync {
    async fn compress_context(&self) -> Result<ChatResponse>;

    async fn compress_context_stream(
        &self,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse>;
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

/// Resolve the engine client for `config` and verify the model is served.
///
/// When no client is supplied an [`OpenAiClient`] is built for the
/// configured engine URL.
pub(crate) async fn connect_model(
    config: &AgentConfig,
    client: Option<Arc<dyn ChatModel>>,
) -> Result<Arc<dyn ChatModel>> {
    config.validate()?;

    let client = match client {
        Some(client) => client,
        None => Arc::new(OpenAiClient::new(OpenAiClientConfig::from_env(
            config.engine_url.clone(),
        ))?),
    };

    let unavailable = || AgentError::ModelUnavailable {
        model: config.model_id.clone(),
        engine_url: config.engine_url.clone(),
    };

    let models = client.list_models().await.map_err(|e| {
        tracing::warn!(
            agent = %config.name,
            engine = %config.engine_url,
            error = %e,
            "model probe failed"
        );
        unavailable()
    })?;

    if !models.iter().any(|m| model_matches(m, &config.model_id)) {
        tracing::warn!(
            agent = %config.name,
            model = %config.model_id,
            available = models.len(),
            "model not served by engine"
        );
        return Err(unavailable());
    }

    tracing::debug!(agent = %config.name, model = %config.model_id, "model available");
    Ok(client)
}

/// Remap any model failure to [`AgentError::GenerationFailed`] carrying the
/// request size and the partial output.
pub(crate) fn generation_failed(err: AgentError, context_size: usize, partial: String) -> AgentError {
    let reason = match err {
        AgentError::GenerationFailed { reason, .. } => reason,
        other => other.to_string(),
    };
    AgentError::GenerationFailed {
        context_size,
        partial,
        reason,
    }
}
