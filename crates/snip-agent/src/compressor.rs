//! Context compression.
//!
//! A [`Compressor`] summarizes prior conversation into a short text suitable
//! for reinjection as a system message.  Message lists are rendered as
//! `<role>: <text>` lines; the configured compression prompt is prepended and
//! the whole is sent as a single user prompt to an internal, memory-less
//! [`ChatAgent`].

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::{Agent, AgentInfo, AgentKind, ChatOps, ChatResponse, ChunkCallback};
use crate::chat::{ChatAgent, Flow};
use crate::config::{AgentConfig, ModelConfig};
use crate::error::Result;
use crate::llm::client::ChatModel;
use crate::llm::types::Message;

// ---------------------------------------------------------------------------
// Prompt library
// ---------------------------------------------------------------------------

/// Built-in compression prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionPrompt {
    #[default]
    Minimalist,
    Structured,
    UltraShort,
    ContinuityFocus,
}

impl CompressionPrompt {
    pub const ALL: [CompressionPrompt; 4] = [
        CompressionPrompt::Minimalist,
        CompressionPrompt::Structured,
        CompressionPrompt::UltraShort,
        CompressionPrompt::ContinuityFocus,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Minimalist => "minimalist",
            Self::Structured => "structured",
            Self::UltraShort => "ultra-short",
            Self::ContinuityFocus => "continuity-focus",
        }
    }

    /// Look a prompt up by name, ignoring case, `-` and `_`.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|p| p.name().replace('-', "") == wanted)
    }

    pub fn text(self) -> &'static str {
        match self {
            Self::Minimalist => {
                "Summarize the conversation below in one short paragraph. Keep only the facts, \
                 decisions and open questions needed to continue it. Do not add commentary."
            }
            Self::Structured => {
                "Summarize the conversation below as a bulleted list with these sections:\n\
                 - Topics discussed\n\
                 - Facts and figures established\n\
                 - Decisions taken\n\
                 - Open questions\n\
                 Omit empty sections. Be factual and brief."
            }
            Self::UltraShort => {
                "Compress the conversation below into at most three sentences. Keep names, \
                 numbers and the user's current goal."
            }
            Self::ContinuityFocus => {
                "Summarize the conversation below so that another assistant can continue it \
                 seamlessly. State who the user is, what they asked for, what has been answered, \
                 and what they are waiting for next. Preserve exact values and identifiers."
            }
        }
    }
}

impl std::fmt::Display for CompressionPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Render messages as `<role>: <joined text>` lines.
pub fn render_messages(messages: &[Message]) -> String {
    let mut buf = String::with_capacity(messages.len() * 80);
    for msg in messages {
        buf.push_str(&msg.render_line());
        buf.push('\n');
    }
    buf
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`Compressor`].
pub struct CompressorBuilder {
    config: AgentConfig,
    model_config: ModelConfig,
    client: Option<Arc<dyn ChatModel>>,
    parent_token: Option<CancellationToken>,
    prompt: String,
    log_messages: Option<bool>,
}

impl CompressorBuilder {
    pub fn model_config(mut self, model_config: ModelConfig) -> Self {
        self.model_config = model_config;
        self
    }

    pub fn client(mut self, client: Arc<dyn ChatModel>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn parent_token(mut self, token: CancellationToken) -> Self {
        self.parent_token = Some(token);
        self
    }

    /// Use a built-in prompt.
    pub fn prompt(mut self, prompt: CompressionPrompt) -> Self {
        self.prompt = prompt.text().to_owned();
        self
    }

    /// Use a custom prompt.
    pub fn custom_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn log_messages(mut self, enabled: bool) -> Self {
        self.log_messages = Some(enabled);
        self
    }

    pub async fn build(self) -> Result<Compressor> {
        let mut builder = ChatAgent::builder(self.config)
            .model_config(self.model_config)
            .flows([Flow::Ask, Flow::AskStream]);
        if let Some(client) = self.client {
            builder = builder.client(client);
        }
        if let Some(token) = self.parent_token {
            builder = builder.parent_token(token);
        }
        if let Some(enabled) = self.log_messages {
            builder = builder.log_messages(enabled);
        }

        Ok(Compressor {
            agent: builder.build().await?,
            prompt: RwLock::new(self.prompt),
        })
    }
}

// ---------------------------------------------------------------------------
// Compressor
// ---------------------------------------------------------------------------

/// Summarizes text or conversation history.
#[derive(Debug)]
pub struct Compressor {
    agent: ChatAgent,
    prompt: RwLock<String>,
}

impl Compressor {
    pub fn builder(config: AgentConfig) -> CompressorBuilder {
        CompressorBuilder {
            config,
            model_config: ModelConfig::default(),
            client: None,
            parent_token: None,
            prompt: CompressionPrompt::default().text().to_owned(),
            log_messages: None,
        }
    }

    /// The current compression prompt.
    pub fn prompt(&self) -> String {
        self.prompt
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the compression prompt.
    pub fn set_prompt(&self, prompt: impl Into<String>) {
        *self.prompt.write().unwrap_or_else(PoisonError::into_inner) = prompt.into();
    }

    /// Switch to a built-in prompt.
    pub fn use_prompt(&self, prompt: CompressionPrompt) {
        debug!(agent = %self.agent.name(), prompt = %prompt, "compression prompt changed");
        self.set_prompt(prompt.text());
    }

    fn full_prompt(&self, text: &str) -> String {
        format!("{}\n\n{text}", self.prompt())
    }

    pub async fn compress_text(&self, text: &str) -> Result<ChatResponse> {
        info!(agent = %self.agent.name(), input_len = text.len(), "compressing text");
        self.agent.ask(&self.full_prompt(text)).await
    }

    pub async fn compress_text_stream(
        &self,
        text: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse> {
        info!(agent = %self.agent.name(), input_len = text.len(), "compressing text (stream)");
        self.agent.ask_stream(&self.full_prompt(text), on_chunk).await
    }

    pub async fn compress_messages(&self, messages: &[Message]) -> Result<ChatResponse> {
        self.compress_text(&render_messages(messages)).await
    }

    pub async fn compress_messages_stream(
        &self,
        messages: &[Message],
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse> {
        self.compress_text_stream(&render_messages(messages), on_chunk)
            .await
    }

    /// Cancel an in-flight streaming compression.
    pub fn cancel_stream(&self) -> bool {
        self.agent.cancel_stream()
    }
}

#[async_trait]
impl Agent for Compressor {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Compressor
    }

    async fn info(&self) -> Result<AgentInfo> {
        self.agent.info().await
    }
}
