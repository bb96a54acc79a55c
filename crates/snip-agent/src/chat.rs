//! Chat agent.
//!
//! A [`ChatAgent`] combines an engine client with a [`MessageStore`] and
//! offers four flows:
//!
//! | Flow                    | Memory | Streaming |
//! |-------------------------|--------|-----------|
//! | `ask`                   | no     | no        |
//! | `ask_stream`            | no     | yes       |
//! | `ask_with_memory`       | yes    | no        |
//! | `ask_stream_with_memory`| yes    | yes       |
//!
//! Flows are enabled at construction; invoking a disabled flow fails with
//! [`AgentError::NoFlowEnabled`].  Stateless flows neither read nor write the
//! history.  Memory flows send the history ahead of the prompt and append the
//! trimmed user and assistant messages only when the generation succeeds.
//!
//! Streaming generations run under a child of the agent's cancellation
//! token.  The child is published on the agent so that [`ChatAgent::cancel_stream`]
//! (and the HTTP cancel endpoint) can abort it.  Only one published stream
//! exists per agent; starting a new stream replaces the handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{
    Agent, AgentInfo, AgentKind, ChatOps, ChatResponse, ChunkCallback, connect_model,
    generation_failed,
};
use crate::config::{AgentConfig, EnvConfig, ModelConfig};
use crate::error::{AgentError, Result};
use crate::llm::client::ChatModel;
use crate::llm::types::{ChatRequest, Message};
use crate::messages::MessageStore;

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

/// A named generation behavior (memory x streaming).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    Ask,
    AskStream,
    AskWithMemory,
    AskStreamWithMemory,
}

impl Flow {
    pub const ALL: [Flow; 4] = [
        Flow::Ask,
        Flow::AskStream,
        Flow::AskWithMemory,
        Flow::AskStreamWithMemory,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::AskStream => "ask-stream",
            Self::AskWithMemory => "ask-with-memory",
            Self::AskStreamWithMemory => "ask-stream-with-memory",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::Ask => 1,
            Self::AskStream => 1 << 1,
            Self::AskWithMemory => 1 << 2,
            Self::AskStreamWithMemory => 1 << 3,
        }
    }
}

impl std::fmt::Display for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of enabled flows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowSet(u8);

impl FlowSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Flow::ALL.into_iter().collect()
    }

    pub fn with(mut self, flow: Flow) -> Self {
        self.0 |= flow.bit();
        self
    }

    pub fn contains(self, flow: Flow) -> bool {
        self.0 & flow.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Flow> for FlowSet {
    fn from_iter<I: IntoIterator<Item = Flow>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`ChatAgent`].
pub struct ChatAgentBuilder {
    config: AgentConfig,
    model_config: ModelConfig,
    flows: FlowSet,
    client: Option<Arc<dyn ChatModel>>,
    parent_token: Option<CancellationToken>,
    log_messages: Option<bool>,
    messages: Vec<Message>,
}

impl ChatAgentBuilder {
    fn new(config: AgentConfig) -> Self {
        Self {
            config,
            model_config: ModelConfig::default(),
            flows: FlowSet::empty(),
            client: None,
            parent_token: None,
            log_messages: None,
            messages: Vec::new(),
        }
    }

    pub fn model_config(mut self, model_config: ModelConfig) -> Self {
        self.model_config = model_config;
        self
    }

    /// Enable one flow.
    pub fn flow(mut self, flow: Flow) -> Self {
        self.flows = self.flows.with(flow);
        self
    }

    /// Enable several flows.
    pub fn flows(mut self, flows: impl IntoIterator<Item = Flow>) -> Self {
        for flow in flows {
            self.flows = self.flows.with(flow);
        }
        self
    }

    /// Use this engine client instead of an OpenAI client built from the
    /// configured engine URL.
    pub fn client(mut self, client: Arc<dyn ChatModel>) -> Self {
        self.client = Some(client);
        self
    }

    /// Derive the agent's cancellation token from `token`; cancelling it
    /// aborts every streaming generation of the agent.
    pub fn parent_token(mut self, token: CancellationToken) -> Self {
        self.parent_token = Some(token);
        self
    }

    /// Dump the conversation history at debug level before each generation.
    /// Defaults to `LOG_MESSAGES`.
    pub fn log_messages(mut self, enabled: bool) -> Self {
        self.log_messages = Some(enabled);
        self
    }

    /// Seed the history.
    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Validate the configuration, probe the engine and build the agent.
    ///
    /// # Errors
    ///
    /// [`AgentError::InvalidConfig`] for an empty mandatory field and
    /// [`AgentError::ModelUnavailable`] when the engine does not serve the
    /// model.
    pub async fn build(self) -> Result<ChatAgent> {
        let client = connect_model(&self.config, self.client).await?;
        let root = self
            .parent_token
            .map(|parent| parent.child_token())
            .unwrap_or_default();

        info!(
            agent = %self.config.name,
            model = %self.config.model_id,
            "chat agent ready"
        );

        Ok(ChatAgent {
            config: self.config,
            model_config: self.model_config,
            flows: self.flows,
            client,
            store: MessageStore::with_messages(self.messages),
            root,
            active_stream: Mutex::new(None),
            next_stream_id: AtomicU64::new(1),
            log_messages: self
                .log_messages
                .unwrap_or_else(|| EnvConfig::from_env().log_messages),
        })
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

struct ActiveStream {
    id: u64,
    token: CancellationToken,
}

/// Conversational agent with optional memory and streaming.
pub struct ChatAgent {
    config: AgentConfig,
    model_config: ModelConfig,
    flows: FlowSet,
    client: Arc<dyn ChatModel>,
    store: MessageStore,
    root: CancellationToken,
    active_stream: Mutex<Option<ActiveStream>>,
    next_stream_id: AtomicU64,
    log_messages: bool,
}

impl std::fmt::Debug for ChatAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatAgent")
            .field("name", &self.config.name)
            .field("model_id", &self.config.model_id)
            .field("flows", &self.flows)
            .finish_non_exhaustive()
    }
}

/// Clears the published cancel handle when a stream ends, whatever the exit
/// path.
struct StreamGuard<'a> {
    agent: &'a ChatAgent,
    id: u64,
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self
            .agent
            .active_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|s| s.id == self.id) {
            *slot = None;
        }
    }
}

impl ChatAgent {
    pub fn builder(config: AgentConfig) -> ChatAgentBuilder {
        ChatAgentBuilder::new(config)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    pub fn flows(&self) -> FlowSet {
        self.flows
    }

    /// Whether a streaming generation currently publishes a cancel handle.
    pub fn has_active_stream(&self) -> bool {
        self.active_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The agent-wide cancellation token.  Cancelling it aborts every
    /// current and future streaming generation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.root
    }

    /// Swap the leading `prefix` of the history for `replacement`, keeping
    /// whatever was appended after it.  See [`MessageStore::replace_prefix`].
    pub async fn replace_history_prefix(
        &self,
        prefix: &[Message],
        replacement: Vec<Message>,
    ) -> bool {
        self.store.replace_prefix(prefix, replacement).await
    }

    fn require(&self, flow: Flow) -> Result<()> {
        if self.flows.contains(flow) {
            Ok(())
        } else {
            Err(AgentError::NoFlowEnabled {
                agent: self.config.name.clone(),
                flow: flow.to_string(),
            })
        }
    }

    async fn build_request(&self, prompt: &str, memory: bool) -> ChatRequest {
        let mut messages = if memory {
            self.store.snapshot().await
        } else {
            Vec::new()
        };
        messages.push(Message::user(prompt));

        let request = ChatRequest::new(
            self.config.model_id.clone(),
            self.config.system_instructions.clone(),
            messages,
        )
        .with_params(self.model_config.clone());

        debug!(
            agent = %self.config.name,
            context_size = request.char_len(),
            messages = request.messages.len(),
            "generating completion"
        );
        if self.log_messages {
            for (i, m) in request.messages.iter().enumerate() {
                debug!(agent = %self.config.name, index = i, role = %m.role, text = %m.text(), "history");
            }
        }
        request
    }

    async fn remember(&self, prompt: &str, answer: &str) {
        self.store
            .extend([
                Message::user(prompt.trim()),
                Message::assistant(answer.trim()),
            ])
            .await;
    }

    fn begin_stream(&self) -> (u64, CancellationToken) {
        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let mut slot = self
            .active_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!(agent = %self.config.name, "replacing published stream handle");
        }
        *slot = Some(ActiveStream {
            id,
            token: token.clone(),
        });
        (id, token)
    }

    async fn generate(&self, prompt: &str, memory: bool) -> Result<ChatResponse> {
        let request = self.build_request(prompt, memory).await;
        let context_size = request.char_len();

        let completion = self
            .client
            .complete(&request)
            .await
            .map_err(|e| generation_failed(e, context_size, String::new()))?;

        let response = ChatResponse::from(completion);
        if memory {
            self.remember(prompt, &response.text).await;
        }
        Ok(response)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        memory: bool,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse> {
        let request = self.build_request(prompt, memory).await;
        let context_size = request.char_len();

        let (id, token) = self.begin_stream();
        let _guard = StreamGuard { agent: self, id };

        let mut text = String::new();
        let mut reasoning = String::new();
        let mut finish_reason = String::new();
        let mut finish_message = String::new();

        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(AgentError::StreamCancelled { partial: text });
            }
            started = self.client.complete_stream(&request) => {
                started.map_err(|e| generation_failed(e, context_size, String::new()))?
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!(agent = %self.config.name, partial_len = text.len(), "stream cancelled");
                    return Err(AgentError::StreamCancelled { partial: text });
                }
                next = stream.next() => next,
            };
            let Some(delta) = next else { break };
            let delta = delta.map_err(|e| {
                warn!(agent = %self.config.name, context_size, error = %e, "stream failed");
                generation_failed(e, context_size, text.clone())
            })?;

            if let Some(r) = delta.reasoning {
                reasoning.push_str(&r);
            }
            if let Some(reason) = delta.finish_reason {
                finish_reason = reason;
            }
            if let Some(message) = delta.finish_message {
                finish_message = message;
            }
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                let chunk = ChatResponse::chunk(content);
                if let Err(source) = on_chunk(&chunk) {
                    return Err(AgentError::CallbackFailed {
                        partial: text,
                        source,
                    });
                }
                text.push_str(&chunk.text);
            }
        }

        let terminal = ChatResponse::terminal(finish_reason, finish_message, reasoning);
        if let Err(source) = on_chunk(&terminal) {
            return Err(AgentError::CallbackFailed {
                partial: text,
                source,
            });
        }

        if memory {
            self.remember(prompt, &text).await;
        }

        let mut response = ChatResponse::complete(text, terminal.finish_reason);
        response.finish_message = terminal.finish_message;
        response.reasoning_content = terminal.reasoning_content;
        Ok(response)
    }
}

#[async_trait]
impl Agent for ChatAgent {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Chat
    }

    async fn info(&self) -> Result<AgentInfo> {
        Ok(AgentInfo {
            name: self.config.name.clone(),
            model_id: self.config.model_id.clone(),
            config: self.model_config.clone(),
        })
    }
}

#[async_trait]
impl ChatOps for ChatAgent {
    async fn ask(&self, prompt: &str) -> Result<ChatResponse> {
        self.require(Flow::Ask)?;
        self.generate(prompt, false).await
    }

    async fn ask_stream(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse> {
        self.require(Flow::AskStream)?;
        self.generate_stream(prompt, false, on_chunk).await
    }

    async fn ask_with_memory(&self, prompt: &str) -> Result<ChatResponse> {
        self.require(Flow::AskWithMemory)?;
        self.generate(prompt, true).await
    }

    async fn ask_stream_with_memory(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse> {
        self.require(Flow::AskStreamWithMemory)?;
        self.generate_stream(prompt, true, on_chunk).await
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        Ok(self.store.snapshot().await)
    }

    async fn add_system_message(&self, context: &str) -> Result<()> {
        self.store.append(Message::system(context)).await;
        Ok(())
    }

    async fn replace_messages(&self, messages: Vec<Message>) -> Result<()> {
        self.store.replace_all(messages).await;
        Ok(())
    }

    async fn replace_messages_with_system(
        &self,
        system: &str,
        messages: Vec<Message>,
    ) -> Result<()> {
        let mut all = Vec::with_capacity(messages.len() + 1);
        all.push(Message::system(system));
        all.extend(messages);
        self.store.replace_all(all).await;
        Ok(())
    }

    async fn context_size(&self) -> Result<usize> {
        Ok(self.config.system_instructions.chars().count() + self.store.char_len().await)
    }

    fn cancel_stream(&self) -> bool {
        let slot = self
            .active_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(active) => {
                info!(agent = %self.config.name, stream = active.id, "cancelling stream");
                active.token.cancel();
                true
            }
            None => false,
        }
    }
}
