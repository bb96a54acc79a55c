//! Conversational agent SDK for OpenAI-compatible inference engines.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  MacroAgent  │──>│  ChatAgent  │──>│ MessageStore │
//! │              │   │             │   └──────────────┘
//! │              │──>│ Compressor  │──┐
//! └──────────────┘   └──────┬──────┘  │   ┌──────────────────┐
//!                           │         └──>│ dyn ChatModel     │
//! ┌──────────────┐          └────────────>│ (OpenAiClient)    │
//! │  ToolsAgent  │───────────────────────>│                   │
//! │StructuredAgent──────────────────────->└──────────────────┘
//! └──────────────┘
//! ┌──────────────┐   HTTP + SSE   ┌──────────────────────────┐
//! │ RemoteAgent  │───────────────>│ chat server (snip-web)    │
//! └──────────────┘                └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`llm`] -- engine client trait, OpenAI-compatible client, wire types.
//! - [`messages`] -- lock-protected conversation history.
//! - [`agent`] -- agent kinds, shared traits, [`ChatResponse`].
//! - [`chat`] -- the four chat flows with streaming cancellation.
//! - [`tools`] -- tool registry and the generate / execute loop.
//! - [`compressor`] -- conversation summarization.
//! - [`macro_agent`] -- chat agent plus compressor.
//! - [`structured`] -- single-shot typed output.
//! - [`remote`] -- client of a chat server.
//! - [`wire`] -- endpoint paths and HTTP envelopes.
//! - [`config`] -- environment, agent and model configuration.
//! - [`error`] -- agent error types.

pub mod agent;
pub mod chat;
pub mod compressor;
pub mod config;
pub mod error;
pub mod llm;
pub mod macro_agent;
pub mod messages;
pub mod remote;
pub mod schema;
pub mod structured;
pub mod tools;
pub mod wire;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export the most commonly used types at the crate root.
pub use agent::{
    Agent, AgentInfo, AgentKind, ChatOps, ChatResponse, ChunkCallback, ContextCompression,
};
pub use chat::{ChatAgent, ChatAgentBuilder, Flow, FlowSet};
pub use compressor::{CompressionPrompt, Compressor, CompressorBuilder};
pub use config::{AgentConfig, EnvConfig, LogLevel, ModelConfig, ReasoningEffort};
pub use error::{AgentError, BoxError, Result};
pub use llm::{
    ChatModel, ContentPart, Message, OpenAiClient, OpenAiClientConfig, Role, ToolCall,
    ToolDefinition,
};
pub use macro_agent::MacroAgent;
pub use messages::MessageStore;
pub use remote::RemoteAgent;
pub use structured::{StructuredAgent, StructuredAgentBuilder};
pub use tools::{
    Confirmation, FnTool, Tool, ToolCallsResult, ToolConfirmation, ToolExecution, ToolOutput,
    ToolsAgent, ToolsAgentBuilder, convert_output,
};
pub use wire::{Endpoint, EndpointPaths};
