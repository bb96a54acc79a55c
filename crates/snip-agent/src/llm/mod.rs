//! LLM integration layer.
//!
//! This module provides the interface between agents and the inference
//! engine.  It is organized into:
//!
//! - [`types`] -- Core data types (messages, content parts, requests, deltas).
//! - [`client`] -- The [`ChatModel`] trait and the OpenAI-compatible client.
//! - [`streaming_openai`] -- SSE stream parser for OpenAI incremental responses.

pub mod client;
pub mod streaming_openai;
pub mod types;

// Re-export the most commonly used types for convenience.
pub use client::{ChatModel, CompletionStream, OpenAiClient, OpenAiClientConfig, model_matches};
pub use types::{
    ChatRequest, Completion, ContentPart, Message, Role, StreamDelta, ToolCall, ToolChoice,
    ToolDefinition,
};
