//! Core types for LLM interaction.
//!
//! These types model the data flowing between agents and the engine.  They
//! are engine-agnostic at this layer; the [`super::client`] module translates
//! them into the OpenAI chat-completions wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ModelConfig;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user.
    User,
    /// Output from the LLM.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One part of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },
    /// Model reasoning ("thinking") text.
    Reasoning { text: String },
    /// A tool invocation proposed by the assistant.
    ToolRequest {
        name: String,
        ref_id: String,
        input: Value,
    },
    /// The outcome of a tool invocation.
    ToolResponse {
        name: String,
        ref_id: String,
        output: Value,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The text carried by this part, if it is a text-bearing part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } | Self::Reasoning { text } => Some(text),
            Self::ToolRequest { .. } | Self::ToolResponse { .. } => None,
        }
    }
}

/// A single message in a conversation history.
///
/// A message always holds at least one part.  Tool messages carry only
/// [`ContentPart::ToolResponse`] parts and tool requests only appear in
/// assistant messages; the constructors below keep those shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,
    /// Ordered content parts.
    pub content: Vec<ContentPart>,
}

impl Message {
    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_text(Role::System, text)
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_text(Role::User, text)
    }

    /// Create an assistant text message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_text(Role::Assistant, text)
    }

    fn with_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
        }
    }

    /// Create an assistant message that carries tool requests, optionally
    /// preceded by text.
    pub fn assistant_tool_calls(text: impl Into<String>, calls: &[ToolCall]) -> Self {
        let text = text.into();
        let mut content = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            content.push(ContentPart::text(text));
        }
        content.extend(calls.iter().map(|c| ContentPart::ToolRequest {
            name: c.name.clone(),
            ref_id: c.id.clone(),
            input: c.arguments.clone(),
        }));
        if content.is_empty() {
            content.push(ContentPart::text(""));
        }
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Create a tool message holding a single tool response.
    pub fn tool_response(name: impl Into<String>, ref_id: impl Into<String>, output: Value) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentPart::ToolResponse {
                name: name.into(),
                ref_id: ref_id.into(),
                output,
            }],
        }
    }

    /// Concatenate the plain text parts (reasoning excluded).
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool requests carried by this message, in order.
    pub fn tool_requests(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolRequest {
                    name,
                    ref_id,
                    input,
                } => Some(ToolCall {
                    id: ref_id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Number of characters across every text-bearing part.
    pub fn char_len(&self) -> usize {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .map(|t| t.chars().count())
            .sum()
    }

    /// Render as `<role>: <joined text>` for summaries and logs.
    pub fn render_line(&self) -> String {
        let joined: Vec<&str> = self
            .content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        format!("{}: {}", self.role, joined.join(" "))
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the LLM for correlating results.
    pub id: String,
    /// The name of the tool to invoke.
    pub name: String,
    /// Arguments as a JSON value.
    pub arguments: Value,
}

/// A tool definition exposed to the LLM so it knows what tools are available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    pub input_schema: Value,
}

/// How the model may pick tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
}

// ---------------------------------------------------------------------------
// Chat request
// ---------------------------------------------------------------------------

/// A full request to send to the engine.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// The model identifier.
    pub model: String,
    /// System instructions; sent first when non-empty.
    pub system: String,
    /// The conversation history, current prompt last.
    pub messages: Vec<Message>,
    /// Tool definitions the model may request.
    pub tools: Vec<ToolDefinition>,
    /// Tool selection policy; only sent alongside tools.
    pub tool_choice: Option<ToolChoice>,
    /// Sampling parameters.
    pub params: ModelConfig,
    /// Raw `response_format` value (JSON schema constrained output).
    pub response_format: Option<Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            messages,
            tools: Vec::new(),
            tool_choice: None,
            params: ModelConfig::default(),
            response_format: None,
        }
    }

    pub fn with_params(mut self, params: ModelConfig) -> Self {
        self.params = params;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>, choice: ToolChoice) -> Self {
        self.tools = tools;
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_response_format(mut self, format: Value) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Total request size in characters: system instructions plus every
    /// text-bearing part of every message.
    pub fn char_len(&self) -> usize {
        self.system.chars().count() + self.messages.iter().map(Message::char_len).sum::<usize>()
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A complete (non-streaming) generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
    /// `stop`, `length`, `tool_calls`, `content_filter`, ...
    pub finish_reason: Option<String>,
    /// Refusal or other explanatory message returned with the finish.
    pub finish_message: Option<String>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some("stop".into()),
            ..Self::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            finish_reason: Some("tool_calls".into()),
            ..Self::default()
        }
    }
}

/// One incremental piece of a streaming generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub finish_reason: Option<String>,
    pub finish_message: Option<String>,
}

impl StreamDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
