//! Agent, model, and environment configuration.
//!
//! - [`EnvConfig`] -- the process environment coupling (engine URL, default
//!   model, log level, message dumps).
//! - [`AgentConfig`] -- the immutable identity of an agent.
//! - [`ModelConfig`] -- tunable sampling parameters.  Every field is optional
//!   so that "not set" is distinct from an explicit zero.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Default engine base URL (a local model runner speaking the OpenAI API).
pub const DEFAULT_ENGINE_URL: &str = "http://localhost:12434/engines/llama.cpp/v1";

/// Default chat model identifier.
pub const DEFAULT_CHAT_MODEL: &str = "ai/qwen2.5:latest";

/// Default per-request timeout for engine calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Log verbosity selected through `SNIP_LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    #[default]
    None,
}

impl LogLevel {
    /// Parse a level name.  Unknown names fall back to [`LogLevel::None`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            _ => Self::None,
        }
    }

    /// The `tracing_subscriber::EnvFilter` directive for this level.
    pub fn as_filter_directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::None => "off",
        }
    }
}

/// Settings read from the process environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// `MODEL_RUNNER_BASE_URL`.
    pub engine_url: String,
    /// `CHAT_MODEL`.
    pub chat_model: String,
    /// `MODEL_RUNNER_API_KEY`; local runners usually need none.
    pub api_key: Option<String>,
    /// `MODEL_RUNNER_TIMEOUT_SECS`.
    pub request_timeout: Duration,
    /// `SNIP_LOG_LEVEL`.
    pub log_level: LogLevel,
    /// `LOG_MESSAGES`.
    pub log_messages: bool,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            engine_url: DEFAULT_ENGINE_URL.to_owned(),
            chat_model: DEFAULT_CHAT_MODEL.to_owned(),
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_level: LogLevel::None,
            log_messages: false,
        }
    }
}

impl EnvConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            engine_url: non_empty("MODEL_RUNNER_BASE_URL").unwrap_or(defaults.engine_url),
            chat_model: non_empty("CHAT_MODEL").unwrap_or(defaults.chat_model),
            api_key: non_empty("MODEL_RUNNER_API_KEY"),
            request_timeout: non_empty("MODEL_RUNNER_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            log_level: non_empty("SNIP_LOG_LEVEL")
                .map(|v| LogLevel::parse(&v))
                .unwrap_or_default(),
            log_messages: non_empty("LOG_MESSAGES").is_some_and(|v| is_truthy(&v)),
        }
    }
}

/// Interpret a boolean-ish environment value.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ---------------------------------------------------------------------------
// Agent configuration
// ---------------------------------------------------------------------------

/// Immutable identity of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Human-readable agent name.
    pub name: String,
    /// System instructions sent ahead of every conversation.  May be empty.
    #[serde(default)]
    pub system_instructions: String,
    /// Model identifier on the engine.
    pub model_id: String,
    /// Base URL of the OpenAI-compatible engine.
    pub engine_url: String,
}

impl AgentConfig {
    /// Create a config whose model and engine come from the environment.
    pub fn new(name: impl Into<String>, system_instructions: impl Into<String>) -> Self {
        let env = EnvConfig::from_env();
        Self {
            name: name.into(),
            system_instructions: system_instructions.into(),
            model_id: env.chat_model,
            engine_url: env.engine_url,
        }
    }

    /// Override the model identifier.
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Override the engine base URL.
    pub fn with_engine_url(mut self, engine_url: impl Into<String>) -> Self {
        self.engine_url = engine_url.into();
        self
    }

    /// Check the mandatory fields.  Only the system instructions may be empty.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("name", &self.name),
            ("model_id", &self.model_id),
            ("engine_url", &self.engine_url),
        ] {
            if value.trim().is_empty() {
                return Err(AgentError::InvalidConfig {
                    reason: format!("`{field}` must not be empty"),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Model configuration
// ---------------------------------------------------------------------------

/// Reasoning effort hint for models that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

/// Tunable generation parameters.  Only fields that are `Some` are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl ModelConfig {
    /// Set the sampling temperature (zero is a legal, deterministic value).
    pub fn temperature(mut self, value: f32) -> Self {
        self.temperature = Some(value);
        self
    }

    pub fn top_p(mut self, value: f32) -> Self {
        self.top_p = Some(value);
        self
    }

    pub fn max_tokens(mut self, value: u32) -> Self {
        self.max_tokens = Some(value);
        self
    }

    pub fn frequency_penalty(mut self, value: f32) -> Self {
        self.frequency_penalty = Some(value);
        self
    }

    pub fn presence_penalty(mut self, value: f32) -> Self {
        self.presence_penalty = Some(value);
        self
    }

    pub fn seed(mut self, value: i64) -> Self {
        self.seed = Some(value);
        self
    }

    pub fn reasoning_effort(mut self, value: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(value);
        self
    }

    pub fn parallel_tool_calls(mut self, value: bool) -> Self {
        self.parallel_tool_calls = Some(value);
        self
    }

    pub fn stop(mut self, sequences: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stop = sequences.into_iter().map(Into::into).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
