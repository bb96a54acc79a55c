//! Agent error types.
//!
//! All agent subsystems surface errors through [`AgentError`].  Generation
//! failures carry whatever partial output had been produced before the
//! failure so callers can still show progress.

/// Boxed error returned by caller-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the agent SDK.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Construction --------------------------------------------------------
    /// A mandatory configuration field was empty or malformed.
    #[error("invalid agent config: {reason}")]
    InvalidConfig { reason: String },

    /// The engine does not serve the requested model.
    #[error("model `{model}` is not available at {engine_url}")]
    ModelUnavailable { model: String, engine_url: String },

    /// The caller invoked an operation whose flow was not enabled.
    #[error("flow `{flow}` is not enabled on agent `{agent}`")]
    NoFlowEnabled { agent: String, flow: String },

    // -- Generation ----------------------------------------------------------
    /// The model invocation failed.
    #[error("generation failed (context size {context_size} chars): {reason}")]
    GenerationFailed {
        context_size: usize,
        partial: String,
        reason: String,
    },

    /// The published cancel handle was invoked while streaming.
    #[error("<cancelled>")]
    StreamCancelled { partial: String },

    /// A chunk or confirmation callback returned an error.
    #[error("callback failed: {source}")]
    CallbackFailed {
        partial: String,
        #[source]
        source: BoxError,
    },

    // -- Tools ---------------------------------------------------------------
    /// A tool request referenced a tool that is not registered.
    #[error("unknown tool: {tool_name}")]
    ToolNotFound { tool_name: String },

    /// A tool invocation failed.
    #[error("tool execution failed for `{tool_name}`: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    /// The tool loop exceeded the maximum number of generations.
    #[error("tool loop exceeded max turns ({max_turns})")]
    MaxTurnsExceeded { max_turns: u32 },

    /// A raw tool output did not match the requested typed shape.
    #[error("type conversion failed: {reason}")]
    TypeConversionFailed { reason: String },

    // -- Composition ---------------------------------------------------------
    /// The macro agent has no compressor.
    #[error("no compressor configured on agent `{agent}`")]
    NoCompressorConfigured { agent: String },

    /// The operation cannot be performed against a remote agent.
    #[error("operation `{operation}` is not supported on a remote agent")]
    UnsupportedOnRemote { operation: String },

    /// The structured agent could not coerce the response into its shape.
    #[error("structured output decode failed: {reason}")]
    StructuredDecodeFailed { reason: String },

    // -- HTTP ----------------------------------------------------------------
    /// A non-success status code from an engine or a remote agent server.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },

    /// A transport-level failure (connection refused, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// A remote server reported an error inside an event stream.
    #[error("remote stream error: {message}")]
    RemoteStreamFailed { message: String, partial: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

impl AgentError {
    /// The partial text produced before the failure, if any.
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            Self::GenerationFailed { partial, .. }
            | Self::StreamCancelled { partial }
            | Self::CallbackFailed { partial, .. }
            | Self::RemoteStreamFailed { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// Whether this error is the result of a cancelled stream.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::StreamCancelled { .. })
    }

    /// Build an [`AgentError::Http`] keeping only a prefix of the body.
    pub(crate) fn http(status: u16, body: &str) -> Self {
        const MAX_BODY: usize = 512;
        let body = match body.char_indices().nth(MAX_BODY) {
            Some((idx, _)) => format!("{}...", &body[..idx]),
            None => body.to_owned(),
        };
        Self::Http { status, body }
    }
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_text_is_exposed_for_generation_errors() {
        let err = AgentError::StreamCancelled {
            partial: "a a ".into(),
        };
        assert_eq!(err.partial_text(), Some("a a "));
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "<cancelled>");

        let err = AgentError::NoCompressorConfigured {
            agent: "bob".into(),
        };
        assert!(err.partial_text().is_none());
    }

    #[test]
    fn http_error_truncates_long_bodies() {
        let body = "x".repeat(2000);
        match AgentError::http(500, &body) {
            AgentError::Http { status, body } => {
                assert_eq!(status, 500);
                assert!(body.len() < 600);
                assert!(body.ends_with("..."));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn generation_error_reports_context_size() {
        let err = AgentError::GenerationFailed {
            context_size: 42,
            partial: String::new(),
            reason: "boom".into(),
        };
        assert!(err.to_string().contains("42"));
    }
}
