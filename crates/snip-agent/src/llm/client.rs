//! Engine client.
//!
//! [`ChatModel`] is the seam between agents and the inference engine.
//! [`OpenAiClient`] implements it against any OpenAI-compatible
//! chat-completions endpoint (Docker Model Runner, Ollama, vLLM, llama.cpp
//! server, OpenAI itself) in both streaming SSE and non-streaming modes.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::config::{DEFAULT_REQUEST_TIMEOUT, EnvConfig};
use crate::error::{AgentError, Result};
use crate::llm::streaming_openai::OpenAiStreamAccumulator;
use crate::llm::types::{
    ChatRequest, Completion, ContentPart, Message, Role, StreamDelta, ToolCall, ToolDefinition,
};

/// Stream of incremental deltas produced by a streaming generation.
pub type CompletionStream = BoxStream<'static, Result<StreamDelta>>;

// ---------------------------------------------------------------------------
// Model trait
// ---------------------------------------------------------------------------

/// An inference engine able to serve chat completions.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Identifiers of the models the engine currently serves.
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Run a generation to completion.
    async fn complete(&self, request: &ChatRequest) -> Result<Completion>;

    /// Start a streaming generation.  Deltas arrive in engine order.
    async fn complete_stream(&self, request: &ChatRequest) -> Result<CompletionStream>;
}

/// Whether an engine-listed model id satisfies the requested id.
///
/// Model runners commonly list `name:latest` for a model requested as
/// `name`, and the other way round.
pub fn model_matches(listed: &str, wanted: &str) -> bool {
    listed == wanted
        || listed.strip_suffix(":latest") == Some(wanted)
        || wanted.strip_suffix(":latest") == Some(listed)
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Configuration for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClientConfig {
    /// Base URL including the API version segment, e.g.
    /// `http://localhost:12434/engines/llama.cpp/v1`.
    pub base_url: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Timeout for non-streaming requests.
    pub request_timeout: Duration,
}

impl OpenAiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Build a configuration for `base_url` taking the key and timeout from
    /// the environment.
    pub fn from_env(base_url: impl Into<String>) -> Self {
        let env = EnvConfig::from_env();
        Self {
            base_url: base_url.into(),
            api_key: env.api_key,
            request_timeout: env.request_timeout,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A [`ChatModel`] speaking the OpenAI Chat Completions API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: OpenAiClientConfig,
    http: reqwest::Client,
}

impl OpenAiClient {
    /// Create a new client with the given configuration.
    pub fn new(config: OpenAiClientConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(AgentError::InvalidConfig {
                reason: "engine base URL must not be empty".into(),
            });
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AgentError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, http })
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn headers(&self, streaming: bool) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                    AgentError::InvalidConfig {
                        reason: format!("invalid authorization header: {e}"),
                    }
                })?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if streaming {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }
        Ok(headers)
    }

    /// Send the HTTP request to the chat-completions endpoint.
    async fn send(&self, body: &Value, streaming: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url());

        tracing::debug!(url = %url, model = %body["model"], streaming, "sending LLM request");

        let mut builder = self
            .http
            .post(&url)
            .headers(self.headers(streaming)?)
            .json(body);
        if !streaming {
            builder = builder.timeout(self.config.request_timeout);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::http(status.as_u16(), &text));
        }
        Ok(resp)
    }

    /// Build the JSON body for the Chat Completions API.
    pub fn build_request_body(&self, request: &ChatRequest, stream: bool) -> Value {
        build_request_body(request, stream)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url());
        let resp = self
            .http
            .get(&url)
            .headers(self.headers(false)?)
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(AgentError::http(status.as_u16(), &text));
        }

        let v: Value = serde_json::from_str(&text)?;
        let models = v["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        let body = build_request_body(request, false);
        let resp = self.send(&body, false).await?;
        let text = resp.text().await?;
        let v: Value = serde_json::from_str(&text)?;
        parse_openai_response(&v)
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<CompletionStream> {
        let body = build_request_body(request, true);
        let resp = self.send(&body, true).await?;

        let stream: CompletionStream = Box::pin(async_stream::try_stream! {
            let mut accumulator = OpenAiStreamAccumulator::new();
            let mut byte_stream = resp.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            'read: while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk
                    .map_err(|e| AgentError::Transport(format!("stream read error: {e}")))?;
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    if let Some(delta) = accumulator.feed_line(&line)? {
                        yield delta;
                    }
                    if accumulator.is_done() {
                        break 'read;
                    }
                }
            }

            if !accumulator.is_done() && !buffer.is_empty() {
                let line = String::from_utf8_lossy(&buffer).into_owned();
                if let Some(delta) = accumulator.feed_line(&line)? {
                    yield delta;
                }
            }
        });

        Ok(stream)
    }
}

// ===========================================================================
// OpenAI format conversion (free functions)
// ===========================================================================

/// Build the JSON body for a chat-completions request.
pub fn build_request_body(request: &ChatRequest, stream: bool) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": messages_to_openai(&request.system, &request.messages),
    });

    let params = &request.params;
    if let Some(v) = params.temperature {
        body["temperature"] = json!(v);
    }
    if let Some(v) = params.top_p {
        body["top_p"] = json!(v);
    }
    if let Some(v) = params.max_tokens {
        body["max_tokens"] = json!(v);
    }
    if let Some(v) = params.frequency_penalty {
        body["frequency_penalty"] = json!(v);
    }
    if let Some(v) = params.presence_penalty {
        body["presence_penalty"] = json!(v);
    }
    if let Some(v) = params.seed {
        body["seed"] = json!(v);
    }
    if let Some(v) = params.reasoning_effort {
        body["reasoning_effort"] = json!(v);
    }
    if !params.stop.is_empty() {
        body["stop"] = json!(params.stop);
    }

    if !request.tools.is_empty() {
        body["tools"] = tools_to_openai(&request.tools);
        if let Some(choice) = request.tool_choice {
            body["tool_choice"] = json!(choice);
        }
        if let Some(parallel) = params.parallel_tool_calls {
            body["parallel_tool_calls"] = json!(parallel);
        }
    }

    if let Some(format) = &request.response_format {
        body["response_format"] = format.clone();
    }

    if stream {
        body["stream"] = json!(true);
    }

    body
}

/// Convert system instructions and messages to the OpenAI wire format.
///
/// Tool requests travel in `assistant.tool_calls`; every tool response part
/// becomes its own `role: "tool"` message keyed by `tool_call_id`.
/// Reasoning parts are not sent back to the engine.
pub fn messages_to_openai(system: &str, messages: &[Message]) -> Vec<Value> {
    let mut wire: Vec<Value> = Vec::with_capacity(messages.len() + 1);

    if !system.is_empty() {
        wire.push(json!({"role": "system", "content": system}));
    }

    for msg in messages {
        match msg.role {
            Role::System | Role::User => {
                wire.push(json!({"role": msg.role.as_str(), "content": msg.text()}));
            }
            Role::Assistant => {
                let calls = msg.tool_requests();
                if calls.is_empty() {
                    wire.push(json!({"role": "assistant", "content": msg.text()}));
                    continue;
                }
                let tool_calls: Vec<Value> = calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let mut m = json!({"role": "assistant", "tool_calls": tool_calls});
                let text = msg.text();
                if !text.is_empty() {
                    m["content"] = json!(text);
                }
                wire.push(m);
            }
            Role::Tool => {
                for part in &msg.content {
                    if let ContentPart::ToolResponse {
                        name,
                        ref_id,
                        output,
                    } = part
                    {
                        let content = match output {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        wire.push(json!({
                            "role": "tool",
                            "tool_call_id": ref_id,
                            "name": name,
                            "content": content,
                        }));
                    }
                }
            }
        }
    }

    wire
}

/// Convert tool definitions into the OpenAI format.
pub fn tools_to_openai(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect();
    json!(tool_values)
}

/// Parse a non-streaming chat-completions response.
pub fn parse_openai_response(v: &Value) -> Result<Completion> {
    let choice = &v["choices"][0];
    let message = &choice["message"];

    if message.is_null() {
        return Err(AgentError::GenerationFailed {
            context_size: 0,
            partial: String::new(),
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    let tool_calls = match message["tool_calls"].as_array() {
        Some(arr) => arr
            .iter()
            .map(|tc| {
                let func = &tc["function"];
                let name = func["name"].as_str().unwrap_or_default().to_owned();
                let arguments = match &func["arguments"] {
                    Value::String(raw) if raw.trim().is_empty() => json!({}),
                    Value::String(raw) => serde_json::from_str(raw).map_err(|e| {
                        AgentError::GenerationFailed {
                            context_size: 0,
                            partial: String::new(),
                            reason: format!("invalid JSON in tool call `{name}` arguments: {e}"),
                        }
                    })?,
                    Value::Null => json!({}),
                    other => other.clone(),
                };
                Ok(ToolCall {
                    id: tc["id"].as_str().unwrap_or_default().to_owned(),
                    name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    let reasoning = message["reasoning_content"]
        .as_str()
        .or_else(|| message["reasoning"].as_str())
        .unwrap_or_default();

    Ok(Completion {
        text: message["content"].as_str().unwrap_or_default().to_owned(),
        reasoning: reasoning.to_owned(),
        tool_calls,
        finish_reason: choice["finish_reason"].as_str().map(str::to_owned),
        finish_message: message["refusal"].as_str().map(str::to_owned),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::llm::types::ToolChoice;

    #[test]
    fn config_construction() {
        let config = OpenAiClientConfig::new("http://localhost:11434/v1").with_api_key("k");
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(OpenAiClient::new(OpenAiClientConfig::new("  ")).is_err());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OpenAiClient::new(OpenAiClientConfig::new("http://e/v1/")).unwrap();
        assert_eq!(client.base_url(), "http://e/v1");
    }

    #[test]
    fn model_matching_handles_latest_tag() {
        assert!(model_matches("ai/qwen2.5", "ai/qwen2.5"));
        assert!(model_matches("ai/qwen2.5:latest", "ai/qwen2.5"));
        assert!(model_matches("ai/qwen2.5", "ai/qwen2.5:latest"));
        assert!(!model_matches("ai/qwen2.5:7b", "ai/qwen2.5"));
    }

    #[test]
    fn messages_to_openai_puts_system_first() {
        let wire = messages_to_openai("You are helpful.", &[Message::user("Hello")]);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[0]["content"], "You are helpful.");
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(wire[1]["content"], "Hello");
    }

    #[test]
    fn messages_to_openai_skips_empty_system() {
        let wire = messages_to_openai("", &[Message::user("Hello")]);
        assert_eq!(wire.len(), 1);
    }

    #[test]
    fn messages_to_openai_tool_round() {
        let calls = vec![ToolCall {
            id: "call_abc".into(),
            name: "add".into(),
            arguments: json!({"a": 2, "b": 3}),
        }];
        let messages = vec![
            Message::assistant_tool_calls("", &calls),
            Message::tool_response("add", "call_abc", json!(5)),
        ];
        let wire = messages_to_openai("", &messages);

        assert_eq!(wire.len(), 2);
        let tc = &wire[0]["tool_calls"][0];
        assert_eq!(tc["id"], "call_abc");
        assert_eq!(tc["type"], "function");
        assert_eq!(tc["function"]["name"], "add");
        let args: Value = serde_json::from_str(tc["function"]["arguments"].as_str().unwrap())
            .unwrap();
        assert_eq!(args["b"], 3);
        assert!(wire[0].get("content").is_none());

        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_abc");
        assert_eq!(wire[1]["content"], "5");
    }

    #[test]
    fn tools_to_openai_format() {
        let tools = vec![ToolDefinition {
            name: "add".into(),
            description: "Add two numbers".into(),
            input_schema: json!({"type": "object"}),
        }];
        let wire = tools_to_openai(&tools);
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["name"], "add");
        assert_eq!(wire[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn request_body_applies_only_set_params() {
        let request = ChatRequest::new("ai/smollm2", "sys", vec![Message::user("hi")])
            .with_params(ModelConfig::default().temperature(0.0).max_tokens(64));
        let body = build_request_body(&request, false);

        assert_eq!(body["model"], "ai/smollm2");
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["max_tokens"], 64);
        assert!(body.get("top_p").is_none());
        assert!(body.get("seed").is_none());
        assert!(body.get("stream").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn request_body_with_tools_and_stream() {
        let request = ChatRequest::new("m", "", vec![Message::user("add 2 and 3")])
            .with_params(ModelConfig::default().parallel_tool_calls(false))
            .with_tools(
                vec![ToolDefinition {
                    name: "add".into(),
                    description: "Add".into(),
                    input_schema: json!({"type": "object"}),
                }],
                ToolChoice::Auto,
            );
        let body = build_request_body(&request, true);

        assert_eq!(body["stream"], true);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["parallel_tool_calls"], false);
        assert_eq!(body["tools"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn parse_text_response() {
        let v = json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello!"},
                "finish_reason": "stop"
            }]
        });
        let completion = parse_openai_response(&v).unwrap();
        assert_eq!(completion.text, "Hello!");
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
        assert!(completion.tool_calls.is_empty());
    }

    #[test]
    fn parse_tool_call_response() {
        let v = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_xyz",
                        "type": "function",
                        "function": {"name": "mul", "arguments": "{\"a\":5,\"b\":4}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let completion = parse_openai_response(&v).unwrap();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "mul");
        assert_eq!(completion.tool_calls[0].arguments["a"], 5);
        assert!(completion.text.is_empty());
    }

    #[test]
    fn parse_missing_message_is_an_error() {
        assert!(parse_openai_response(&json!({"choices": []})).is_err());
    }
}
