//! Tools agent.
//!
//! A [`ToolsAgent`] owns an ordered registry of [`Tool`]s and drives the
//! generate / execute loop: the model is called with the tool set and
//! `tool_choice = auto`; when it answers with tool requests they run in
//! listed order and their outputs are fed back; the loop ends as soon as a
//! generation carries no tool request.
//!
//! Every tool request appended to the history is followed by exactly one tool
//! response, in the same order.  Unknown tools and denied calls get a
//! synthetic `{"error": ...}` response so the pairing holds.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, AgentInfo, AgentKind, connect_model, generation_failed};
use crate::config::{AgentConfig, EnvConfig, ModelConfig};
use crate::error::{AgentError, BoxError, Result};
use crate::llm::client::ChatModel;
use crate::llm::types::{ChatRequest, Message, ToolCall, ToolChoice, ToolDefinition};
use crate::schema::SchemaValidator;

/// Default bound on the number of generations in one loop.
pub const DEFAULT_MAX_TURNS: u32 = 20;

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// A named, described callable over JSON values.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the input object.
    fn input_schema(&self) -> Value;

    /// JSON Schema of the output value.
    fn output_schema(&self) -> Value {
        json!({})
    }

    async fn invoke(&self, input: Value) -> std::result::Result<Value, BoxError>;
}

/// A [`Tool`] backed by an async function over serde types.
pub struct FnTool<I, O, F> {
    name: String,
    description: String,
    input_schema: Value,
    output_schema: Value,
    handler: F,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, F, Fut> FnTool<I, O, F>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<O, BoxError>> + Send,
{
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: json!({}),
            handler,
            _types: PhantomData,
        }
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }
}

#[async_trait]
impl<I, O, F, Fut> Tool for FnTool<I, O, F>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<O, BoxError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    fn output_schema(&self) -> Value {
        self.output_schema.clone()
    }

    async fn invoke(&self, input: Value) -> std::result::Result<Value, BoxError> {
        let input: I = serde_json::from_value(input)?;
        let output = (self.handler)(input).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Convert a raw tool output into a typed value.
pub fn convert_output<T: DeserializeOwned>(output: &Value) -> Result<T> {
    serde_json::from_value(output.clone()).map_err(|e| AgentError::TypeConversionFailed {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Confirmation and observation
// ---------------------------------------------------------------------------

/// Answer of a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Denied,
    Quit,
}

/// Gate consulted before each tool execution in the confirmation flow.
#[async_trait]
pub trait ToolConfirmation: Send + Sync {
    async fn confirm(&self, call: &ToolCall) -> std::result::Result<Confirmation, BoxError>;

    fn on_confirmed(&self, _call: &ToolCall) {}

    fn on_denied(&self, _call: &ToolCall) {}

    fn on_quit(&self, _call: &ToolCall) {}
}

/// What the observation hook sees after each execution.
#[derive(Debug)]
pub struct ToolExecution<'a> {
    pub name: &'a str,
    pub input: &'a Value,
    pub ref_id: &'a str,
    pub output: Option<&'a Value>,
    pub error: Option<&'a AgentError>,
}

type ExecutedHook = dyn Fn(&ToolExecution<'_>) + Send + Sync;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One executed call; serializes as `{name: output}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub name: String,
    pub output: Value,
}

impl Serialize for ToolOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.output)?;
        map.end()
    }
}

/// Outcome of a tool loop.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallsResult {
    /// Text of the terminal generation; empty when the user quit.
    pub text: String,
    pub finish_reason: String,
    /// Executed calls in execution order.
    pub results: Vec<ToolOutput>,
    /// Full history, tool requests and responses included.
    pub history: Vec<Message>,
    /// Whether the confirmation gate answered [`Confirmation::Quit`].
    pub quit: bool,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: SchemaValidator,
}

/// Builder for [`ToolsAgent`].
pub struct ToolsAgentBuilder {
    config: AgentConfig,
    model_config: ModelConfig,
    client: Option<Arc<dyn ChatModel>>,
    tools: Vec<Arc<dyn Tool>>,
    max_turns: u32,
    on_executed: Option<Arc<ExecutedHook>>,
    log_messages: Option<bool>,
}

impl ToolsAgentBuilder {
    pub fn model_config(mut self, model_config: ModelConfig) -> Self {
        self.model_config = model_config;
        self
    }

    pub fn client(mut self, client: Arc<dyn ChatModel>) -> Self {
        self.client = Some(client);
        self
    }

    /// Register a tool.  Names must be unique within the agent.
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn shared_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Observe every execution (output or error).
    pub fn on_executed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ToolExecution<'_>) + Send + Sync + 'static,
    {
        self.on_executed = Some(Arc::new(hook));
        self
    }

    pub fn log_messages(mut self, enabled: bool) -> Self {
        self.log_messages = Some(enabled);
        self
    }

    pub async fn build(self) -> Result<ToolsAgent> {
        let mut tools: Vec<RegisteredTool> = Vec::with_capacity(self.tools.len());
        for tool in self.tools {
            if tools.iter().any(|t| t.tool.name() == tool.name()) {
                return Err(AgentError::InvalidConfig {
                    reason: format!("tool `{}` registered twice", tool.name()),
                });
            }
            let validator = SchemaValidator::compile(&tool.input_schema()).map_err(|reason| {
                AgentError::InvalidConfig {
                    reason: format!("tool `{}`: {reason}", tool.name()),
                }
            })?;
            tools.push(RegisteredTool { tool, validator });
        }

        let client = connect_model(&self.config, self.client).await?;

        info!(agent = %self.config.name, tools = tools.len(), "tools agent ready");

        Ok(ToolsAgent {
            config: self.config,
            model_config: self.model_config,
            client,
            tools,
            max_turns: self.max_turns,
            on_executed: self.on_executed,
            log_messages: self
                .log_messages
                .unwrap_or_else(|| EnvConfig::from_env().log_messages),
        })
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Agent that lets the model orchestrate locally registered tools.
pub struct ToolsAgent {
    config: AgentConfig,
    model_config: ModelConfig,
    client: Arc<dyn ChatModel>,
    tools: Vec<RegisteredTool>,
    max_turns: u32,
    on_executed: Option<Arc<ExecutedHook>>,
    log_messages: bool,
}

impl std::fmt::Debug for ToolsAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsAgent")
            .field("name", &self.config.name)
            .field("tools", &self.tool_names())
            .field("max_turns", &self.max_turns)
            .finish_non_exhaustive()
    }
}

enum Step {
    Continue,
    Quit,
}

impl ToolsAgent {
    pub fn builder(config: AgentConfig) -> ToolsAgentBuilder {
        ToolsAgentBuilder {
            config,
            model_config: ModelConfig::default(),
            client: None,
            tools: Vec::new(),
            max_turns: DEFAULT_MAX_TURNS,
            on_executed: None,
            log_messages: None,
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.tool.name()).collect()
    }

    /// Definitions advertised to the model, in registration order.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.tool.name().to_owned(),
                description: t.tool.description().to_owned(),
                input_schema: t.tool.input_schema(),
            })
            .collect()
    }

    /// Run the loop for a single user prompt.
    pub async fn run(&self, prompt: &str) -> Result<ToolCallsResult> {
        self.detect_tool_calls(vec![Message::user(prompt)]).await
    }

    /// Run the loop, executing every known tool request without asking.
    pub async fn detect_tool_calls(&self, messages: Vec<Message>) -> Result<ToolCallsResult> {
        self.run_loop(messages, None).await
    }

    /// Run the loop, consulting `confirmation` before every execution.
    pub async fn detect_tool_calls_with_confirmation(
        &self,
        messages: Vec<Message>,
        confirmation: &dyn ToolConfirmation,
    ) -> Result<ToolCallsResult> {
        self.run_loop(messages, Some(confirmation)).await
    }

    async fn run_loop(
        &self,
        mut history: Vec<Message>,
        confirmation: Option<&dyn ToolConfirmation>,
    ) -> Result<ToolCallsResult> {
        let definitions = self.tool_definitions();
        let mut results: Vec<ToolOutput> = Vec::new();

        for turn in 1..=self.max_turns {
            let request = ChatRequest::new(
                self.config.model_id.clone(),
                self.config.system_instructions.clone(),
                history.clone(),
            )
            .with_params(self.model_config.clone())
            .with_tools(definitions.clone(), ToolChoice::Auto);
            let context_size = request.char_len();

            debug!(agent = %self.config.name, turn, context_size, "tool loop generation");
            if self.log_messages {
                for m in &history {
                    debug!(agent = %self.config.name, role = %m.role, text = %m.text(), "history");
                }
            }

            let completion = self
                .client
                .complete(&request)
                .await
                .map_err(|e| generation_failed(e, context_size, String::new()))?;

            if completion.tool_calls.is_empty() {
                info!(
                    agent = %self.config.name,
                    turns = turn,
                    executed = results.len(),
                    "tool loop finished"
                );
                let finish_reason = completion
                    .finish_reason
                    .unwrap_or_else(|| "unknown".to_owned());
                history.push(Message::assistant(completion.text.clone()));
                return Ok(ToolCallsResult {
                    text: completion.text,
                    finish_reason,
                    results,
                    history,
                    quit: false,
                });
            }

            let calls = completion.tool_calls;
            history.push(Message::assistant_tool_calls(completion.text, &calls));

            for (index, call) in calls.iter().enumerate() {
                let step = self
                    .handle_call(call, confirmation, &mut history, &mut results)
                    .await?;
                if let Step::Quit = step {
                    for skipped in &calls[index..] {
                        history.push(cancelled_response(skipped));
                    }
                    info!(agent = %self.config.name, tool = %call.name, "tool loop quit by user");
                    return Ok(ToolCallsResult {
                        text: String::new(),
                        finish_reason: String::new(),
                        results,
                        history,
                        quit: true,
                    });
                }
            }
        }

        warn!(agent = %self.config.name, max_turns = self.max_turns, "tool loop exhausted");
        Err(AgentError::MaxTurnsExceeded {
            max_turns: self.max_turns,
        })
    }

    async fn handle_call(
        &self,
        call: &ToolCall,
        confirmation: Option<&dyn ToolConfirmation>,
        history: &mut Vec<Message>,
        results: &mut Vec<ToolOutput>,
    ) -> Result<Step> {
        let Some(registered) = self.tools.iter().find(|t| t.tool.name() == call.name) else {
            let err = AgentError::ToolNotFound {
                tool_name: call.name.clone(),
            };
            error!(agent = %self.config.name, error = %err, "skipping tool request");
            self.observe(call, None, Some(&err));
            history.push(Message::tool_response(
                call.name.clone(),
                call.id.clone(),
                json!({"error": err.to_string()}),
            ));
            return Ok(Step::Continue);
        };

        if let Some(gate) = confirmation {
            let answer = gate
                .confirm(call)
                .await
                .map_err(|source| AgentError::CallbackFailed {
                    partial: String::new(),
                    source,
                })?;
            match answer {
                Confirmation::Confirmed => gate.on_confirmed(call),
                Confirmation::Denied => {
                    gate.on_denied(call);
                    info!(agent = %self.config.name, tool = %call.name, "tool call denied");
                    history.push(cancelled_response(call));
                    return Ok(Step::Continue);
                }
                Confirmation::Quit => {
                    gate.on_quit(call);
                    return Ok(Step::Quit);
                }
            }
        }

        match self.execute(registered, call).await {
            Ok(output) => {
                self.observe(call, Some(&output), None);
                history.push(Message::tool_response(
                    call.name.clone(),
                    call.id.clone(),
                    output.clone(),
                ));
                results.push(ToolOutput {
                    name: call.name.clone(),
                    output,
                });
                Ok(Step::Continue)
            }
            Err(err) => {
                self.observe(call, None, Some(&err));
                Err(err)
            }
        }
    }

    async fn execute(&self, registered: &RegisteredTool, call: &ToolCall) -> Result<Value> {
        registered
            .validator
            .check(&call.arguments)
            .map_err(|reason| AgentError::ToolExecutionFailed {
                tool_name: call.name.clone(),
                reason: format!("invalid input: {reason}"),
            })?;

        debug!(agent = %self.config.name, tool = %call.name, ref_id = %call.id, "executing tool");

        registered
            .tool
            .invoke(call.arguments.clone())
            .await
            .map_err(|e| {
                error!(agent = %self.config.name, tool = %call.name, error = %e, "tool failed");
                AgentError::ToolExecutionFailed {
                    tool_name: call.name.clone(),
                    reason: e.to_string(),
                }
            })
    }

    fn observe(&self, call: &ToolCall, output: Option<&Value>, error: Option<&AgentError>) {
        if let Some(hook) = &self.on_executed {
            hook(&ToolExecution {
                name: &call.name,
                input: &call.arguments,
                ref_id: &call.id,
                output,
                error,
            });
        }
    }
}

fn cancelled_response(call: &ToolCall) -> Message {
    Message::tool_response(
        call.name.clone(),
        call.id.clone(),
        json!({"error": "cancelled by user"}),
    )
}

#[async_trait]
impl Agent for ToolsAgent {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Tool
    }

    async fn info(&self) -> Result<AgentInfo> {
        Ok(AgentInfo {
            name: self.config.name.clone(),
            model_id: self.config.model_id.clone(),
            config: self.model_config.clone(),
        })
    }
}
