//! Structured output agent.
//!
//! A [`StructuredAgent`] produces one typed value per call.  The JSON schema
//! of the target type is sent to the engine as a `json_schema` response
//! format; the answer is then parsed (tolerating a Markdown code fence),
//! validated against the same schema, and deserialized.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::agent::{Agent, AgentInfo, AgentKind, connect_model, generation_failed};
use crate::config::{AgentConfig, ModelConfig};
use crate::error::{AgentError, Result};
use crate::llm::client::ChatModel;
use crate::llm::types::{ChatRequest, Message};
use crate::schema::SchemaValidator;

/// Builder for [`StructuredAgent`].
pub struct StructuredAgentBuilder<T> {
    config: AgentConfig,
    model_config: ModelConfig,
    client: Option<Arc<dyn ChatModel>>,
    schema: Value,
    schema_name: String,
    _output: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> StructuredAgentBuilder<T> {
    pub fn model_config(mut self, model_config: ModelConfig) -> Self {
        self.model_config = model_config;
        self
    }

    pub fn client(mut self, client: Arc<dyn ChatModel>) -> Self {
        self.client = Some(client);
        self
    }

    /// Name reported in the `json_schema` response format.
    pub fn schema_name(mut self, name: impl Into<String>) -> Self {
        self.schema_name = name.into();
        self
    }

    pub async fn build(self) -> Result<StructuredAgent<T>> {
        let validator =
            SchemaValidator::compile(&self.schema).map_err(|reason| AgentError::InvalidConfig {
                reason,
            })?;
        let client = connect_model(&self.config, self.client).await?;

        Ok(StructuredAgent {
            config: self.config,
            model_config: self.model_config,
            client,
            schema: self.schema,
            schema_name: self.schema_name,
            validator,
            _output: PhantomData,
        })
    }
}

/// Single-shot generator of `T` values.  Keeps no memory.
pub struct StructuredAgent<T> {
    config: AgentConfig,
    model_config: ModelConfig,
    client: Arc<dyn ChatModel>,
    schema: Value,
    schema_name: String,
    validator: SchemaValidator,
    _output: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for StructuredAgent<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredAgent")
            .field("name", &self.config.name)
            .field("schema_name", &self.schema_name)
            .finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> StructuredAgent<T> {
    /// Start building an agent producing values matching `schema`.
    pub fn builder(config: AgentConfig, schema: Value) -> StructuredAgentBuilder<T> {
        StructuredAgentBuilder {
            config,
            model_config: ModelConfig::default(),
            client: None,
            schema,
            schema_name: "output".to_owned(),
            _output: PhantomData,
        }
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    fn response_format(&self) -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.schema_name,
                "schema": self.schema,
                "strict": true,
            }
        })
    }

    /// Generate one value from `prompt`.
    pub async fn generate(&self, prompt: &str) -> Result<T> {
        let request = ChatRequest::new(
            self.config.model_id.clone(),
            self.config.system_instructions.clone(),
            vec![Message::user(prompt)],
        )
        .with_params(self.model_config.clone())
        .with_response_format(self.response_format());
        let context_size = request.char_len();

        debug!(agent = %self.config.name, context_size, "generating structured output");

        let completion = self
            .client
            .complete(&request)
            .await
            .map_err(|e| generation_failed(e, context_size, String::new()))?;

        self.decode(&completion.text).inspect_err(|e| {
            warn!(agent = %self.config.name, error = %e, "structured output rejected");
        })
    }

    fn decode(&self, text: &str) -> Result<T> {
        let body = strip_code_fence(text);
        let value: Value =
            serde_json::from_str(body).map_err(|e| AgentError::StructuredDecodeFailed {
                reason: format!("response is not JSON: {e}"),
            })?;
        self.validator
            .check(&value)
            .map_err(|reason| AgentError::StructuredDecodeFailed { reason })?;
        serde_json::from_value(value).map_err(|e| AgentError::StructuredDecodeFailed {
            reason: e.to_string(),
        })
    }
}

/// Remove a surrounding Markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[async_trait]
impl<T: Send + Sync> Agent for StructuredAgent<T> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Structured
    }

    async fn info(&self) -> Result<AgentInfo> {
        Ok(AgentInfo {
            name: self.config.name.clone(),
            model_id: self.config.model_id.clone(),
            config: self.model_config.clone(),
        })
    }
}
