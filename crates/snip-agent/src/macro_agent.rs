//! Macro agent: a chat agent composed with a compressor.
//!
//! Chat operations delegate to the inner [`ChatAgent`].  Compressing the
//! context snapshots the history, summarizes it, and replaces the summarized
//! messages with exactly one system message holding the trimmed summary.
//! Messages appended while the summary was generated are kept after it.  If
//! the history was replaced wholesale in the meantime, the summary wins.  The
//! agent's system instructions are left untouched and still travel with
//! every request.  On any failure the history is not modified.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::agent::{
    Agent, AgentInfo, AgentKind, ChatOps, ChatResponse, ChunkCallback, ContextCompression,
};
use crate::chat::ChatAgent;
use crate::compressor::Compressor;
use crate::error::{AgentError, Result};
use crate::llm::types::Message;

/// A chat agent with an optional compressor.
#[derive(Debug)]
pub struct MacroAgent {
    chat: Arc<ChatAgent>,
    compressor: Option<Arc<Compressor>>,
}

impl MacroAgent {
    pub fn new(chat: Arc<ChatAgent>, compressor: Option<Arc<Compressor>>) -> Self {
        Self { chat, compressor }
    }

    pub fn chat_agent(&self) -> &Arc<ChatAgent> {
        &self.chat
    }

    pub fn compressor(&self) -> Option<&Arc<Compressor>> {
        self.compressor.as_ref()
    }

    fn require_compressor(&self) -> Result<&Compressor> {
        self.compressor
            .as_deref()
            .ok_or_else(|| AgentError::NoCompressorConfigured {
                agent: self.chat.name().to_owned(),
            })
    }

    async fn install_summary(
        &self,
        response: &ChatResponse,
        summarized: &[Message],
        before: usize,
    ) -> Result<()> {
        let summary = vec![Message::system(response.text.trim())];
        if !self.chat.replace_history_prefix(summarized, summary).await {
            warn!(agent = %self.chat.name(), "history rewritten during compression");
        }
        let after = self.chat.context_size().await?;
        info!(agent = %self.chat.name(), before, after, "context compressed");
        Ok(())
    }

    /// Compress only when the context exceeds `limit` characters.
    pub async fn compress_context_if_over(&self, limit: usize) -> Result<Option<ChatResponse>> {
        let size = self.chat.context_size().await?;
        if size <= limit {
            debug!(agent = %self.chat.name(), size, limit, "context below limit");
            return Ok(None);
        }
        self.compress_context().await.map(Some)
    }
}

#[async_trait]
impl Agent for MacroAgent {
    fn name(&self) -> &str {
        self.chat.name()
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Macro
    }

    async fn info(&self) -> Result<AgentInfo> {
        self.chat.info().await
    }
}

#[async_trait]
impl ChatOps for MacroAgent {
    async fn ask(&self, prompt: &str) -> Result<ChatResponse> {
        self.chat.ask(prompt).await
    }

    async fn ask_stream(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse> {
        self.chat.ask_stream(prompt, on_chunk).await
    }

    async fn ask_with_memory(&self, prompt: &str) -> Result<ChatResponse> {
        self.chat.ask_with_memory(prompt).await
    }

    async fn ask_stream_with_memory(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse> {
        self.chat.ask_stream_with_memory(prompt, on_chunk).await
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        self.chat.messages().await
    }

    async fn add_system_message(&self, context: &str) -> Result<()> {
        self.chat.add_system_message(context).await
    }

    async fn replace_messages(&self, messages: Vec<Message>) -> Result<()> {
        self.chat.replace_messages(messages).await
    }

    async fn replace_messages_with_system(
        &self,
        system: &str,
        messages: Vec<Message>,
    ) -> Result<()> {
        self.chat.replace_messages_with_system(system, messages).await
    }

    async fn context_size(&self) -> Result<usize> {
        self.chat.context_size().await
    }

    fn cancel_stream(&self) -> bool {
        let chat = self.chat.cancel_stream();
        let compressor = self.compressor.as_ref().is_some_and(|c| c.cancel_stream());
        chat || compressor
    }
}

#[async_trait]
impl ContextCompression for MacroAgent {
    async fn compress_context(&self) -> Result<ChatResponse> {
        let compressor = self.require_compressor()?;
        let before = self.chat.context_size().await?;
        let messages = self.chat.messages().await?;

        let response = compressor.compress_messages(&messages).await?;
        self.install_summary(&response, &messages, before).await?;
        Ok(response)
    }

    async fn compress_context_stream(
        &self,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ChatResponse> {
        let compressor = self.require_compressor()?;
        let before = self.chat.context_size().await?;
        let messages = self.chat.messages().await?;

        let response = compressor
            .compress_messages_stream(&messages, on_chunk)
            .await?;
        self.install_summary(&response, &messages, before).await?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::chat::Flow;
    use crate::config::AgentConfig;
    use crate::error::BoxError;
    use crate::llm::types::Role;
    use crate::testing::ScriptedModel;

    const MODEL: &str = "ai/qwen2.5:latest";

    fn config(name: &str) -> AgentConfig {
        AgentConfig {
            name: name.into(),
            system_instructions: "You are helpful.".into(),
            model_id: MODEL.into(),
            engine_url: "http://stub/v1".into(),
        }
    }

    fn seed() -> Vec<Message> {
        (0..6)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                }
            })
            .collect()
    }

    async fn macro_agent(
        chat_model: Arc<ScriptedModel>,
        compressor_model: Option<Arc<ScriptedModel>>,
    ) -> MacroAgent {
        let chat = ChatAgent::builder(config("bob"))
            .client(chat_model)
            .flows(Flow::ALL)
            .messages(seed())
            .log_messages(false)
            .build()
            .await
            .unwrap();
        let compressor = match compressor_model {
            Some(model) => Some(Arc::new(
                Compressor::builder(config("compressor"))
                    .client(model)
                    .log_messages(false)
                    .build()
                    .await
                    .unwrap(),
            )),
            None => None,
        };
        MacroAgent::new(Arc::new(chat), compressor)
    }

    #[tokio::test]
    async fn compress_context_replaces_history_with_summary() {
        let compressor_model = Arc::new(ScriptedModel::new(MODEL));
        compressor_model.push_text("  SUMMARY\n");
        let agent = macro_agent(Arc::new(ScriptedModel::new(MODEL)), Some(compressor_model.clone()))
            .await;
        assert_eq!(agent.messages().await.unwrap().len(), 6);

        let response = agent.compress_context().await.unwrap();
        assert_eq!(response.text, "  SUMMARY\n");

        let messages = agent.messages().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].text(), "SUMMARY");

        let prompt = compressor_model.requests()[0].messages[0].text();
        assert!(prompt.contains("user: question 0\nassistant: answer 1\n"));
    }

    #[tokio::test]
    async fn missing_compressor_is_an_error() {
        let agent = macro_agent(Arc::new(ScriptedModel::new(MODEL)), None).await;
        let err = agent.compress_context().await.unwrap_err();
        assert!(matches!(err, AgentError::NoCompressorConfigured { .. }));
        assert_eq!(agent.messages().await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn failed_compression_leaves_history_untouched() {
        let compressor_model = Arc::new(ScriptedModel::new(MODEL));
        compressor_model.push_error("engine down");
        let agent = macro_agent(Arc::new(ScriptedModel::new(MODEL)), Some(compressor_model)).await;

        assert!(agent.compress_context().await.is_err());
        assert_eq!(agent.messages().await.unwrap(), seed());
    }

    #[tokio::test]
    async fn streaming_compression_replaces_history() {
        let compressor_model = Arc::new(ScriptedModel::new(MODEL));
        compressor_model.push_text_stream(&["SUM", "MARY"]);
        let agent = macro_agent(Arc::new(ScriptedModel::new(MODEL)), Some(compressor_model)).await;

        let mut on_chunk = |_: &ChatResponse| -> std::result::Result<(), BoxError> { Ok(()) };
        let response = agent.compress_context_stream(&mut on_chunk).await.unwrap();
        assert_eq!(response.text, "SUMMARY");
        assert_eq!(agent.messages().await.unwrap()[0].text(), "SUMMARY");
    }

    #[tokio::test]
    async fn compression_runs_on_spawned_tasks() {
        let compressor_model = Arc::new(ScriptedModel::new(MODEL));
        compressor_model.push_text("FIRST").push_text_stream(&["SEC", "OND"]);
        let agent = Arc::new(
            macro_agent(Arc::new(ScriptedModel::new(MODEL)), Some(compressor_model)).await,
        );

        let task = agent.clone();
        let response = tokio::spawn(async move { task.compress_context().await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.text, "FIRST");

        let task = agent.clone();
        let response = tokio::spawn(async move {
            let mut on_chunk = |_: &ChatResponse| -> std::result::Result<(), BoxError> { Ok(()) };
            task.compress_context_stream(&mut on_chunk).await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(response.text, "SECOND");
        assert_eq!(agent.messages().await.unwrap()[0].text(), "SECOND");
    }

    #[tokio::test]
    async fn messages_appended_during_compression_are_kept() {
        let compressor_model =
            Arc::new(ScriptedModel::new(MODEL).with_chunk_delay(Duration::from_millis(40)));
        compressor_model.push_text_stream(&["SUM", "MARY"]);
        let agent = Arc::new(
            macro_agent(Arc::new(ScriptedModel::new(MODEL)), Some(compressor_model)).await,
        );

        let task = agent.clone();
        let compression = tokio::spawn(async move {
            let mut on_chunk = |_: &ChatResponse| -> std::result::Result<(), BoxError> { Ok(()) };
            task.compress_context_stream(&mut on_chunk).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        agent.add_system_message("late context").await.unwrap();
        compression.await.unwrap().unwrap();

        let messages = agent.messages().await.unwrap();
        let texts: Vec<String> = messages.iter().map(Message::text).collect();
        assert_eq!(texts, ["SUMMARY", "late context"]);
    }

    #[tokio::test]
    async fn compress_only_when_over_limit() {
        let compressor_model = Arc::new(ScriptedModel::new(MODEL));
        compressor_model.push_text("S");
        let agent = macro_agent(Arc::new(ScriptedModel::new(MODEL)), Some(compressor_model)).await;

        assert!(agent.compress_context_if_over(10_000).await.unwrap().is_none());
        assert_eq!(agent.messages().await.unwrap().len(), 6);

        let response = agent.compress_context_if_over(10).await.unwrap();
        assert_eq!(response.map(|r| r.text).as_deref(), Some("S"));
        assert_eq!(agent.messages().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chat_operations_delegate() {
        let chat_model = Arc::new(ScriptedModel::new(MODEL));
        chat_model.push_text("hello");
        let agent = macro_agent(chat_model, None).await;

        agent.ask_with_memory("hi").await.unwrap();
        assert_eq!(agent.messages().await.unwrap().len(), 8);
        assert_eq!(agent.kind(), AgentKind::Macro);
        assert_eq!(agent.name(), "bob");
    }
}
