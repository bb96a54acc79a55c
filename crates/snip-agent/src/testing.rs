//! Scripted engine for tests.
//!
//! [`ScriptedModel`] implements [`ChatModel`] by replaying a queue of canned
//! replies.  Streaming replies can be paced with a per-chunk delay so that
//! cancellation can be exercised deterministically.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::{AgentError, Result};
use crate::llm::client::{ChatModel, CompletionStream};
use crate::llm::types::{ChatRequest, Completion, StreamDelta, ToolCall};

/// One canned engine reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Complete(Completion),
    Stream(Vec<StreamDelta>),
    /// Stream the deltas, then break with the given reason.
    StreamThenFail(Vec<StreamDelta>, String),
    Fail(String),
}

/// A [`ChatModel`] replaying scripted replies in order.
#[derive(Debug)]
pub struct ScriptedModel {
    models: Vec<String>,
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
    chunk_delay: Duration,
}

impl ScriptedModel {
    /// A model engine serving `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            models: vec![model.into()],
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            chunk_delay: Duration::ZERO,
        }
    }

    /// Pause before every streamed delta.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn push(&self, reply: ScriptedReply) -> &Self {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
        self
    }

    /// Queue a plain text answer finishing with `stop`.
    pub fn push_text(&self, text: &str) -> &Self {
        self.push(ScriptedReply::Complete(Completion::text(text)))
    }

    /// Queue a reply requesting `calls`.
    pub fn push_tool_calls(&self, calls: Vec<ToolCall>) -> &Self {
        self.push(ScriptedReply::Complete(Completion::tool_calls(calls)))
    }

    /// Queue a streamed answer made of `chunks` followed by a `stop` finish.
    pub fn push_text_stream(&self, chunks: &[&str]) -> &Self {
        let mut deltas: Vec<StreamDelta> = chunks.iter().map(|c| StreamDelta::text(*c)).collect();
        deltas.push(StreamDelta::finish("stop"));
        self.push(ScriptedReply::Stream(deltas))
    }

    /// Queue a stream that delivers `chunks` and then fails with `reason`.
    pub fn push_text_stream_then_error(&self, chunks: &[&str], reason: &str) -> &Self {
        let deltas = chunks.iter().map(|c| StreamDelta::text(*c)).collect();
        self.push(ScriptedReply::StreamThenFail(deltas, reason.to_owned()))
    }

    /// Queue an engine failure.
    pub fn push_error(&self, reason: &str) -> &Self {
        self.push(ScriptedReply::Fail(reason.to_owned()))
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_reply(&self, request: &ChatRequest) -> Result<ScriptedReply> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| AgentError::Internal("scripted model has no reply left".into()))
    }
}

fn scripted_failure(reason: String) -> AgentError {
    AgentError::GenerationFailed {
        context_size: 0,
        partial: String::new(),
        reason,
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(self.models.clone())
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        match self.next_reply(request)? {
            ScriptedReply::Complete(completion) => Ok(completion),
            ScriptedReply::Stream(deltas) => {
                let mut completion = Completion::default();
                for delta in deltas {
                    if let Some(content) = delta.content {
                        completion.text.push_str(&content);
                    }
                    if let Some(reasoning) = delta.reasoning {
                        completion.reasoning.push_str(&reasoning);
                    }
                    if delta.finish_reason.is_some() {
                        completion.finish_reason = delta.finish_reason;
                    }
                }
                Ok(completion)
            }
            ScriptedReply::StreamThenFail(_, reason) | ScriptedReply::Fail(reason) => {
                Err(scripted_failure(reason))
            }
        }
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<CompletionStream> {
        let (deltas, failure) = match self.next_reply(request)? {
            ScriptedReply::Stream(deltas) => (deltas, None),
            ScriptedReply::StreamThenFail(deltas, reason) => (deltas, Some(reason)),
            ScriptedReply::Complete(completion) => {
                let mut deltas = vec![StreamDelta::text(completion.text)];
                deltas.push(StreamDelta {
                    finish_reason: completion.finish_reason,
                    finish_message: completion.finish_message,
                    ..StreamDelta::default()
                });
                (deltas, None)
            }
            ScriptedReply::Fail(reason) => return Err(scripted_failure(reason)),
        };

        let delay = self.chunk_delay;
        let items = deltas
            .into_iter()
            .map(Ok)
            .chain(failure.map(|reason| Err(scripted_failure(reason))));
        let stream = futures::stream::iter(items).then(move |item| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_are_replayed_in_order() {
        let model = ScriptedModel::new("m");
        model.push_text("one").push_text("two");
        let request = ChatRequest::new("m", "", vec![]);

        assert_eq!(model.complete(&request).await.unwrap().text, "one");
        assert_eq!(model.complete(&request).await.unwrap().text, "two");
        assert!(model.complete(&request).await.is_err());
        assert_eq!(model.requests().len(), 3);
    }

    #[tokio::test]
    async fn stream_yields_every_delta() {
        let model = ScriptedModel::new("m");
        model.push_text_stream(&["a", "b"]);
        let request = ChatRequest::new("m", "", vec![]);

        let deltas: Vec<StreamDelta> = model
            .complete_stream(&request)
            .await
            .unwrap()
            .map(|d| d.unwrap())
            .collect()
            .await;
        assert_eq!(
            deltas,
            vec![
                StreamDelta::text("a"),
                StreamDelta::text("b"),
                StreamDelta::finish("stop")
            ]
        );
    }

    #[tokio::test]
    async fn stream_then_error_ends_with_failure() {
        let model = ScriptedModel::new("m");
        model.push_text_stream_then_error(&["a"], "connection reset");
        let request = ChatRequest::new("m", "", vec![]);

        let items: Vec<Result<StreamDelta>> =
            model.complete_stream(&request).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &StreamDelta::text("a"));
        assert!(items[1].as_ref().unwrap_err().to_string().contains("connection reset"));
    }
}
