//! SSE stream parser for the OpenAI Chat Completions API.
//!
//! The OpenAI streaming format sends `data:` lines with JSON payloads holding
//! `choices[].delta` objects, terminated by a `data: [DONE]` sentinel.  This
//! module turns each line into at most one [`StreamDelta`].  The only state
//! kept across lines is the text seen so far, reported as the partial answer
//! when the stream breaks, and the refusal text, which the engine may split
//! over several deltas.

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::types::StreamDelta;

/// Parses the lines of an OpenAI SSE stream.
///
/// Tool call fragments are not assembled: streamed generations in this crate
/// never carry tools.
#[derive(Debug, Default)]
pub struct OpenAiStreamAccumulator {
    text: String,
    refusal: String,
    done: bool,
}

impl OpenAiStreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the `[DONE]` sentinel has been received.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Text content received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Feed a single SSE line.
    ///
    /// Returns `Ok(Some(delta))` when the line carried text, reasoning, a
    /// refusal, or a finish reason, `Ok(None)` for everything else.  Refusal
    /// fragments are concatenated and the whole refusal so far is reported
    /// as the delta's `finish_message`.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<StreamDelta>> {
        let line = line.trim_end();

        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let Some(data) = line.strip_prefix("data:") else {
            // `event:`, `id:` and other SSE fields carry nothing we use.
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let v: Value = serde_json::from_str(data).map_err(|e| AgentError::GenerationFailed {
            context_size: 0,
            partial: self.text.clone(),
            reason: format!("invalid JSON in SSE data: {e}"),
        })?;

        if let Some(message) = v["error"]["message"].as_str() {
            return Err(AgentError::GenerationFailed {
                context_size: 0,
                partial: self.text.clone(),
                reason: format!("engine reported error: {message}"),
            });
        }

        let choice = &v["choices"][0];
        let delta = &choice["delta"];
        let mut out = StreamDelta::default();

        if let Some(content) = delta["content"].as_str().filter(|c| !c.is_empty()) {
            self.text.push_str(content);
            out.content = Some(content.to_owned());
        }

        out.reasoning = delta["reasoning_content"]
            .as_str()
            .or_else(|| delta["reasoning"].as_str())
            .filter(|r| !r.is_empty())
            .map(str::to_owned);

        if let Some(refusal) = delta["refusal"].as_str().filter(|r| !r.is_empty()) {
            self.refusal.push_str(refusal);
            out.finish_message = Some(self.refusal.clone());
        }

        if let Some(reason) = choice["finish_reason"].as_str().filter(|r| !r.is_empty()) {
            out.finish_reason = Some(reason.to_owned());
        }

        if out == StreamDelta::default() {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_accumulation() {
        let mut acc = OpenAiStreamAccumulator::new();

        let d1 = acc
            .feed_line(r#"data: {"id":"c1","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#)
            .unwrap();
        assert_eq!(d1, Some(StreamDelta::text("Hello")));

        let d2 = acc
            .feed_line(r#"data: {"id":"c1","choices":[{"index":0,"delta":{"content":" world"}}]}"#)
            .unwrap();
        assert_eq!(d2, Some(StreamDelta::text(" world")));
        assert_eq!(acc.text(), "Hello world");
    }

    #[test]
    fn finish_reason_is_reported() {
        let mut acc = OpenAiStreamAccumulator::new();
        let d = acc
            .feed_line(r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#)
            .unwrap();
        assert_eq!(d, Some(StreamDelta::finish("stop")));
    }

    #[test]
    fn reasoning_deltas_are_separate_from_text() {
        let mut acc = OpenAiStreamAccumulator::new();
        let d = acc
            .feed_line(r#"data: {"choices":[{"delta":{"reasoning_content":"thinking"}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(d.reasoning.as_deref(), Some("thinking"));
        assert!(d.content.is_none());
        assert_eq!(acc.text(), "");
    }

    #[test]
    fn refusal_fragments_become_finish_message() {
        let mut acc = OpenAiStreamAccumulator::new();
        let d1 = acc
            .feed_line(r#"data: {"choices":[{"delta":{"refusal":"I can't "}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(d1.finish_message.as_deref(), Some("I can't "));
        assert!(d1.content.is_none());

        let d2 = acc
            .feed_line(r#"data: {"choices":[{"delta":{"refusal":"help with that."},"finish_reason":"stop"}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(d2.finish_message.as_deref(), Some("I can't help with that."));
        assert_eq!(d2.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn null_refusal_is_ignored() {
        let mut acc = OpenAiStreamAccumulator::new();
        let d = acc
            .feed_line(r#"data: {"choices":[{"delta":{"content":"ok","refusal":null}}]}"#)
            .unwrap();
        assert_eq!(d, Some(StreamDelta::text("ok")));
    }

    #[test]
    fn tool_call_fragments_are_skipped() {
        let mut acc = OpenAiStreamAccumulator::new();
        let d = acc
            .feed_line(
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":5000000,"id":"call_abc","function":{"name":"add","arguments":"{}"}}]}}]}"#,
            )
            .unwrap();
        assert!(d.is_none());
        assert_eq!(acc.text(), "");
    }

    #[test]
    fn done_sentinel_sets_flag() {
        let mut acc = OpenAiStreamAccumulator::new();
        assert!(!acc.is_done());
        assert!(acc.feed_line("data: [DONE]").unwrap().is_none());
        assert!(acc.is_done());
    }

    #[test]
    fn blank_and_comment_lines_ignored() {
        let mut acc = OpenAiStreamAccumulator::new();
        assert!(acc.feed_line("").unwrap().is_none());
        assert!(acc.feed_line(": keepalive").unwrap().is_none());
        assert!(acc.feed_line("event: message").unwrap().is_none());
    }

    #[test]
    fn invalid_json_returns_error() {
        let mut acc = OpenAiStreamAccumulator::new();
        assert!(acc.feed_line("data: {invalid json}").is_err());
    }

    #[test]
    fn engine_error_payload_keeps_partial_text() {
        let mut acc = OpenAiStreamAccumulator::new();
        acc.feed_line(r#"data: {"choices":[{"delta":{"content":"half"}}]}"#)
            .unwrap();
        let err = acc
            .feed_line(r#"data: {"error":{"message":"model crashed"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("model crashed"));
        match err {
            AgentError::GenerationFailed { partial, .. } => assert_eq!(partial, "half"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
