//! Route handlers for the fixed endpoint set.
//!
//! Every handler takes the shared [`AppState`] and answers with JSON; the
//! streaming handler answers with server-sent events whose payloads follow
//! [`snip_agent::wire`].

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::sse::{Event, Sse};
use futures::{Stream, StreamExt};
use serde_json::Value;
use snip_agent::wire::{
    ChatReply, ChatRequestBody, STREAM_DONE, StatusBody, SystemMessageBody, chunk_payload,
    error_payload, final_payload,
};
use snip_agent::{AgentInfo, BoxError, ChatResponse, Message};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Delay between acknowledging a shutdown request and stopping the server.
pub const SHUTDOWN_ACK_DELAY: Duration = Duration::from_millis(100);

type ApiResult<T> = Result<Json<T>, ApiError>;

fn prompt_of(body: Result<Json<ChatRequestBody>, JsonRejection>) -> Result<String, ApiError> {
    let Json(body) = body?;
    body.into_message()
        .ok_or_else(|| ApiError::bad_request("missing `message` in request body"))
}

fn reply_of(response: ChatResponse) -> ChatReply {
    ChatReply {
        response: response.text,
        finish_reason: Some(response.finish_reason).filter(|r| !r.is_empty()),
        finish_message: Some(response.finish_message).filter(|m| !m.is_empty()),
    }
}

// ---------------------------------------------------------------------------
// GET endpoints
// ---------------------------------------------------------------------------

pub async fn healthcheck() -> Json<StatusBody> {
    Json(StatusBody::ok())
}

/// Agent name, model id and model configuration.
pub async fn information(State(state): State<Arc<AppState>>) -> ApiResult<AgentInfo> {
    Ok(Json(state.agent.info().await?))
}

/// The agent's conversation history.
pub async fn messages(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Message>> {
    Ok(Json(state.agent.messages().await?))
}

// ---------------------------------------------------------------------------
// POST /api/chat
// ---------------------------------------------------------------------------

/// Non-streaming generation with memory.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequestBody>, JsonRejection>,
) -> ApiResult<ChatReply> {
    let prompt = prompt_of(body)?;
    debug!(agent = %state.agent.name(), "chat request");
    let response = state.agent.ask_with_memory(&prompt).await?;
    Ok(Json(reply_of(response)))
}

// ---------------------------------------------------------------------------
// POST /api/chat-stream
// ---------------------------------------------------------------------------

/// Streaming generation with memory.
///
/// The generation runs on its own task and forwards each chunk through a
/// channel; the event stream ends with the final payload and `[DONE]`.  A
/// client that disconnects makes the next chunk callback fail, which stops
/// the generation.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequestBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let prompt = prompt_of(body)?;
    let (tx, rx) = mpsc::unbounded_channel::<Value>();

    let agent = Arc::clone(&state.agent);
    tokio::spawn(async move {
        let chunk_tx = tx.clone();
        let mut on_chunk = move |chunk: &ChatResponse| -> Result<(), BoxError> {
            if chunk.is_terminal() {
                return Ok(());
            }
            chunk_tx
                .send(chunk_payload(&chunk.text))
                .map_err(|_| "client disconnected".into())
        };

        let payload = match agent.ask_stream_with_memory(&prompt, &mut on_chunk).await {
            Ok(response) => final_payload(
                &response.text,
                &response.finish_reason,
                &response.finish_message,
            ),
            Err(e) => {
                warn!(agent = %agent.name(), error = %e, "stream generation failed");
                error_payload(&e.to_string())
            }
        };
        // The receiver is gone when the client disconnected.
        let _ = tx.send(payload);
    });

    let events = UnboundedReceiverStream::new(rx)
        .map(|payload| Ok(Event::default().data(payload.to_string())))
        .chain(futures::stream::once(async {
            Ok(Event::default().data(STREAM_DONE))
        }))
        .take_until(state.shutdown.clone().cancelled_owned());

    Ok(Sse::new(events))
}

// ---------------------------------------------------------------------------
// POST control endpoints
// ---------------------------------------------------------------------------

pub async fn add_system_message(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SystemMessageBody>, JsonRejection>,
) -> ApiResult<StatusBody> {
    let Json(body) = body?;
    state.agent.add_system_message(&body.context).await?;
    Ok(Json(StatusBody::ok()))
}

/// Invoke the agent's published cancel handle, if any.
pub async fn cancel_stream(State(state): State<Arc<AppState>>) -> Json<StatusBody> {
    let cancelled = state.agent.cancel_stream();
    info!(agent = %state.agent.name(), cancelled, "cancel stream requested");
    let mut body = StatusBody::ok();
    body.message = Some(if cancelled {
        "stream cancelled".to_owned()
    } else {
        "no active stream".to_owned()
    });
    Json(body)
}

/// Acknowledge, then stop the server shortly after.
pub async fn shutdown(State(state): State<Arc<AppState>>) -> Json<StatusBody> {
    info!(agent = %state.agent.name(), "shutdown requested over http");
    let token = state.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_ACK_DELAY).await;
        token.cancel();
    });
    Json(StatusBody::new("shutting down"))
}
