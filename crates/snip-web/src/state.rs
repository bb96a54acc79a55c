//! Shared application state for the chat server.
//!
//! [`AppState`] is wrapped in an `Arc` and shared across all request
//! handlers.  The agent owns its own message lock, so handlers call it
//! concurrently without further coordination.

use std::sync::Arc;

use snip_agent::ChatOps;
use tokio_util::sync::CancellationToken;

/// Shared state accessible from every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// The agent whose capabilities are published.
    pub agent: Arc<dyn ChatOps>,

    /// Cancelled to stop the server; streams in flight end with it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(agent: Arc<dyn ChatOps>, shutdown: CancellationToken) -> Self {
        Self { agent, shutdown }
    }
}
