//! HTTP server for snip chat agents.
//!
//! This crate publishes any [`snip_agent::ChatOps`] agent over HTTP:
//!
//! - Fixed JSON endpoints for health, agent information, history, chat and
//!   system messages.
//! - A server-sent event endpoint streaming generations chunk by chunk.
//! - Stream cancellation and an optional shutdown endpoint.
//!
//! Paths are configured through [`snip_agent::EndpointPaths`]; the remote
//! agent in `snip-agent` speaks the same protocol.

pub mod api;
pub mod error;
pub mod server;
pub mod state;

pub use error::{ApiError, Result, ServerError};
pub use server::{ChatServer, SHUTDOWN_GRACE, ServerConfig};
pub use state::AppState;
