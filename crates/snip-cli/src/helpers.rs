//! Shared helper functions used across CLI subcommands.

use std::io::Write;

use snip_agent::{BoxError, ChatResponse, EnvConfig};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `SNIP_LOG_LEVEL` selects the level,
/// and logging stays off when neither is set.
pub fn init_tracing(env: &EnvConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(env.log_level.as_filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Chunk callback printing each chunk to stdout as it arrives.
pub fn print_chunk(chunk: &ChatResponse) -> Result<(), BoxError> {
    let mut out = std::io::stdout().lock();
    if chunk.is_terminal() {
        writeln!(out)?;
    } else {
        write!(out, "{}", chunk.text)?;
    }
    out.flush()?;
    Ok(())
}
