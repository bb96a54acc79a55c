//! CLI argument definitions for snip.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// snip -- conversational agents on OpenAI-compatible engines.
#[derive(Parser)]
#[command(
    name = "snip",
    version,
    about = "snip -- conversational agents on OpenAI-compatible engines",
    long_about = "Serve a chat agent over HTTP, or ask a question against a local \
                  engine or a running snip server."
)]
pub struct Cli {
    /// TOML file with [agent], [model] and [server] sections.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Agent identity overrides shared by the subcommands that build an agent.
#[derive(Args, Debug, Clone, Default)]
pub struct AgentArgs {
    /// Agent name.
    #[arg(long)]
    pub name: Option<String>,

    /// System instructions.
    #[arg(long)]
    pub instructions: Option<String>,

    /// Model identifier (defaults to CHAT_MODEL).
    #[arg(long, short)]
    pub model: Option<String>,

    /// Engine base URL (defaults to MODEL_RUNNER_BASE_URL).
    #[arg(long)]
    pub engine_url: Option<String>,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f32>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve a chat agent over HTTP.
    Serve {
        #[command(flatten)]
        agent: AgentArgs,

        /// Address to bind the HTTP server to.
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on.
        #[arg(long, short)]
        port: Option<u16>,

        /// Enable the shutdown endpoint at this path.
        #[arg(long)]
        shutdown_path: Option<String>,
    },

    /// Ask one question and print the answer.
    Ask {
        /// The question.
        prompt: String,

        #[command(flatten)]
        agent: AgentArgs,

        /// Ask a running snip server instead of a local engine.
        #[arg(long)]
        remote: Option<String>,

        /// Print the answer as it is generated.
        #[arg(long, short)]
        stream: bool,
    },

    /// Print the information of a running snip server.
    Info {
        /// Base URL of the server.
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        remote: String,
    },
}
