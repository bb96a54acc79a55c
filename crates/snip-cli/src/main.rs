//! CLI entry point for snip.
//!
//! This binary provides the `snip` command with subcommands for serving a
//! chat agent over HTTP and asking one-off questions.

mod cli;
mod config;
mod helpers;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use snip_agent::{Agent, ChatAgent, ChatOps, EnvConfig, Flow, RemoteAgent};
use snip_web::ChatServer;
use tracing::info;

use crate::cli::{AgentArgs, Cli, Commands};
use crate::config::FileConfig;
use crate::helpers::{init_tracing, print_chunk};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let env = EnvConfig::from_env();
    init_tracing(&env);

    let file = FileConfig::load_optional(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            agent,
            bind,
            port,
            shutdown_path,
        } => cmd_serve(&file, &env, &agent, bind, port, shutdown_path).await,
        Commands::Ask {
            prompt,
            agent,
            remote,
            stream,
        } => cmd_ask(&file, &env, &agent, remote, stream, &prompt).await,
        Commands::Info { remote } => cmd_info(&remote).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(
    file: &FileConfig,
    env: &EnvConfig,
    args: &AgentArgs,
    bind: Option<String>,
    port: Option<u16>,
    shutdown_path: Option<String>,
) -> Result<()> {
    let agent_config = file.agent_config(args, env);
    let agent = ChatAgent::builder(agent_config)
        .model_config(file.model_config(args))
        .flows(Flow::ALL)
        .log_messages(env.log_messages)
        .build()
        .await
        .context("failed to create chat agent")?;

    let server_config = file.server_config(bind, port, shutdown_path);
    info!(addr = %server_config.addr(), agent = %agent.name(), "serving chat agent");

    ChatServer::new(server_config, Arc::new(agent))
        .serve()
        .await
        .context("chat server failed")
}

// ---------------------------------------------------------------------------
// Subcommand: ask
// ---------------------------------------------------------------------------

async fn cmd_ask(
    file: &FileConfig,
    env: &EnvConfig,
    args: &AgentArgs,
    remote: Option<String>,
    stream: bool,
    prompt: &str,
) -> Result<()> {
    let agent: Box<dyn ChatOps> = match remote {
        Some(url) => Box::new(RemoteAgent::new("remote", url)?),
        None => Box::new(
            ChatAgent::builder(file.agent_config(args, env))
                .model_config(file.model_config(args))
                .flows([Flow::Ask, Flow::AskStream])
                .log_messages(env.log_messages)
                .build()
                .await
                .context("failed to create chat agent")?,
        ),
    };

    if stream {
        let mut on_chunk = print_chunk;
        agent
            .ask_stream(prompt, &mut on_chunk)
            .await
            .context("generation failed")?;
    } else {
        let response = agent.ask(prompt).await.context("generation failed")?;
        println!("{}", response.text);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: info
// ---------------------------------------------------------------------------

async fn cmd_info(remote: &str) -> Result<()> {
    let agent = RemoteAgent::new("remote", remote)?;
    let info = agent
        .info()
        .await
        .with_context(|| format!("failed to query {remote}"))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
