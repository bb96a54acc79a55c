//! Optional TOML configuration file.
//!
//! ```toml
//! [agent]
//! name = "bob"
//! instructions = "You are a helpful assistant."
//! model = "ai/qwen2.5:latest"
//!
//! [model]
//! temperature = 0.0
//!
//! [server]
//! port = 8080
//!
//! [server.paths]
//! shutdown = "/server/shutdown"
//! ```
//!
//! Command line flags override file values, which override the environment.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use snip_agent::{AgentConfig, EndpointPaths, EnvConfig, ModelConfig};
use snip_web::ServerConfig;

use crate::cli::AgentArgs;

const DEFAULT_AGENT_NAME: &str = "snip";

/// The `[agent]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub name: Option<String>,
    pub instructions: Option<String>,
    pub model: Option<String>,
    pub engine_url: Option<String>,
}

/// The `[server]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub paths: EndpointPaths,
}

/// Settings loaded from `--config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub agent: AgentSection,
    pub model: ModelConfig,
    pub server: ServerSection,
}

impl FileConfig {
    /// Parse the file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse `path` if given, else return the defaults.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Agent identity: flags, then file, then environment.
    pub fn agent_config(&self, args: &AgentArgs, env: &EnvConfig) -> AgentConfig {
        let pick = |flag: &Option<String>, file: &Option<String>| {
            flag.clone().or_else(|| file.clone())
        };
        AgentConfig {
            name: pick(&args.name, &self.agent.name).unwrap_or_else(|| DEFAULT_AGENT_NAME.into()),
            system_instructions: pick(&args.instructions, &self.agent.instructions)
                .unwrap_or_default(),
            model_id: pick(&args.model, &self.agent.model)
                .unwrap_or_else(|| env.chat_model.clone()),
            engine_url: pick(&args.engine_url, &self.agent.engine_url)
                .unwrap_or_else(|| env.engine_url.clone()),
        }
    }

    /// Sampling parameters with the flag overrides applied.
    pub fn model_config(&self, args: &AgentArgs) -> ModelConfig {
        let mut config = self.model.clone();
        if let Some(temperature) = args.temperature {
            config = config.temperature(temperature);
        }
        config
    }

    /// Listener settings with the flag overrides applied.
    pub fn server_config(
        &self,
        bind: Option<String>,
        port: Option<u16>,
        shutdown_path: Option<String>,
    ) -> ServerConfig {
        let defaults = ServerConfig::default();
        let mut paths = self.server.paths.clone();
        if let Some(path) = shutdown_path {
            paths.shutdown = path;
        }
        ServerConfig {
            bind_addr: bind
                .or_else(|| self.server.bind.clone())
                .unwrap_or(defaults.bind_addr),
            port: port.or(self.server.port).unwrap_or(defaults.port),
            paths,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use snip_agent::Endpoint;

    use super::*;

    fn env() -> EnvConfig {
        EnvConfig::from_lookup(|key| match key {
            "CHAT_MODEL" => Some("ai/env-model".into()),
            "MODEL_RUNNER_BASE_URL" => Some("http://env:1234/v1".into()),
            _ => None,
        })
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn full_file_is_parsed() {
        let file = write_config(
            r#"
[agent]
name = "bob"
instructions = "Be brief."
model = "ai/file-model"

[model]
temperature = 0.0
max_tokens = 256

[server]
bind = "0.0.0.0"
port = 9090

[server.paths]
shutdown = "/server/shutdown"
messages = "-"
"#,
        );
        let config = FileConfig::load(file.path()).unwrap();

        let agent = config.agent_config(&AgentArgs::default(), &env());
        assert_eq!(agent.name, "bob");
        assert_eq!(agent.system_instructions, "Be brief.");
        assert_eq!(agent.model_id, "ai/file-model");
        assert_eq!(agent.engine_url, "http://env:1234/v1");

        let model = config.model_config(&AgentArgs::default());
        assert_eq!(model.temperature, Some(0.0));
        assert_eq!(model.max_tokens, Some(256));

        let server = config.server_config(None, None, None);
        assert_eq!(server.addr(), "0.0.0.0:9090");
        assert_eq!(
            server.paths.resolve(Endpoint::Shutdown),
            Some("/server/shutdown")
        );
        assert_eq!(server.paths.resolve(Endpoint::Messages), None);
        assert_eq!(server.paths.resolve(Endpoint::Chat), Some("/api/chat"));
    }

    #[test]
    fn flags_override_file_and_env() {
        let file = write_config("[agent]\nmodel = \"ai/file-model\"\n\n[server]\nport = 9090\n");
        let config = FileConfig::load(file.path()).unwrap();
        let args = AgentArgs {
            model: Some("ai/flag-model".into()),
            temperature: Some(0.5),
            ..AgentArgs::default()
        };

        assert_eq!(config.agent_config(&args, &env()).model_id, "ai/flag-model");
        assert_eq!(config.model_config(&args).temperature, Some(0.5));
        assert_eq!(config.server_config(None, Some(7000), None).port, 7000);
    }

    #[test]
    fn missing_file_uses_environment_defaults() {
        let config = FileConfig::load_optional(None).unwrap();
        let agent = config.agent_config(&AgentArgs::default(), &env());
        assert_eq!(agent.name, DEFAULT_AGENT_NAME);
        assert_eq!(agent.model_id, "ai/env-model");
        assert_eq!(config.server_config(None, None, None).addr(), "127.0.0.1:8080");
    }

    #[test]
    fn invalid_file_is_an_error() {
        let file = write_config("[agent\nname = ");
        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("invalid config file"));
    }
}
