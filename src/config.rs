//! Layered configuration.
//!
//! Precedence, lowest first: built-in defaults, an optional config file
//! (`--config` / `CONFIG_FILE`, else `./mcp-tool-loop.{yaml,toml,json}` when
//! present), `MCP_`-prefixed environment variables (`MCP_SERVER__PORT=9000`),
//! then command-line flags.
//!
//! LLM settings are read separately from `LLM_*` variables, see
//! [`load_llm_settings`].

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::llm::LlmSettings;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_STEM: &str = "mcp-tool-loop";

/// Binary name of the tool host, spawned by the stdio client.
pub const SERVER_BINARY: &str = "mcp-tools-server";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind the SSE server to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Transport the server speaks
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
}

impl TransportKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    /// Name reported in `serverInfo`.
    pub name: String,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub sse_url: String,
    /// Server executable for the stdio client. Defaults to the
    /// `mcp-tools-server` binary next to the running executable.
    #[serde(default)]
    pub server_command: Option<String>,
    #[serde(default = "default_server_args")]
    pub server_args: Vec<String>,
}

fn default_server_args() -> Vec<String> {
    vec!["--transport".to_string(), "stdio".to_string()]
}

impl ClientConfig {
    pub fn resolve_server_command(&self) -> String {
        if let Some(command) = &self.server_command {
            return command.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(SERVER_BINARY)))
            .filter(|path| path.exists())
            .unwrap_or_else(|| PathBuf::from(SERVER_BINARY))
            .to_string_lossy()
            .into_owned()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    pub request_secs: u64,
    pub connect_secs: u64,
    pub approval_secs: u64,
    pub completion_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    /// `0` disables the approval timeout.
    pub fn approval(&self) -> Option<Duration> {
        (self.approval_secs > 0).then(|| Duration::from_secs(self.approval_secs))
    }

    pub fn completion(&self) -> Duration {
        Duration::from_secs(self.completion_secs)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8000)?
            .set_default("server.transport", "sse")?
            .set_default("server.name", "Sample Server")?
            .set_default("client.sse_url", "http://127.0.0.1:8000/sse")?
            .set_default("timeouts.request_secs", 30)?
            .set_default("timeouts.connect_secs", 10)?
            .set_default("timeouts.approval_secs", 300)?
            .set_default("timeouts.completion_secs", 120)?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_STEM).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("MCP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(transport) = cli.transport {
            builder = builder.set_override("server.transport", transport.as_str())?;
        }

        builder.build()?.try_deserialize()
    }
}

/// Read LLM settings from the process environment.
pub fn load_llm_settings(timeouts: &TimeoutConfig) -> Result<LlmSettings, String> {
    load_llm_settings_from(|key| std::env::var(key).ok(), timeouts)
}

/// Read LLM settings through `lookup`.
///
/// `LLM_BASE_URL` defaults to `https://api.openai.com`, `LLM_MODEL` to
/// `gpt-4o`; `LLM_API_KEY` falls back to `OPENAI_API_KEY`.
pub fn load_llm_settings_from(
    lookup: impl Fn(&str) -> Option<String>,
    timeouts: &TimeoutConfig,
) -> Result<LlmSettings, String> {
    let base_url = lookup("LLM_BASE_URL").unwrap_or_else(|| "https://api.openai.com".to_string());
    if base_url.trim().is_empty() {
        return Err("LLM_BASE_URL cannot be empty".to_string());
    }

    let model = lookup("LLM_MODEL").unwrap_or_else(|| "gpt-4o".to_string());
    if model.trim().is_empty() {
        return Err("LLM_MODEL cannot be empty".to_string());
    }

    let api_key = lookup("LLM_API_KEY")
        .or_else(|| lookup("OPENAI_API_KEY"))
        .filter(|s| !s.trim().is_empty());

    Ok(LlmSettings {
        base_url,
        api_key,
        model,
        request_timeout: timeouts.completion(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn timeouts() -> TimeoutConfig {
        TimeoutConfig {
            request_secs: 30,
            connect_secs: 10,
            approval_secs: 0,
            completion_secs: 120,
        }
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn llm_settings_have_defaults() {
        let settings = load_llm_settings_from(lookup(&[]), &timeouts()).unwrap();
        assert_eq!(settings.base_url, "https://api.openai.com");
        assert_eq!(settings.model, "gpt-4o");
        assert!(settings.api_key.is_none());
        assert_eq!(settings.request_timeout, Duration::from_secs(120));
    }

    #[test]
    fn api_key_falls_back_to_openai_variable() {
        let settings =
            load_llm_settings_from(lookup(&[("OPENAI_API_KEY", "sk-test")]), &timeouts()).unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("sk-test"));

        let settings = load_llm_settings_from(
            lookup(&[("OPENAI_API_KEY", "sk-test"), ("LLM_API_KEY", "sk-llm")]),
            &timeouts(),
        )
        .unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("sk-llm"));
    }

    #[test]
    fn empty_model_is_rejected() {
        let err = load_llm_settings_from(lookup(&[("LLM_MODEL", " ")]), &timeouts()).unwrap_err();
        assert_eq!(err, "LLM_MODEL cannot be empty");
    }

    #[test]
    fn zero_disables_approval_timeout() {
        assert_eq!(timeouts().approval(), None);
        let t = TimeoutConfig {
            approval_secs: 5,
            ..timeouts()
        };
        assert_eq!(t.approval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn explicit_server_command_wins() {
        let client = ClientConfig {
            sse_url: String::new(),
            server_command: Some("/opt/bin/server".into()),
            server_args: default_server_args(),
        };
        assert_eq!(client.resolve_server_command(), "/opt/bin/server");
    }
}
