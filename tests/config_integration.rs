use mcp_tool_loop::config::{AppConfig, TransportKind};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::time::Duration;

const BIN: &str = "mcp-tools-server";

// Clear variables a developer shell might carry into the test run.
fn clear_env_vars() {
    unsafe {
        env::remove_var("MCP_SERVER__PORT");
        env::remove_var("MCP_SERVER__TRANSPORT");
        env::remove_var("MCP_TIMEOUTS__APPROVAL_SECS");
        env::remove_var("CONFIG_FILE");
    }
}

fn yaml_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp config");
    file
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8000);
    assert_eq!(config.server.transport, TransportKind::Sse);
    assert_eq!(config.server.name, "Sample Server");
    assert_eq!(config.client.sse_url, "http://127.0.0.1:8000/sse");
    assert_eq!(config.client.server_args, ["--transport", "stdio"]);
    assert_eq!(config.timeouts.request(), Duration::from_secs(30));
    assert_eq!(config.timeouts.approval(), Some(Duration::from_secs(300)));
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("MCP_SERVER__PORT", "9090");
        env::set_var("MCP_TIMEOUTS__APPROVAL_SECS", "0");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.timeouts.approval(), None);

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_beats_env() {
    clear_env_vars();
    unsafe {
        env::set_var("MCP_SERVER__PORT", "9090");
        env::set_var("MCP_SERVER__TRANSPORT", "sse");
    }

    let config = AppConfig::load_from_args([BIN, "--port", "7000", "--transport", "stdio"])
        .expect("Failed to load config");
    assert_eq!(config.server.port, 7000);
    assert_eq!(config.server.transport, TransportKind::Stdio);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let file = yaml_file(
        r#"
server:
  port: 7070
  name: "Calculator Host"
client:
  server_command: "/opt/mcp/bin/mcp-tools-server"
"#,
    );
    let path = file.path().to_string_lossy().into_owned();

    let config =
        AppConfig::load_from_args([BIN, "--config", path.as_str()]).expect("Failed to load config");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.server.name, "Calculator Host");
    // Untouched keys keep their defaults.
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(
        config.client.resolve_server_command(),
        "/opt/mcp/bin/mcp-tools-server"
    );
}

#[test]
#[serial]
fn test_config_file_from_env_and_env_beats_file() {
    clear_env_vars();

    let file = yaml_file("server:\n  port: 7070\n  transport: stdio\n");
    unsafe {
        env::set_var("CONFIG_FILE", file.path());
        env::set_var("MCP_SERVER__PORT", "6060");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.server.port, 6060);
    assert_eq!(config.server.transport, TransportKind::Stdio);

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env_vars();

    let result = AppConfig::load_from_args([BIN, "--config", "/nonexistent/mcp-tool-loop.yaml"]);
    assert!(result.is_err());
}
