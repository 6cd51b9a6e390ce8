//! Integration tests for configuration management
//!
//! These load real files from disk and check that the loaded config is
//! usable by the rest of the engine.

use cove_engine::config::Config;
use cove_engine::executor::BoundedExecutor;
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, extra: &str) -> std::path::PathBuf {
    let workspace = dir.path().join("ws");
    let data_dir = dir.path().join("data");
    let contents = format!(
        r#"
[core]
workspace = "{}"
data_dir = "{}"
log_level = "debug"

[llm]
base_url = "http://localhost:8000/v1/"
model = "local-model"
temperature = 0.2
context_messages = 3

[server]
port = 9000

[features]
execution = true
file_upload = false
memory = true
{}
"#,
        workspace.display(),
        data_dir.display(),
        extra
    );

    let path = dir.path().join("config.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_load_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, "");

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.llm.base_url, "http://localhost:8000/v1");
    assert_eq!(config.llm.model, "local-model");
    assert_eq!(config.llm.context_messages, 3);
    // untouched keys keep their defaults
    assert_eq!(config.llm.max_tokens, 1500);
    assert_eq!(config.llm.history_limit, 10);
    assert_eq!(config.server.host, "0.0.0.0");
    assert!(!config.features.file_upload);

    assert!(config.core.workspace.is_dir());
    assert!(config.core.workspace.is_absolute());
    assert!(config.core.data_dir.is_dir());
    assert_eq!(config.database_path(), config.core.data_dir.join("cove.db"));
}

#[test]
fn test_executor_section() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        &temp_dir,
        r#"
[executor]
shell_timeout_secs = 3
python_timeout_secs = 4
shell_allowlist = ["echo", "ls"]
"#,
    );

    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.executor.shell_timeout_secs, 3);
    assert_eq!(config.executor.python_timeout_secs, 4);
    assert_eq!(config.executor.shell_allowlist, vec!["echo", "ls"]);
}

#[tokio::test]
async fn test_loaded_config_drives_executor() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        &temp_dir,
        r#"
[executor]
shell_allowlist = ["echo"]
"#,
    );
    let config = Config::load_from_path(&path).unwrap();
    let executor = BoundedExecutor::from_config(&config.executor, &config.core.workspace);

    assert!(executor.execute("echo ok", "bash").await.success);
    assert!(!executor.execute("pwd", "bash").await.success);
}

#[test]
fn test_invalid_files_are_rejected() {
    let temp_dir = TempDir::new().unwrap();

    let path = write_config(&temp_dir, "[core]\nlog_level = \"loud\"");
    // duplicate [core] table
    assert!(Config::load_from_path(&path).is_err());

    let path = temp_dir.path().join("bad.toml");
    fs::write(&path, "[llm]\ntemperature = 3.5\n").unwrap();
    assert!(Config::load_from_path(&path).is_err());

    assert!(Config::load_from_path(&temp_dir.path().join("missing.toml")).is_err());
}

#[test]
fn test_saved_file_never_contains_api_key() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, "");

    let mut config = Config::load_from_path(&path).unwrap();
    config
        .apply_env_overrides(|key| match key {
            "LLM_API_KEY" => Some("sk-secret".to_string()),
            _ => None,
        })
        .unwrap();
    assert!(config.llm.api_key.is_some());

    let serialized = toml::to_string_pretty(&config).unwrap();
    assert!(!serialized.contains("sk-secret"));
    assert!(!format!("{:?}", config).contains("sk-secret"));

    let reparsed = Config::from_toml(&serialized).unwrap();
    assert!(reparsed.llm.api_key.is_none());
    assert_eq!(reparsed.llm.model, config.llm.model);
}
