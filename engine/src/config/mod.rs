//! Configuration management
//!
//! Configuration is stored in TOML format at ~/.cove/config.toml, created
//! with defaults on first start.
//!
//! # Configuration Sections
//!
//! - **core**: Workspace path, data directory, log level
//! - **llm**: Upstream chat-completions endpoint, model and prompt sizing
//! - **server**: Bind address and upload limit for the HTTP API
//! - **features**: Code execution, file upload and conversation memory flags
//! - **executor**: Timeouts and the shell command allowlist
//!
//! # Environment Overrides
//!
//! Applied after the file is read and before validation:
//!
//! | Variable | Field |
//! | --- | --- |
//! | `LLM_API_KEY` | `llm.api_key` (never written to disk) |
//! | `LLM_MODEL` | `llm.model` |
//! | `LLM_BASE_URL` | `llm.base_url` |
//! | `COVE_WORKSPACE` | `core.workspace` |
//! | `PORT` | `server.port` |
//!
//! # Examples
//!
//! ```no_run
//! use cove_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Workspace: {:?}", config.core.workspace);
//! println!("Model: {}", config.llm.model);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::command_executor::DEFAULT_ALLOWLIST;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// LLM upstream configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Feature flags
    #[serde(default)]
    pub features: FeaturesConfig,

    /// Bounded executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Workspace directory path (supports ~ expansion)
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Data directory holding the database (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// API key read from the environment. Never serialized and redacted in
/// debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// LLM upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature (0.0-2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Messages loaded from the store for each chat turn
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,

    /// Trailing history messages forwarded to the model
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,

    /// Set from `LLM_API_KEY` only
    #[serde(skip)]
    pub api_key: Option<ApiKey>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted upload body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Feature flags
///
/// Each flag switches one capability of the assistant. A disabled feature
/// answers its endpoints with a structured error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Run fenced code blocks and serve `/api/execute`
    #[serde(default = "default_true")]
    pub execution: bool,

    /// Accept uploads into the workspace
    #[serde(default = "default_true")]
    pub file_upload: bool,

    /// Persist messages and feed history back to the model
    #[serde(default = "default_true")]
    pub memory: bool,
}

/// Bounded executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,

    #[serde(default = "default_python_timeout")]
    pub python_timeout_secs: u64,

    /// Program names the shell-like path may run
    #[serde(default = "default_shell_allowlist")]
    pub shell_allowlist: Vec<String>,
}

// Default value functions
fn default_workspace() -> PathBuf {
    PathBuf::from("/tmp/cove_workspace")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.cove")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_llm_model() -> String {
    "openrouter/anthropic/claude-3-haiku-20240307".to_string()
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_temperature() -> f64 {
    0.7
}

fn default_llm_timeout() -> u64 {
    30
}

fn default_history_limit() -> i64 {
    10
}

fn default_context_messages() -> usize {
    5
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7860
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_shell_timeout() -> u64 {
    10
}

fn default_python_timeout() -> u64 {
    10
}

fn default_shell_allowlist() -> Vec<String> {
    DEFAULT_ALLOWLIST.iter().map(|s| s.to_string()).collect()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
            history_limit: default_history_limit(),
            context_messages: default_context_messages(),
            api_key: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            execution: true,
            file_upload: true,
            memory: true,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell_timeout_secs: default_shell_timeout(),
            python_timeout_secs: default_python_timeout(),
            shell_allowlist: default_shell_allowlist(),
        }
    }
}

impl FeaturesConfig {
    /// Names of the enabled features, as reported by the health probe
    pub fn enabled(&self) -> Vec<String> {
        let mut features = vec!["chat".to_string(), "novel_writing".to_string()];
        if self.execution {
            features.push("code_execution".to_string());
        }
        if self.file_upload {
            features.push("file_upload".to_string());
        }
        if self.memory {
            features.push("conversation_memory".to_string());
        }
        features
    }
}

impl Config {
    /// Load configuration from the default location (~/.cove/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    /// Environment overrides are applied before validation.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Like [`Config::load_or_create`] with an explicit file location
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Parse TOML without touching the environment or the filesystem
    pub fn from_toml(contents: &str) -> Result<Self, EngineError> {
        toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();

        // Written before env overrides so nothing from the environment lands on disk
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.cove/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".cove").join("config.toml"))
    }

    /// Location of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("cove.db")
    }

    /// Overlay values from the environment. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("LLM_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.llm.api_key = Some(ApiKey::new(key.trim()));
        }
        if let Some(model) = lookup("LLM_MODEL").filter(|m| !m.is_empty()) {
            self.llm.model = model;
        }
        if let Some(base_url) = lookup("LLM_BASE_URL").filter(|u| !u.is_empty()) {
            self.llm.base_url = base_url;
        }
        if let Some(workspace) = lookup("COVE_WORKSPACE").filter(|w| !w.is_empty()) {
            self.core.workspace = PathBuf::from(workspace);
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| EngineError::Config(format!("Invalid PORT '{}'", port)))?;
        }
        Ok(())
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates log level, temperature, timeouts and sizes
    /// - Expands ~ in paths
    /// - Creates and canonicalizes the workspace
    /// - Verifies workspace is a directory
    /// - Creates the data directory
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(EngineError::Config(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.llm.timeout_secs == 0 {
            return Err(EngineError::Config(
                "llm.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.executor.shell_timeout_secs == 0 || self.executor.python_timeout_secs == 0 {
            return Err(EngineError::Config(
                "executor timeouts must be greater than 0".to_string(),
            ));
        }

        if self.llm.base_url.trim().is_empty() || self.llm.model.trim().is_empty() {
            return Err(EngineError::Config(
                "llm.base_url and llm.model must not be empty".to_string(),
            ));
        }
        self.llm.base_url = self.llm.base_url.trim_end_matches('/').to_string();

        if self.server.max_upload_bytes == 0 {
            return Err(EngineError::Config(
                "server.max_upload_bytes must be greater than 0".to_string(),
            ));
        }

        // Expand and validate workspace path
        self.core.workspace = expand_path(&self.core.workspace)?;
        self.core.workspace = canonicalize_or_create(&self.core.workspace)?;

        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LLMConfig::default(),
            server: ServerConfig::default(),
            features: FeaturesConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;
        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize()
        .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    /// Defaults pointed at a scratch directory
    fn scratch_config(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.core.workspace = temp.path().join("workspace");
        config.core.data_dir = temp.path().join("data");
        config
    }

    #[test]
    fn test_default_config_creation() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.core.workspace, PathBuf::from("/tmp/cove_workspace"));
        assert_eq!(config.llm.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(
            config.llm.model,
            "openrouter/anthropic/claude-3-haiku-20240307"
        );
        assert_eq!(config.llm.max_tokens, 1500);
        assert_eq!(config.llm.timeout_secs, 30);
        assert_eq!(config.llm.history_limit, 10);
        assert_eq!(config.llm.context_messages, 5);
        assert_eq!(config.server.port, 7860);
        assert_eq!(config.server.max_upload_bytes, 10 * 1024 * 1024);
        assert!(config.features.execution && config.features.file_upload && config.features.memory);
        assert_eq!(config.executor.shell_allowlist.len(), DEFAULT_ALLOWLIST.len());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml(
            r#"
            [core]
            log_level = "debug"

            [llm]
            model = "gpt-4o-mini"

            [features]
            execution = false
            "#,
        )
        .unwrap();

        assert_eq!(config.core.log_level, "debug");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.temperature, 0.7);
        assert!(!config.features.execution);
        assert!(config.features.memory);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_config_serialization_omits_api_key() {
        let mut config = Config::default();
        config.llm.api_key = Some(ApiKey::new("sk-secret"));

        let toml_string = toml::to_string(&config).unwrap();
        assert!(!toml_string.contains("sk-secret"));
        assert!(!format!("{:?}", config).contains("sk-secret"));

        let deserialized = Config::from_toml(&toml_string).unwrap();
        assert_eq!(config.llm.model, deserialized.llm.model);
        assert!(deserialized.llm.api_key.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[
                ("LLM_API_KEY", " sk-test "),
                ("LLM_MODEL", "mistral/small"),
                ("LLM_BASE_URL", "http://localhost:9999/v1"),
                ("COVE_WORKSPACE", "/srv/ws"),
                ("PORT", "8080"),
            ]))
            .unwrap();

        assert_eq!(config.llm.api_key.as_ref().map(ApiKey::expose), Some("sk-test"));
        assert_eq!(config.llm.model, "mistral/small");
        assert_eq!(config.llm.base_url, "http://localhost:9999/v1");
        assert_eq!(config.core.workspace, PathBuf::from("/srv/ws"));
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[("LLM_API_KEY", "  ")]))
            .unwrap();
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(env(&[("PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_validation_creates_directories() {
        let temp = TempDir::new().unwrap();
        let mut config = scratch_config(&temp);
        config.llm.base_url = "http://example.test/v1/".to_string();

        config.validate_and_process().unwrap();

        assert!(config.core.workspace.is_dir());
        assert!(config.core.workspace.is_absolute());
        assert!(config.core.data_dir.is_dir());
        assert_eq!(config.llm.base_url, "http://example.test/v1");
        assert_eq!(config.database_path(), config.core.data_dir.join("cove.db"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let temp = TempDir::new().unwrap();

        let mut config = scratch_config(&temp);
        config.core.log_level = "loud".to_string();
        assert!(config.validate_and_process().is_err());

        let mut config = scratch_config(&temp);
        config.llm.temperature = 2.5;
        assert!(config.validate_and_process().is_err());

        let mut config = scratch_config(&temp);
        config.executor.python_timeout_secs = 0;
        assert!(config.validate_and_process().is_err());

        let mut config = scratch_config(&temp);
        config.llm.timeout_secs = 0;
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_workspace_must_be_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not_a_dir");
        fs::write(&file, "x").unwrap();

        let mut config = scratch_config(&temp);
        config.core.workspace = file;
        let err = config.validate_and_process().unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_load_from_existing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cfg").join("config.toml");

        // Point the generated file at the scratch dir, then reload it
        let mut config = scratch_config(&temp);
        config.core.log_level = "warn".to_string();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::load_or_create_at(&path).unwrap();
        assert_eq!(loaded.core.log_level, "warn");
        assert!(loaded.core.workspace.starts_with(temp.path().canonicalize().unwrap()));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = expand_path(&PathBuf::from("~/test")).unwrap();
        assert_eq!(expanded, dirs::home_dir().unwrap().join("test"));

        let absolute = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&absolute).unwrap(), absolute);
    }

    #[test]
    fn test_enabled_features() {
        let mut features = FeaturesConfig::default();
        features.file_upload = false;
        let names = features.enabled();
        assert!(names.contains(&"code_execution".to_string()));
        assert!(!names.contains(&"file_upload".to_string()));
    }
}
