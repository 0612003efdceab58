pub mod validation;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Environment variable naming the YAML config file.
pub const CONFIG_PATH_ENV: &str = "SNOVA_RELAY_CONFIG";
/// Environment variable overriding `upstream.url`.
pub const UPSTREAM_URL_ENV: &str = "API_URL";
/// Environment variable overriding `server.port`.
pub const PORT_ENV: &str = "PORT";

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_path: String,
    /// Empty means any origin is allowed.
    pub cors_allowed_origins: Vec<String>,
    pub connect_timeout_secs: u64,
    /// Upper bound on the wait for any single read from the upstream body.
    pub upstream_read_timeout_secs: u64,
    pub stream_channel_capacity: usize,
    pub http_use_env_proxy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
}

fn default_port() -> u16 {
    8989
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_upstream_read_timeout_secs() -> u64 {
    120
}
fn default_stream_channel_capacity() -> usize {
    32
}

#[derive(Debug, Deserialize)]
struct ServerConfigWire {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    base_path: String,
    #[serde(default)]
    cors_allowed_origins: Vec<String>,
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,
    #[serde(default = "default_upstream_read_timeout_secs")]
    upstream_read_timeout_secs: u64,
    #[serde(default = "default_stream_channel_capacity")]
    stream_channel_capacity: usize,
    #[serde(default)]
    http_use_env_proxy: bool,
    #[serde(default)]
    runtime_worker_threads: Option<RuntimeThreadsSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuntimeThreadsSetting {
    Fixed(usize),
    Auto(()),
}

impl<'de> Deserialize<'de> for ServerConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = ServerConfigWire::deserialize(deserializer)?;
        Ok(Self {
            host: wire.host,
            port: wire.port,
            base_path: wire.base_path,
            cors_allowed_origins: wire.cors_allowed_origins,
            connect_timeout_secs: wire.connect_timeout_secs,
            upstream_read_timeout_secs: wire.upstream_read_timeout_secs,
            stream_channel_capacity: wire.stream_channel_capacity,
            http_use_env_proxy: wire.http_use_env_proxy,
            // explicit null => tokio picks
            runtime_worker_threads: match wire.runtime_worker_threads {
                Some(RuntimeThreadsSetting::Fixed(threads)) => Some(threads),
                Some(RuntimeThreadsSetting::Auto(())) | None => None,
            },
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: String::new(),
            cors_allowed_origins: Vec::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            upstream_read_timeout_secs: default_upstream_read_timeout_secs(),
            stream_channel_capacity: default_stream_channel_capacity(),
            http_use_env_proxy: false,
            runtime_worker_threads: None,
        }
    }
}

/// The single upstream completion endpoint and how requests are shaped for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_model_prefix")]
    pub model_prefix: String,
    #[serde(default = "default_env_type_prefix")]
    pub env_type_prefix: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_stop")]
    pub stop: Vec<String>,
}

fn default_upstream_url() -> String {
    "https://fast.snova.ai/api/completion".to_string()
}
fn default_user_agent() -> String {
    "Apifox/1.0.0 (https://apifox.com)".to_string()
}
fn default_model() -> String {
    "405b".to_string()
}
fn default_model_prefix() -> String {
    "llama3-".to_string()
}
fn default_env_type_prefix() -> String {
    "tp16".to_string()
}
fn default_max_tokens() -> u32 {
    800
}
fn default_stop() -> Vec<String> {
    vec!["<|eot_id|>".to_string()]
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            user_agent: default_user_agent(),
            default_model: default_model(),
            model_prefix: default_model_prefix(),
            env_type_prefix: default_env_type_prefix(),
            max_tokens: default_max_tokens(),
            stop: default_stop(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Append `data: [DONE]` after the forwarded payloads in streaming mode.
    #[serde(default)]
    pub emit_done_sentinel: bool,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            emit_done_sentinel: false,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Apply `API_URL` / `PORT` style overrides through a lookup function.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the port override is not a valid port.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(UPSTREAM_URL_ENV).filter(|url| !url.trim().is_empty()) {
            self.upstream.url = url.trim().to_string();
        }
        if let Some(port) = lookup(PORT_ENV).filter(|port| !port.trim().is_empty()) {
            self.server.port = port.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("{PORT_ENV} must be a valid port, got '{port}'"))
            })?;
        }
        Ok(())
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Resolve the process configuration: YAML file (or defaults when the file is
/// missing), then environment overrides, then validation.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the file exists but cannot be read or parsed,
/// or when the final configuration is invalid.
pub fn load_from_env() -> Result<AppConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = if Path::new(&path).exists() {
        let contents = std::fs::read_to_string(&path)?;
        serde_yaml::from_str(&contents)?
    } else {
        eprintln!("Config file '{path}' not found, using defaults");
        AppConfig::default()
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 8989);
        assert_eq!(config.upstream.url, "https://fast.snova.ai/api/completion");
        assert_eq!(config.upstream.stop, vec!["<|eot_id|>".to_string()]);
        assert_eq!(config.upstream.max_tokens, 800);
        assert!(!config.features.emit_done_sentinel);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.port, 8989);
        assert_eq!(config.upstream.default_model, "405b");
        assert_eq!(config.upstream.model_prefix, "llama3-");
        assert_eq!(config.upstream.env_type_prefix, "tp16");
        assert_eq!(config.features.log_format, LogFormat::Text);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_runtime_worker_threads_null_means_auto() {
        let config: AppConfig =
            serde_yaml::from_str("server:\n  runtime_worker_threads: null\n").unwrap();
        assert_eq!(config.server.runtime_worker_threads, None);
        let config: AppConfig =
            serde_yaml::from_str("server:\n  runtime_worker_threads: 2\n").unwrap();
        assert_eq!(config.server.runtime_worker_threads, Some(2));
    }

    #[test]
    fn test_api_url_override() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| match key {
                UPSTREAM_URL_ENV => Some("http://127.0.0.1:9000/api/completion".to_string()),
                PORT_ENV => Some("10000".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.upstream.url, "http://127.0.0.1:9000/api/completion");
        assert_eq!(config.server.port, 10000);
    }

    #[test]
    fn test_blank_override_is_ignored() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| (key == UPSTREAM_URL_ENV).then(|| "  ".to_string()))
            .unwrap();
        assert_eq!(config.upstream.url, default_upstream_url());
    }

    #[test]
    fn test_bad_port_override_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(|key| (key == PORT_ENV).then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_log_format_serde() {
        let json = serde_json::to_string(&LogFormat::Json).unwrap();
        assert_eq!(json, "\"json\"");
        let format: LogFormat = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(format, LogFormat::Text);
    }
}
