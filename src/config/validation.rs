use super::{AppConfig, ConfigError};

const VALID_LOG_LEVELS: &[&str] = &[
    "TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR", "CRITICAL", "DISABLED",
];

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.port == 0 {
        return Err(validation_err("server.port must be greater than 0"));
    }
    if server.host.trim().is_empty() {
        return Err(validation_err("server.host cannot be empty"));
    }
    if server.connect_timeout_secs == 0 {
        return Err(validation_err(
            "server.connect_timeout_secs must be greater than 0",
        ));
    }
    if server.upstream_read_timeout_secs == 0 {
        return Err(validation_err(
            "server.upstream_read_timeout_secs must be greater than 0",
        ));
    }
    if server.stream_channel_capacity == 0 {
        return Err(validation_err(
            "server.stream_channel_capacity must be greater than 0",
        ));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    for origin in &server.cors_allowed_origins {
        if origin.parse::<http::HeaderValue>().is_err() {
            return Err(validation_err(format!(
                "server.cors_allowed_origins contains an invalid origin '{origin}'"
            )));
        }
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    let parsed = url::Url::parse(&upstream.url)
        .map_err(|e| validation_err(format!("upstream.url is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(
            "upstream.url must start with http:// or https://",
        ));
    }
    if upstream.user_agent.trim().is_empty() {
        return Err(validation_err("upstream.user_agent cannot be empty"));
    }
    if upstream.default_model.trim().is_empty() {
        return Err(validation_err("upstream.default_model cannot be empty"));
    }
    if upstream.model_prefix.is_empty() || upstream.env_type_prefix.is_empty() {
        return Err(validation_err(
            "upstream.model_prefix and upstream.env_type_prefix cannot be empty",
        ));
    }
    if upstream.max_tokens == 0 {
        return Err(validation_err("upstream.max_tokens must be greater than 0"));
    }
    if upstream.stop.is_empty() {
        return Err(validation_err("upstream.stop cannot be empty"));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level '{}' is not one of: {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}
