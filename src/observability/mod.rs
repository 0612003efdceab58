use std::time::Instant;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::protocol::Usage;

/// Config log level mapped onto a tracing filter directive.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> `None`, no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
#[must_use]
pub fn tracing_directive(log_level: &str) -> Option<String> {
    let level = log_level.trim().to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Initialize the tracing subscriber with the configured level and format.
pub fn init_tracing(log_level: &str, format: LogFormat) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .init(),
    }
}

/// Log the outcome of a finished completion, in either response mode.
pub fn log_request_complete(
    model: &str,
    content_len: usize,
    usage: Option<&Usage>,
    start_time: Instant,
) {
    info!(
        model = model,
        content_len = content_len,
        prompt_tokens = usage.and_then(|u| u.prompt_tokens).unwrap_or(0),
        completion_tokens = usage.and_then(|u| u.completion_tokens).unwrap_or(0),
        total_tokens = usage.and_then(|u| u.total_tokens).unwrap_or(0),
        elapsed_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request completed"
    );
}
