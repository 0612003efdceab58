use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::transport::UpstreamClient;
use crate::util::format_request_seq_hex;

/// Shared application state accessible to all handlers. Read-only once built.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: UpstreamClient,
    request_seq: AtomicU64,
}

impl AppState {
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the upstream client cannot be built.
    pub fn new(config: AppConfig) -> Result<Self, RelayError> {
        let upstream = UpstreamClient::new(&config)?;
        tracing::info!(
            upstream_url = upstream.url(),
            default_model = %config.upstream.default_model,
            "relay state initialized"
        );
        Ok(Self {
            config,
            upstream,
            request_seq: AtomicU64::new(1),
        })
    }

    /// Process-unique id used to correlate the log lines of one request.
    pub fn next_request_id(&self) -> String {
        let seq = self.request_seq.fetch_add(1, Ordering::Relaxed);
        format_request_seq_hex("req-", seq)
    }
}
