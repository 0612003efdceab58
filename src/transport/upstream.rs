use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::{HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::protocol::UpstreamEnvelope;
use crate::stream::sse::sse_payload_stream;
use crate::util::sanitize_upstream_error;

/// Upper bound on how much of a non-2xx body is read for the log line.
const ERROR_BODY_PREFIX_BYTES: usize = 4 * 1024;

fn build_reqwest_client(
    connect_timeout: Duration,
    read_timeout: Duration,
    use_env_proxy: bool,
) -> Result<reqwest::Client, RelayError> {
    let mut builder = reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .redirect(reqwest::redirect::Policy::none());

    if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Client for the single upstream completion endpoint.
///
/// Every call opens one streaming POST; there is no retry and no fallback.
pub struct UpstreamClient {
    client: reqwest::Client,
    url: url::Url,
    user_agent: HeaderValue,
}

impl UpstreamClient {
    /// Build the client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the URL or user agent is unusable or
    /// the HTTP client cannot be constructed.
    pub fn new(config: &AppConfig) -> Result<Self, RelayError> {
        let url = url::Url::parse(&config.upstream.url)
            .map_err(|err| RelayError::Config(format!("Invalid upstream url: {err}")))?;
        let user_agent = HeaderValue::from_str(&config.upstream.user_agent)
            .map_err(|err| RelayError::Config(format!("Invalid upstream user_agent: {err}")))?;
        let client = build_reqwest_client(
            Duration::from_secs(config.server.connect_timeout_secs),
            Duration::from_secs(config.server.upstream_read_timeout_secs),
            config.server.http_use_env_proxy,
        )?;
        Ok(Self {
            client,
            url,
            user_agent,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// POST the envelope and return the response once a 2xx status arrives.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UpstreamTransport`] when the request cannot be
    /// sent and [`RelayError::UpstreamStatus`] for any non-2xx status.
    pub async fn open(&self, envelope: &UpstreamEnvelope) -> Result<reqwest::Response, RelayError> {
        let body = serde_json::to_vec(envelope)
            .map_err(|err| RelayError::Internal(format!("Failed to encode upstream body: {err}")))?;

        tracing::debug!(
            url = %self.url,
            model = %envelope.body.model,
            env_type = %envelope.env_type,
            "sending upstream completion request"
        );

        let response = self
            .client
            .post(self.url.clone())
            .header(USER_AGENT, self.user_agent.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .body(body)
            .send()
            .await
            .map_err(|err| RelayError::UpstreamTransport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = read_body_prefix(response.bytes_stream(), ERROR_BODY_PREFIX_BYTES).await;
        let message = sanitize_upstream_error(&body);
        tracing::warn!(
            status = status.as_u16(),
            error = %message,
            "upstream returned error status"
        );
        Err(RelayError::UpstreamStatus {
            status: status.as_u16(),
            message,
        })
    }

    /// Open the upstream stream and split its body into `data:` payloads.
    ///
    /// # Errors
    ///
    /// Same as [`UpstreamClient::open`]; failures after the status line are
    /// yielded as stream items instead.
    pub async fn payloads(
        &self,
        envelope: &UpstreamEnvelope,
    ) -> Result<impl Stream<Item = Result<String, RelayError>> + Send + 'static, RelayError> {
        let response = self.open(envelope).await?;
        Ok(sse_payload_stream(response.bytes_stream()))
    }
}

/// Collect at most `cap` bytes of a body, stopping at the first read error.
async fn read_body_prefix<S, E>(body: S, cap: usize) -> Vec<u8>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let mut body = std::pin::pin!(body);
    let mut out = Vec::new();
    while out.len() < cap {
        let Some(Ok(chunk)) = body.next().await else {
            break;
        };
        let take = chunk.len().min(cap - out.len());
        out.extend_from_slice(&chunk[..take]);
    }
    out
}
