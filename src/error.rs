use crate::protocol::error_shapes::openai_error_payload;

/// Error type shared by the relay pipeline and its HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream transport error: {0}")]
    UpstreamTransport(String),
    #[error("Upstream error: status={status}")]
    UpstreamStatus { status: u16, message: String },
    #[error("Upstream protocol error: {0}")]
    UpstreamProtocol(String),
    #[error("Upstream returned no content")]
    EmptyStream,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Upstream,
    ServerError,
}

impl RelayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            RelayError::UpstreamTransport(_)
            | RelayError::UpstreamStatus { .. }
            | RelayError::UpstreamProtocol(_)
            | RelayError::EmptyStream => ErrorCategory::Upstream,
            RelayError::Config(_) | RelayError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    /// Message safe to show to the caller. Upstream payloads and internal
    /// detail stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            RelayError::InvalidRequest(_) => self.to_string(),
            RelayError::UpstreamTransport(_) => "Failed to reach the upstream service".to_string(),
            RelayError::UpstreamStatus { status, .. } => {
                format!("Upstream service returned status {status}")
            }
            RelayError::UpstreamProtocol(_) => {
                "Upstream service returned a malformed response".to_string()
            }
            RelayError::EmptyStream => "Upstream service returned no content".to_string(),
            RelayError::Config(_) | RelayError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code
// ---------------------------------------------------------------------------

#[must_use]
pub fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Upstream => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Format an error as `(status_code, JSON body)`.
#[must_use]
pub fn format_error(err: &RelayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = http_status_for_category(cat);
    (status, openai_error_payload(cat, &err.public_message()))
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

impl axum::response::IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_errors_are_bad_gateway() {
        for err in [
            RelayError::UpstreamTransport("connection refused".into()),
            RelayError::UpstreamStatus {
                status: 503,
                message: "overloaded".into(),
            },
            RelayError::UpstreamProtocol("expected value".into()),
            RelayError::EmptyStream,
        ] {
            let (status, body) = format_error(&err);
            assert_eq!(status, http::StatusCode::BAD_GATEWAY);
            assert_eq!(body["error"]["type"], "upstream_error");
        }
    }

    #[test]
    fn test_invalid_request_is_bad_request() {
        let (status, body) = format_error(&RelayError::InvalidRequest("missing messages".into()));
        assert_eq!(status, http::StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("missing messages"));
    }

    #[test]
    fn test_upstream_body_is_not_leaked() {
        let err = RelayError::UpstreamStatus {
            status: 500,
            message: "Traceback (most recent call last): secret".into(),
        };
        let (_, body) = format_error(&err);
        let message = body["error"]["message"].as_str().unwrap();
        assert!(!message.contains("Traceback"));
        assert!(message.contains("500"));
    }

    #[test]
    fn test_empty_stream_message() {
        let (_, body) = format_error(&RelayError::EmptyStream);
        assert_eq!(
            body["error"]["message"],
            "Upstream service returned no content"
        );
    }

    #[test]
    fn test_internal_is_server_error() {
        let (status, body) = format_error(&RelayError::Internal("join error".into()));
        assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["type"], "server_error");
    }
}
