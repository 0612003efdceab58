use crate::error::ErrorCategory;

fn openai_error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::Upstream => "upstream_error",
        ErrorCategory::ServerError => "server_error",
    }
}

fn openai_error_code(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request",
        ErrorCategory::Upstream => "bad_gateway",
        ErrorCategory::ServerError => "server_error",
    }
}

#[must_use]
pub(crate) fn openai_error_payload(cat: ErrorCategory, message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": message,
            "type": openai_error_type(cat),
            "code": openai_error_code(cat),
            "param": null,
        }
    })
}

/// Body of the error frame sent when a stream fails after headers went out.
#[must_use]
pub(crate) fn stream_error_payload(status: http::StatusCode, message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "status": status.as_u16(),
            "message": message,
        }
    })
}
