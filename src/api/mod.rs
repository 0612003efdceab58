pub mod chat;
pub mod health;

use axum::response::{IntoResponse, Response};

use crate::error::ErrorCategory;
use crate::protocol::error_shapes::openai_error_payload;

/// Fallback for paths outside the route table.
pub async fn not_found_handler() -> Response {
    (
        http::StatusCode::NOT_FOUND,
        axum::Json(openai_error_payload(
            ErrorCategory::InvalidRequest,
            "Not found",
        )),
    )
        .into_response()
}
