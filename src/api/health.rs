use axum::response::Json;
use serde_json::{json, Value};

/// Liveness check.
pub async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
