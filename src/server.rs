use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::chat::chat_completions_handler;
use crate::api::health::health_handler;
use crate::api::not_found_handler;
use crate::state::AppState;

const REQUEST_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

/// Build the HTTP application: routes (optionally under `server.base_path`),
/// CORS, request tracing and the body size limit.
pub fn build_router(state: Arc<AppState>) -> Router {
    let base_path = normalize_base_path(&state.config.server.base_path);
    let cors = create_cors_layer(&state.config.server.cors_allowed_origins);

    let routes = Router::new()
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/health", get(health_handler));
    let routes = if base_path.is_empty() {
        routes
    } else {
        Router::new().nest(&base_path, routes)
    };

    routes
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(REQUEST_BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn create_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
            .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
    };

    cors.max_age(Duration::from_secs(3600))
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        },
        () = terminate => {
            tracing::info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
