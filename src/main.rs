use std::sync::Arc;

use snova_relay::config::{load_from_env, AppConfig};
use snova_relay::observability::init_tracing;
use snova_relay::server::{build_router, normalize_base_path, shutdown_signal};
use snova_relay::state::AppState;

fn main() {
    let config = load_from_env().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("See 'config.example.yaml' for the available settings.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level, config.features.log_format);
    let runtime = build_runtime(&config);

    runtime.block_on(async move {
        run(config).await;
    });
}

fn build_runtime(config: &AppConfig) -> tokio::runtime::Runtime {
    let worker_threads = config.server.runtime_worker_threads;
    let mut runtime_builder = if worker_threads == Some(1) {
        tokio::runtime::Builder::new_current_thread()
    } else {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(threads) = worker_threads {
            builder.worker_threads(threads);
        }
        builder
    };
    runtime_builder.enable_io();
    runtime_builder.enable_time();
    runtime_builder.build().unwrap_or_else(|e| {
        eprintln!("Failed to initialize Tokio runtime: {e}");
        std::process::exit(1);
    })
}

async fn run(config: AppConfig) {
    let host = config.server.host.clone();
    let port = config.server.port;
    let base_path = normalize_base_path(&config.server.base_path);

    let state = AppState::new(config).unwrap_or_else(|err| {
        eprintln!("Failed to initialize relay: {err}");
        std::process::exit(1);
    });
    let app = build_router(Arc::new(state));

    tracing::info!(
        "snova-relay starting on {}:{} with base_path='{}'",
        host,
        port,
        base_path
    );

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}"))
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to bind to {host}:{port}: {err}");
            std::process::exit(1);
        });

    tracing::info!("snova-relay is ready to accept connections");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("server error: {err}");
        std::process::exit(1);
    }
    tracing::info!("snova-relay stopped");
}
