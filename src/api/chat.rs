use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use tracing::Instrument;

use crate::aggregate::aggregate_payloads;
use crate::error::{ErrorCategory, RelayError};
use crate::observability::log_request_complete;
use crate::protocol::{CompletionRequest, UpstreamEnvelope};
use crate::state::AppState;
use crate::stream::{forward_payloads, ForwardOptions};

/// `POST /v1/chat/completions`.
///
/// The response mode is fixed by the request's `stream` flag: `true` relays
/// the upstream events as they arrive, anything else returns one aggregated
/// JSON completion.
pub async fn chat_completions_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request_id = state.next_request_id();
    let span = tracing::info_span!("chat_completion", request_id = %request_id);
    async move {
        match handle_chat_completion(&state, &body).await {
            Ok(response) => response,
            Err(err) => {
                if err.category() == ErrorCategory::InvalidRequest {
                    tracing::warn!(error = %err, "rejected chat completion request");
                } else {
                    tracing::error!(error = %err, "chat completion failed");
                }
                err.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

async fn handle_chat_completion(state: &AppState, body: &[u8]) -> Result<Response, RelayError> {
    let started = Instant::now();
    let request = CompletionRequest::from_slice(body)?;
    let stream = request.wants_stream();
    let model = request
        .model_or(&state.config.upstream.default_model)
        .to_string();

    tracing::info!(
        model = %model,
        messages = request.messages.len(),
        stream,
        "chat completion request"
    );

    let envelope = UpstreamEnvelope::from_request(request, &state.config.upstream);
    let payloads = state.upstream.payloads(&envelope).await?;

    if stream {
        let frames = forward_payloads(
            payloads,
            ForwardOptions {
                channel_capacity: state.config.server.stream_channel_capacity,
                emit_done_sentinel: state.config.features.emit_done_sentinel,
                model,
                started,
            },
        );
        return Ok(sse_ok_response(Body::from_stream(frames)));
    }

    let completion = aggregate_payloads(payloads).await?;
    let content_len = completion.first_content().map_or(0, str::len);
    log_request_complete(&model, content_len, completion.usage.as_ref(), started);
    Ok(Json(completion).into_response())
}

fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
