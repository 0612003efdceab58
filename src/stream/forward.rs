//! Incremental forwarding of upstream payloads to a streaming client.
//!
//! A producer task reads the upstream payload stream and pushes framed bytes
//! into a bounded channel; the response body drains the receiver. Dropping
//! the body (client disconnect) closes the channel, which stops the producer
//! and drops the upstream response with it.

use std::convert::Infallible;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::error::RelayError;
use crate::observability::log_request_complete;
use crate::protocol::{decode_chunk, Usage};

use super::sse::{data_frame, done_frame, error_frame};

/// How a forwarded stream is framed and bounded.
#[derive(Debug, Clone)]
pub struct ForwardOptions {
    pub channel_capacity: usize,
    pub emit_done_sentinel: bool,
    /// Model id used for the completion log line.
    pub model: String,
    pub started: Instant,
}

/// Spawn the producer and return the body stream feeding the response.
///
/// Every payload is validated as a completion chunk and re-emitted verbatim
/// as one `data:` frame. The first failure (transport or decode) is reported
/// in a single error frame and ends the stream.
pub fn forward_payloads<S>(
    payloads: S,
    options: ForwardOptions,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<String, RelayError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Bytes>(options.channel_capacity.max(1));
    tokio::spawn(produce(payloads, tx, options).in_current_span());
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok(frame), rx))
    })
}

async fn produce<S>(payloads: S, tx: mpsc::Sender<Bytes>, options: ForwardOptions)
where
    S: Stream<Item = Result<String, RelayError>> + Send,
{
    let mut payloads = std::pin::pin!(payloads);
    let mut frames = 0usize;
    let mut content_len = 0usize;
    let mut usage: Option<Usage> = None;

    loop {
        let next = tokio::select! {
            biased;
            () = tx.closed() => {
                tracing::debug!(frames, "client disconnected, dropping upstream stream");
                return;
            }
            next = payloads.next() => next,
        };
        let Some(item) = next else {
            break;
        };

        let decoded = item.and_then(|payload| {
            let chunk = decode_chunk(&payload)?;
            Ok((payload, chunk))
        });
        let payload = match decoded {
            Ok((payload, chunk)) => {
                content_len += chunk.first_content().map_or(0, str::len);
                if chunk.usage.is_some() {
                    usage = chunk.usage;
                }
                payload
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    frames,
                    "upstream stream failed after headers were sent"
                );
                let frame = error_frame(http::StatusCode::BAD_GATEWAY, &err.public_message());
                let _ = tx.send(Bytes::from(frame)).await;
                return;
            }
        };

        if tx.send(Bytes::from(data_frame(&payload))).await.is_err() {
            tracing::debug!(frames, "client disconnected, dropping upstream stream");
            return;
        }
        frames += 1;
    }

    if options.emit_done_sentinel && tx.send(Bytes::from(done_frame())).await.is_err() {
        return;
    }
    tracing::debug!(frames, "upstream stream forwarded");
    log_request_complete(&options.model, content_len, usage.as_ref(), options.started);
}
