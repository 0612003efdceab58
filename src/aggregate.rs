//! Folding a stream of completion chunks into one non-streaming response.

use futures_util::{Stream, StreamExt};

use crate::error::RelayError;
use crate::protocol::{decode_chunk, AggregatedCompletion, ChunkChoice, CompletionChunk};

const DEFAULT_ROLE: &str = "assistant";

/// Incremental aggregator over decoded chunks, fed in arrival order.
///
/// Envelope metadata (id, object, created, model, usage) comes from the last
/// chunk; the choice shape (index, role) from the first chunk's first choice,
/// with the role defaulting to `assistant` when that choice carries none.
/// The provider only sends `finish_reason` on its terminal chunks, so the
/// latest non-null one wins over the first chunk's.
#[derive(Debug, Default)]
pub struct Aggregator {
    content: String,
    chunk_count: usize,
    first_choice: Option<ChunkChoice>,
    last_finish_reason: Option<String>,
    last_envelope: Option<CompletionChunk>,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks pushed so far.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Text accumulated so far.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn push(&mut self, mut chunk: CompletionChunk) {
        self.chunk_count += 1;

        if let Some(choice) = chunk.choices.first() {
            if let Some(fragment) = choice.delta.content.as_deref() {
                self.content.push_str(fragment);
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                self.last_finish_reason = Some(reason.to_string());
            }
            if self.first_choice.is_none() {
                self.first_choice = Some(choice.clone());
            }
        }

        chunk.choices.clear();
        self.last_envelope = Some(chunk);
    }

    /// Produce the aggregated completion.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::EmptyStream`] when no chunk was pushed.
    pub fn finish(self) -> Result<AggregatedCompletion, RelayError> {
        let Some(mut completion) = self.last_envelope else {
            return Err(RelayError::EmptyStream);
        };

        let mut choice = self.first_choice.unwrap_or_else(|| ChunkChoice {
            index: 0,
            ..ChunkChoice::default()
        });
        if choice.delta.role.is_none() {
            choice.delta.role = Some(DEFAULT_ROLE.to_string());
        }
        if self.last_finish_reason.is_some() {
            choice.finish_reason = self.last_finish_reason;
        }
        choice.delta.content = Some(self.content);

        completion.choices = vec![choice];
        Ok(completion)
    }
}

/// Aggregate an in-order sequence of chunks.
///
/// # Errors
///
/// Returns [`RelayError::EmptyStream`] for an empty sequence.
pub fn aggregate<I>(chunks: I) -> Result<AggregatedCompletion, RelayError>
where
    I: IntoIterator<Item = CompletionChunk>,
{
    let mut aggregator = Aggregator::new();
    for chunk in chunks {
        aggregator.push(chunk);
    }
    aggregator.finish()
}

/// Decode and aggregate a payload stream as it arrives.
///
/// # Errors
///
/// Propagates the first transport or decode error (no partial result is
/// returned) and [`RelayError::EmptyStream`] when the stream had no payloads.
pub async fn aggregate_payloads<S>(payloads: S) -> Result<AggregatedCompletion, RelayError>
where
    S: Stream<Item = Result<String, RelayError>>,
{
    let mut payloads = std::pin::pin!(payloads);
    let mut aggregator = Aggregator::new();
    while let Some(payload) = payloads.next().await {
        aggregator.push(decode_chunk(&payload?)?);
    }
    tracing::debug!(
        chunks = aggregator.chunk_count(),
        content_len = aggregator.content().len(),
        "upstream stream aggregated"
    );
    aggregator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChunkDelta, Usage};
    use serde_json::json;

    fn chunk(json: serde_json::Value) -> CompletionChunk {
        serde_json::from_value(json).expect("valid chunk")
    }

    fn content_chunk(text: &str) -> CompletionChunk {
        chunk(json!({"choices": [{"delta": {"content": text}}]}))
    }

    #[test]
    fn test_concatenates_in_order() {
        let out = aggregate(vec![content_chunk("Hel"), content_chunk("lo")]).unwrap();
        assert_eq!(out.choices.len(), 1);
        assert_eq!(out.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_empty_sequence_is_error() {
        let err = aggregate(Vec::new()).unwrap_err();
        assert!(matches!(err, RelayError::EmptyStream));
    }

    #[test]
    fn test_skips_empty_choices_and_missing_content() {
        let out = aggregate(vec![
            content_chunk("a"),
            chunk(json!({"choices": []})),
            chunk(json!({"choices": [{"delta": {}}]})),
            content_chunk(""),
            content_chunk("b"),
        ])
        .unwrap();
        assert_eq!(out.choices[0].delta.content.as_deref(), Some("ab"));
    }

    #[test]
    fn test_no_choices_anywhere_yields_empty_content() {
        let out = aggregate(vec![
            chunk(json!({"id": "c1", "choices": []})),
            chunk(json!({"id": "c1", "usage": {"total_tokens": 3}})),
        ])
        .unwrap();
        assert_eq!(out.choices.len(), 1);
        assert_eq!(out.choices[0].index, 0);
        assert_eq!(out.choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(out.choices[0].delta.content.as_deref(), Some(""));
    }

    #[test]
    fn test_envelope_from_last_chunk_and_shape_from_first() {
        let out = aggregate(vec![
            chunk(json!({
                "id": "first", "object": "chat.completion.chunk", "created": 1, "model": "m-first",
                "choices": [{"index": 2, "delta": {"role": "assistant", "content": "x"}, "finish_reason": null}]
            })),
            chunk(json!({
                "id": "last", "object": "chat.completion.chunk", "created": 9, "model": "m-last",
                "choices": [{"index": 0, "delta": {"content": "y"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6}
            })),
        ])
        .unwrap();
        assert_eq!(out.id.as_deref(), Some("last"));
        assert_eq!(out.created, Some(9));
        assert_eq!(out.model.as_deref(), Some("m-last"));
        assert_eq!(out.usage.as_ref().and_then(|u| u.total_tokens), Some(6));
        let choice = &out.choices[0];
        assert_eq!(choice.index, 2);
        assert_eq!(choice.delta.role.as_deref(), Some("assistant"));
        assert_eq!(choice.delta.content.as_deref(), Some("xy"));
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_usage_only_on_final_chunk() {
        let out = aggregate(vec![
            content_chunk("a"),
            content_chunk("b"),
            chunk(json!({"choices": [], "usage": {"total_tokens": 42}})),
        ])
        .unwrap();
        assert_eq!(
            serde_json::to_value(out.usage.unwrap()).unwrap(),
            json!({"total_tokens": 42})
        );
    }

    #[test]
    fn test_usage_absent_when_last_chunk_has_none() {
        let out = aggregate(vec![
            chunk(json!({"choices": [], "usage": {"total_tokens": 42}})),
            content_chunk("a"),
        ])
        .unwrap();
        assert_eq!(out.usage, None);
    }

    #[test]
    fn test_role_defaults_to_assistant_when_never_sent() {
        let out = aggregate(vec![content_chunk("Hel"), content_chunk("lo")]).unwrap();
        assert_eq!(
            serde_json::to_value(&out.choices[0]).unwrap(),
            json!({"index": 0, "delta": {"role": "assistant", "content": "Hello"}, "finish_reason": null})
        );
    }

    #[test]
    fn test_upstream_role_is_kept() {
        let out = aggregate(vec![
            chunk(json!({"choices": [{"delta": {"role": "tool", "content": "x"}}]})),
            content_chunk("y"),
        ])
        .unwrap();
        assert_eq!(out.choices[0].delta.role.as_deref(), Some("tool"));
    }

    #[test]
    fn test_first_chunk_without_choice_borrows_first_seen_choice() {
        let out = aggregate(vec![
            chunk(json!({"choices": []})),
            chunk(json!({"choices": [{"index": 1, "delta": {"role": "assistant", "content": "z"}}]})),
        ])
        .unwrap();
        assert_eq!(out.choices[0].index, 1);
        assert_eq!(out.choices[0].delta.content.as_deref(), Some("z"));
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let input = vec![
            content_chunk("one "),
            chunk(json!({"choices": []})),
            content_chunk("two"),
        ];
        let first = aggregate(input.clone()).unwrap();
        let second = aggregate(input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_output_shape() {
        let out = aggregate(vec![CompletionChunk {
            id: Some("c1".to_string()),
            created: Some(7),
            model: Some("llama3-405b".to_string()),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: Some("hi".to_string()),
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: Some(Usage {
                total_tokens: Some(5),
                ..Usage::default()
            }),
            ..CompletionChunk::default()
        }])
        .unwrap();
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!({
                "id": "c1",
                "created": 7,
                "model": "llama3-405b",
                "choices": [{"index": 0, "delta": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
                "usage": {"total_tokens": 5}
            })
        );
    }

    #[tokio::test]
    async fn test_aggregate_payloads_decodes_in_order() {
        let payloads = futures_util::stream::iter(vec![
            Ok(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#.to_string()),
            Ok(r#"{"choices":[{"delta":{"content":"lo"}}]}"#.to_string()),
        ]);
        let out = aggregate_payloads(payloads).await.unwrap();
        assert_eq!(out.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_aggregate_payloads_fails_on_malformed_chunk() {
        let payloads = futures_util::stream::iter(vec![
            Ok(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#.to_string()),
            Ok("not json".to_string()),
            Ok(r#"{"choices":[{"delta":{"content":"lo"}}]}"#.to_string()),
        ]);
        let err = aggregate_payloads(payloads).await.unwrap_err();
        assert!(matches!(err, RelayError::UpstreamProtocol(_)));
    }

    #[tokio::test]
    async fn test_aggregate_payloads_empty_is_error() {
        let payloads = futures_util::stream::iter(Vec::<Result<String, RelayError>>::new());
        let err = aggregate_payloads(payloads).await.unwrap_err();
        assert!(matches!(err, RelayError::EmptyStream));
    }
}
