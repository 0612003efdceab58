use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// One decoded upstream stream event.
///
/// Every field the provider may omit is optional; anything that is present
/// must have the right shape or decoding fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Token usage as reported on the terminal chunk. Provider-specific
/// statistics (timings, throughput) ride along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The non-streaming response: the chunk envelope with exactly one choice
/// carrying the full text.
pub type AggregatedCompletion = CompletionChunk;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl CompletionChunk {
    /// Content fragment of the first choice, if any.
    #[must_use]
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }
}

/// Decode one SSE payload into a typed chunk.
///
/// # Errors
///
/// Returns [`RelayError::UpstreamProtocol`] when the payload is not JSON or
/// does not match the chunk schema.
pub fn decode_chunk(payload: &str) -> Result<CompletionChunk, RelayError> {
    serde_json::from_str(payload).map_err(|e| RelayError::UpstreamProtocol(e.to_string()))
}
