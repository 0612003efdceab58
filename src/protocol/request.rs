use serde::{Deserialize, Serialize};

use crate::config::UpstreamConfig;
use crate::error::RelayError;

/// Inbound chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Absent and `false` both select the aggregated response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// One conversation message, forwarded to the upstream unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub content: serde_json::Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatMessage {
    #[must_use]
    pub fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: serde_json::Value::String(content.to_string()),
            extra: serde_json::Map::new(),
        }
    }
}

impl CompletionRequest {
    /// Parse the raw request body.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] when the body is not JSON or does
    /// not carry a `messages` array of `{role, content}` records.
    pub fn from_slice(body: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(body).map_err(|e| RelayError::InvalidRequest(e.to_string()))
    }

    #[must_use]
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// The requested model id, or `default` when the caller sent none.
    #[must_use]
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.model.as_deref() {
            Some(model) if !model.trim().is_empty() => model,
            _ => default,
        }
    }
}

/// Request body sent to the upstream completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamEnvelope {
    pub body: UpstreamBody,
    pub env_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamBody {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub stop: Vec<String>,
    pub stream: bool,
    pub stream_options: StreamOptions,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

impl UpstreamEnvelope {
    /// Wrap a client request for the upstream. Streaming and usage reporting
    /// are always requested, whatever the caller's own `stream` flag says.
    #[must_use]
    pub fn from_request(request: CompletionRequest, upstream: &UpstreamConfig) -> Self {
        let model = request.model_or(&upstream.default_model).to_string();
        let max_tokens = request.max_tokens.unwrap_or(upstream.max_tokens);
        Self {
            body: UpstreamBody {
                messages: request.messages,
                max_tokens,
                stop: upstream.stop.clone(),
                stream: true,
                stream_options: StreamOptions {
                    include_usage: true,
                },
                model: model_tag(upstream, &model),
            },
            env_type: env_type_tag(upstream, &model),
        }
    }
}

#[must_use]
pub fn model_tag(upstream: &UpstreamConfig, model: &str) -> String {
    format!("{}{model}", upstream.model_prefix)
}

#[must_use]
pub fn env_type_tag(upstream: &UpstreamConfig, model: &str) -> String {
    format!("{}{model}", upstream.env_type_prefix)
}
