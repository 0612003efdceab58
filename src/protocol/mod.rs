pub mod chunk;
pub(crate) mod error_shapes;
pub mod request;

pub use chunk::{
    decode_chunk, AggregatedCompletion, ChunkChoice, ChunkDelta, CompletionChunk, Usage,
};
pub use request::{ChatMessage, CompletionRequest, UpstreamEnvelope};
