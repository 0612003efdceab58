pub mod forward;
pub mod sse;

pub use forward::{forward_payloads, ForwardOptions};
pub use sse::{data_frame, is_done_payload, sse_payload_stream, DataLineParser};
