//! Line-oriented SSE payload extraction for the upstream completion stream.
//!
//! The upstream emits one JSON document per `data:` line. Everything else on
//! the wire (blank separators, comments, `event:`/`id:` fields, keep-alives)
//! is noise, and a `DONE` payload ends the stream.
use bytes::Bytes;
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

use crate::error::RelayError;
use crate::protocol::error_shapes::stream_error_payload;

struct PendingPayloads {
    payloads: SmallVec<[String; 8]>,
    head: usize,
}

impl PendingPayloads {
    #[inline]
    fn new() -> Self {
        Self {
            payloads: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<String> {
        if self.head >= self.payloads.len() {
            return None;
        }
        let payload = std::mem::take(&mut self.payloads[self.head]);
        self.head += 1;
        if self.head == self.payloads.len() {
            self.payloads.clear();
            self.head = 0;
        }
        Some(payload)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<String>) {
        if parsed.is_empty() {
            return;
        }
        self.payloads.reserve(parsed.len());
        self.payloads.extend(parsed.drain(..));
    }
}

// ---------------------------------------------------------------------------
// DataLineParser
// ---------------------------------------------------------------------------

/// Incremental parser turning raw text (split at arbitrary boundaries) into
/// `data:` payloads.
pub struct DataLineParser {
    buffer: String,
    read_offset: usize,
    finished: bool,
}

impl DataLineParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            finished: false,
        }
    }

    /// `true` once the termination sentinel has been seen.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed raw text and return any complete payloads.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete payloads into a caller-provided buffer.
    ///
    /// - lines not starting with `data:` are dropped
    /// - `data:` and one following space are stripped
    /// - blank payloads are keep-alives and dropped
    /// - a `DONE` / `[DONE]` payload finishes the parser; later input is ignored
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<String>) {
        if self.finished {
            return;
        }
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &self.buffer[processed_up_to..line_end];
            processed_up_to = line_end + 1;
            if Self::process_line(line, out) {
                self.finished = true;
                break;
            }
        }

        if self.finished {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish_into(&mut self, out: &mut Vec<String>) {
        if self.finished {
            return;
        }
        let tail = std::mem::take(&mut self.buffer);
        self.read_offset = 0;
        if Self::process_line(&tail, out) {
            self.finished = true;
        }
    }

    /// Returns `true` when the line is the termination sentinel.
    fn process_line(line: &str, out: &mut Vec<String>) -> bool {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some(value) = line.strip_prefix("data:") else {
            return false;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        if is_done_payload(value) {
            return true;
        }
        if !value.trim().is_empty() {
            out.push(value.to_string());
        }
        false
    }
}

impl Default for DataLineParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Check whether a payload is the termination sentinel.
#[must_use]
pub fn is_done_payload(payload: &str) -> bool {
    matches!(payload.trim(), "DONE" | "[DONE]")
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Wrap a payload in SSE framing: `data: {payload}\n\n`.
#[must_use]
pub fn data_frame(payload: &str) -> String {
    let mut out = String::with_capacity(8 + payload.len());
    out.push_str("data: ");
    out.push_str(payload);
    out.push_str("\n\n");
    out
}

/// Format a `[DONE]` frame as SSE text.
#[must_use]
pub fn done_frame() -> String {
    DONE_FRAME.to_owned()
}

/// Frame reporting a failure after the stream has started.
#[must_use]
pub fn error_frame(status: http::StatusCode, message: &str) -> String {
    data_frame(&stream_error_payload(status, message).to_string())
}

const DONE_FRAME: &str = "data: [DONE]\n\n";

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

fn feed_utf8(
    parser: &mut DataLineParser,
    remainder: &mut Vec<u8>,
    bytes: &[u8],
    out: &mut Vec<String>,
) {
    remainder.extend_from_slice(bytes);
    let mut start = 0usize;
    loop {
        match std::str::from_utf8(&remainder[start..]) {
            Ok(text) => {
                parser.feed_into(text, out);
                remainder.clear();
                return;
            }
            Err(e) => {
                let valid_end = start + e.valid_up_to();
                if let Ok(text) = std::str::from_utf8(&remainder[start..valid_end]) {
                    parser.feed_into(text, out);
                }
                match e.error_len() {
                    Some(bad_len) => {
                        parser.feed_into("\u{FFFD}", out);
                        start = valid_end + bad_len;
                    }
                    None => {
                        // incomplete sequence at the chunk edge; keep it for the next read
                        remainder.drain(..valid_end);
                        return;
                    }
                }
            }
        }
    }
}

/// Split an upstream byte stream into `data:` payloads.
///
/// Bytes are decoded as UTF-8 (sequences split across reads are stitched
/// back together), fed through a [`DataLineParser`], and each payload is
/// yielded in arrival order. The stream ends at the sentinel or at the end of
/// the body; a read error is yielded once as [`RelayError::UpstreamTransport`]
/// and ends the stream.
pub fn sse_payload_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<String, RelayError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Some(Box::pin(byte_stream)),
            DataLineParser::new(),
            Vec::<u8>::new(),
            Vec::<String>::with_capacity(8),
            PendingPayloads::new(),
        ),
        |(mut stream, mut parser, mut remainder, mut parsed, mut pending)| async move {
            loop {
                if let Some(payload) = pending.pop_front() {
                    return Some((Ok(payload), (stream, parser, remainder, parsed, pending)));
                }
                if parser.is_finished() {
                    // drop the body so the upstream connection is released
                    stream = None;
                }
                let Some(body) = stream.as_mut() else {
                    return None;
                };

                let next = body.next().await;
                match next {
                    Some(Ok(bytes)) => {
                        feed_utf8(&mut parser, &mut remainder, &bytes, &mut parsed);
                    }
                    Some(Err(err)) => {
                        let err = RelayError::UpstreamTransport(err.to_string());
                        return Some((Err(err), (None, parser, remainder, parsed, pending)));
                    }
                    None => {
                        if !remainder.is_empty() {
                            let tail = String::from_utf8_lossy(&remainder).into_owned();
                            remainder.clear();
                            parser.feed_into(&tail, &mut parsed);
                        }
                        parser.finish_into(&mut parsed);
                        stream = None;
                    }
                }
                pending.extend_from_vec(&mut parsed);
            }
        },
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn byte_source(
        chunks: &[&'static [u8]],
    ) -> impl Stream<Item = Result<Bytes, std::convert::Infallible>> + Send + 'static {
        futures_util::stream::iter(
            chunks
                .iter()
                .map(|chunk| Ok::<Bytes, std::convert::Infallible>(Bytes::from_static(chunk)))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect_payloads(chunks: &[&'static [u8]]) -> Vec<String> {
        sse_payload_stream(byte_source(chunks))
            .map(|item| item.expect("payload"))
            .collect()
            .await
    }

    // -- DataLineParser tests --

    #[test]
    fn test_parse_data_lines() {
        let mut parser = DataLineParser::new();
        let payloads = parser.feed("data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_parse_data_no_space_after_colon() {
        let mut parser = DataLineParser::new();
        assert_eq!(parser.feed("data:{}\n"), vec!["{}"]);
    }

    #[test]
    fn test_parse_drops_noise_lines() {
        let mut parser = DataLineParser::new();
        let payloads = parser.feed(": keep-alive\nevent: message\nid: 7\n\ndata: x\n\n");
        assert_eq!(payloads, vec!["x"]);
    }

    #[test]
    fn test_parse_drops_blank_payloads() {
        let mut parser = DataLineParser::new();
        assert!(parser.feed("data:\ndata:   \n\n").is_empty());
    }

    #[test]
    fn test_parse_sentinel_variants() {
        for sentinel in ["data: DONE\n", "data: [DONE]\n", "data:[DONE]\r\n"] {
            let mut parser = DataLineParser::new();
            assert!(parser.feed(sentinel).is_empty());
            assert!(parser.is_finished());
        }
    }

    #[test]
    fn test_parse_ignores_input_after_sentinel() {
        let mut parser = DataLineParser::new();
        let payloads = parser.feed("data: a\n\ndata: DONE\n\ndata: b\n\n");
        assert_eq!(payloads, vec!["a"]);
        assert!(parser.feed("data: c\n\n").is_empty());
    }

    #[test]
    fn test_content_mentioning_done_is_not_sentinel() {
        let mut parser = DataLineParser::new();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"DONE\"}}]}\n";
        assert_eq!(parser.feed(line).len(), 1);
        assert!(!parser.is_finished());
    }

    #[test]
    fn test_parse_incremental_chunks() {
        let mut parser = DataLineParser::new();
        assert!(parser.feed("data: hel").is_empty());
        assert_eq!(parser.feed("lo\n"), vec!["hello"]);
        assert!(parser.feed("\n").is_empty());
    }

    #[test]
    fn test_parse_crlf_line_endings() {
        let mut parser = DataLineParser::new();
        assert_eq!(parser.feed("data: hello\r\n\r\n"), vec!["hello"]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut parser = DataLineParser::new();
        assert!(parser.feed("data: tail").is_empty());
        let mut out = Vec::new();
        parser.finish_into(&mut out);
        assert_eq!(out, vec!["tail"]);
    }

    #[test]
    fn test_is_done_payload() {
        assert!(is_done_payload("DONE"));
        assert!(is_done_payload(" [DONE] "));
        assert!(!is_done_payload("{\"content\":\"DONE\"}"));
    }

    // -- Encoding tests --

    #[test]
    fn test_data_frame() {
        assert_eq!(data_frame("{\"id\":\"c1\"}"), "data: {\"id\":\"c1\"}\n\n");
    }

    #[test]
    fn test_done_frame_string() {
        assert_eq!(done_frame(), "data: [DONE]\n\n");
    }

    #[test]
    fn test_error_frame() {
        let frame = error_frame(http::StatusCode::BAD_GATEWAY, "boom");
        assert_eq!(
            frame,
            "data: {\"error\":{\"message\":\"boom\",\"status\":502}}\n\n"
        );
    }

    // -- Stream tests --

    #[tokio::test]
    async fn test_payload_stream_in_order() {
        let payloads = collect_payloads(&[
            b"data: {\"n\":1}\n\ndata: {\"n\":2}\n\n".as_slice(),
            b"data: {\"n\":3}\n\ndata: DONE\n\n".as_slice(),
        ])
        .await;
        assert_eq!(payloads, vec!["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"]);
    }

    #[tokio::test]
    async fn test_payload_stream_empty_body() {
        assert!(collect_payloads(&[]).await.is_empty());
        assert!(collect_payloads(&[b"data: DONE\n\n".as_slice()])
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_payload_stream_line_split_across_chunks() {
        let payloads = collect_payloads(&[
            b"da".as_slice(),
            b"ta: {\"n\"".as_slice(),
            b":1}\n".as_slice(),
            b"\ndata: [DO".as_slice(),
            b"NE]\n\n".as_slice(),
        ])
        .await;
        assert_eq!(payloads, vec!["{\"n\":1}"]);
    }

    #[tokio::test]
    async fn test_payload_stream_utf8_split_across_chunks() {
        // "é" is 0xC3 0xA9
        let payloads = collect_payloads(&[b"data: caf\xC3".as_slice(), b"\xA9\n\n".as_slice()]).await;
        assert_eq!(payloads, vec!["café"]);
    }

    #[tokio::test]
    async fn test_payload_stream_flushes_tail_without_newline() {
        let payloads = collect_payloads(&[b"data: a\n\ndata: b".as_slice()]).await;
        assert_eq!(payloads, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_payload_stream_surfaces_read_error_once() {
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: a\n\n")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"data: b\n\n")),
        ]);
        let items: Vec<Result<String, RelayError>> = sse_payload_stream(source).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert!(matches!(items[1], Err(RelayError::UpstreamTransport(_))));
    }
}
