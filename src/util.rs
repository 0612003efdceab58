const HEX: &[u8; 16] = b"0123456789abcdef";
const MAX_UPSTREAM_ERROR_LEN: usize = 500;

#[inline]
pub(crate) fn format_request_seq_hex(prefix: &str, request_seq: u64) -> String {
    let mut out = String::with_capacity(prefix.len() + 16);
    out.push_str(prefix);
    push_u64_hex_16(&mut out, request_seq);
    out
}

#[inline]
fn push_u64_hex_16(out: &mut String, mut value: u64) {
    let mut buf = [b'0'; 16];
    let mut idx = 16;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for byte in buf {
        out.push(char::from(byte));
    }
}

/// Cut `text` to at most `max_len` bytes on a char boundary, marking the cut.
pub(crate) fn truncate_for_log(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Reduce an upstream error body to something fit for a log line: the
/// `error.message` / `message` / `detail` string when the body is JSON,
/// otherwise the raw text, bounded in length either way.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = json
            .get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(serde_json::Value::as_str)
            .or_else(|| json.get("message").and_then(serde_json::Value::as_str))
            .or_else(|| json.get("detail").and_then(serde_json::Value::as_str));
        if let Some(msg) = message {
            return truncate_for_log(msg, MAX_UPSTREAM_ERROR_LEN);
        }
    }
    let text = String::from_utf8_lossy(body);
    truncate_for_log(text.trim(), MAX_UPSTREAM_ERROR_LEN)
}
