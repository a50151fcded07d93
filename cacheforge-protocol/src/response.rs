//! # Response Encoding
//!
//! Grounded on `hkv-server::server`'s `resp_*` helpers. Error messages are
//! sanitized (CR/LF stripped) and never interpolated as a format string —
//! the original's `serialize_error` concatenates the message directly into
//! a string that later call sites pass straight to a `spdlog` format call,
//! which lets an attacker-controlled key smuggle format specifiers into the
//! log. Every caller here passes user bytes as a `tracing` field value, never
//! as part of the format template, so the same mistake has no way to recur.

/// `+OK\r\n`-style simple string reply.
pub fn encode_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.push(b'+');
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// `-ERR ...\r\n`-style error reply. CR/LF in `message` are stripped so a
/// malicious key can never inject a second reply line into the stream.
pub fn encode_error(message: &str) -> Vec<u8> {
    let sanitized: String = message.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    let mut buf = Vec::with_capacity(sanitized.len() + 6);
    buf.extend_from_slice(b"-ERR ");
    buf.extend_from_slice(sanitized.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// `:123\r\n`-style integer reply.
pub fn encode_integer(value: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(b':');
    buf.extend_from_slice(value.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// `$len\r\n<data>\r\n`-style bulk string reply.
pub fn encode_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 16);
    buf.push(b'$');
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

/// `$-1\r\n` null reply.
pub fn encode_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// `*n\r\n`-prefixed array of bulk strings.
pub fn encode_array(items: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(b'*');
    buf.extend_from_slice(items.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    for item in items {
        buf.extend_from_slice(&encode_bulk(item));
    }
    buf
}
