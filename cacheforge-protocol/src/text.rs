//! # Text Frame Parser
//!
//! Whitespace-split, newline-terminated commands: `SET key value\n`. Grounded
//! on the original parser's `parse_text`, which tokenizes on whitespace and
//! upper-cases the command name; arguments are preserved byte-for-byte.

use bytes::BytesMut;

use crate::frame::RawCommand;

/// Incremental parser for newline-delimited text commands.
#[derive(Debug, Default)]
pub struct TextFrameParser;

impl TextFrameParser {
    pub fn new() -> Self {
        TextFrameParser
    }

    /// Attempts to pull one complete line out of `buf` and tokenize it.
    ///
    /// Returns `None` when no newline has arrived yet. A line with no
    /// tokens (blank line) is skipped by returning `Some(None)`... instead,
    /// callers should treat an empty-name command as a no-op; this simply
    /// returns `None` for a blank line so the caller's read loop keeps going
    /// without producing a spurious error.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Option<RawCommand> {
        let newline_pos = buf.iter().position(|&b| b == b'\n')?;
        let line = buf.split_to(newline_pos + 1);
        let line = &line[..line.len() - 1];
        let line = if line.last() == Some(&b'\r') {
            &line[..line.len() - 1]
        } else {
            line
        };

        let mut tokens = line.split(|&b| b == b' ' || b == b'\t').filter(|t| !t.is_empty());
        let name = tokens.next()?.to_ascii_uppercase();
        let args = tokens.map(|t| t.to_vec()).collect();
        Some(RawCommand { name, args })
    }
}
