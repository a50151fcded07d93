//! # Binary Frame Parser
//!
//! Wire format: `<cmd_len:u32 LE><cmd_name><argc:u32 LE>{<arg_len:u32 LE><arg>}*`.
//!
//! Every length-prefixed read is checked against the bytes actually
//! available before the cursor advances past it. The original parser this
//! is ported from reads `cmd_len`/`arg_len` straight off the wire and
//! `memcpy`s that many bytes with no bounds check — a buffer with a forged
//! length field reads past the end of the allocation. Every `read_len`
//! below returns `Incomplete`/`Err` instead of trusting the field.

use bytes::{Buf, BytesMut};
use cacheforge_common::CacheError;

/// A parsed command before it is interpreted: a name and its arguments, all
/// as raw bytes (no UTF-8 assumption, embedded NULs preserved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    pub name: Vec<u8>,
    pub args: Vec<Vec<u8>>,
}

/// Result of one parse attempt against a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A full frame was parsed and removed from the buffer.
    Frame(RawCommand),
    /// Not enough bytes buffered yet; call again after more data arrives.
    Incomplete,
}

/// Guards against a forged length field stalling the connection forever
/// while the parser waits for bytes that will never arrive.
const MAX_COMPONENT_LEN: u32 = 64 * 1024 * 1024;

/// Stateless incremental parser for the binary frame format.
///
/// Holds no buffered partial state itself — `BinaryFrameParser::parse` always
/// re-attempts from the start of whatever is in `buf`, which is cheap since
/// frames are small and the caller already owns the accumulation buffer.
#[derive(Debug, Default)]
pub struct BinaryFrameParser;

impl BinaryFrameParser {
    pub fn new() -> Self {
        BinaryFrameParser
    }

    /// Attempts to parse one frame from `buf`, consuming it on success.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<ParseOutcome, CacheError> {
        match try_parse(&buf[..]) {
            Ok(Some((cmd, consumed))) => {
                buf.advance(consumed);
                Ok(ParseOutcome::Frame(cmd))
            }
            Ok(None) => Ok(ParseOutcome::Incomplete),
            Err(err) => Err(err),
        }
    }
}

/// Reads a `u32 LE` length prefix at `offset`, bounds-checked.
fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    if end > data.len() {
        return None;
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[offset..end]);
    Some(u32::from_le_bytes(raw))
}

/// Reads `len` bytes at `offset`, bounds-checked against `data.len()`.
fn read_bytes(data: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    let end = offset.checked_add(len)?;
    if end > data.len() {
        return None;
    }
    Some(&data[offset..end])
}

/// Parses one frame out of `data` without mutating it, returning the number
/// of bytes to drop from the caller's buffer on success.
fn try_parse(data: &[u8]) -> Result<Option<(RawCommand, usize)>, CacheError> {
    if data.is_empty() {
        return Ok(None);
    }

    let mut offset = 0usize;

    let cmd_len = match read_u32(data, offset) {
        Some(len) => len,
        None => return Ok(None),
    };
    if cmd_len > MAX_COMPONENT_LEN {
        return Err(CacheError::MalformedFrame);
    }
    offset += 4;

    let name = match read_bytes(data, offset, cmd_len as usize) {
        Some(bytes) => bytes.to_vec(),
        None => return Ok(None),
    };
    offset += cmd_len as usize;

    let argc = match read_u32(data, offset) {
        Some(len) => len,
        None => return Ok(None),
    };
    if argc > MAX_COMPONENT_LEN {
        return Err(CacheError::MalformedFrame);
    }
    offset += 4;

    let mut args = Vec::with_capacity(argc as usize);
    for _ in 0..argc {
        let arg_len = match read_u32(data, offset) {
            Some(len) => len,
            None => return Ok(None),
        };
        if arg_len > MAX_COMPONENT_LEN {
            return Err(CacheError::MalformedFrame);
        }
        offset += 4;

        let arg = match read_bytes(data, offset, arg_len as usize) {
            Some(bytes) => bytes.to_vec(),
            None => return Ok(None),
        };
        offset += arg_len as usize;
        args.push(arg);
    }

    Ok(Some((RawCommand { name, args }, offset)))
}
