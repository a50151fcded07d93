//! # Response Parsing and Command Encoding
//!
//! Commands are framed using the server's binary frame format
//! (`<cmd_len:u32 LE><cmd_name><argc:u32 LE>{<arg_len:u32 LE><arg>}*`, see
//! `cacheforge_protocol::frame`) so that arbitrary binary keys/values round
//! trip without escaping. Responses come back RESP2-style (`+`/`-`/`:`/`$`/
//! `*`), matching `cacheforge_protocol::response`'s encoders; this half is
//! grounded on `hkv-client::resp` essentially unchanged.

use std::io::BufRead;

use crate::client::{ClientError, ClientResult};

/// RESP response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(Vec<u8>),
    Error(Vec<u8>),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Vec<RespValue>),
}

/// Encodes a command using the binary frame format into `out`.
///
/// `args[0]` is treated as the command name; the rest are its arguments.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    let (name, rest) = args.split_first().expect("at least a command name");
    push_u32(out, name.len() as u32);
    out.extend_from_slice(name);
    push_u32(out, rest.len() as u32);
    for arg in rest {
        push_u32(out, arg.len() as u32);
        out.extend_from_slice(arg);
    }
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(ClientError::Protocol);
    }

    match line_buf[0] {
        b'+' => Ok(RespValue::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(RespValue::Error(line_buf[1..].to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf)
        }
        _ => Err(ClientError::Protocol),
    }
}

fn parse_bulk_len<R: BufRead>(reader: &mut R, len: i64, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    let len = len as usize;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(ClientError::Protocol);
    }

    line_buf.clear();
    Ok(RespValue::Bulk(Some(data)))
}

fn parse_array_len<R: BufRead>(reader: &mut R, len: i64, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    if len <= 0 {
        return Ok(RespValue::Array(Vec::new()));
    }

    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(read_response(reader, line_buf)?);
    }
    Ok(RespValue::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(ClientError::Protocol);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    if data.is_empty() {
        return Err(ClientError::Protocol);
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn encodes_command_as_binary_frame() {
        let mut buf = Vec::new();
        encode_command(&[b"GET", b"key"], &mut buf);
        let mut expected = Vec::new();
        expected.extend_from_slice(&3u32.to_le_bytes());
        expected.extend_from_slice(b"GET");
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&3u32.to_le_bytes());
        expected.extend_from_slice(b"key");
        assert_eq!(buf, expected);
    }

    #[test]
    fn parses_simple_string() {
        let mut reader = Cursor::new(b"+OK\r\n".to_vec());
        let mut line = Vec::new();
        assert_eq!(read_response(&mut reader, &mut line).unwrap(), RespValue::Simple(b"OK".to_vec()));
    }

    #[test]
    fn parses_bulk_string() {
        let mut reader = Cursor::new(b"$5\r\nhello\r\n".to_vec());
        let mut line = Vec::new();
        assert_eq!(read_response(&mut reader, &mut line).unwrap(), RespValue::Bulk(Some(b"hello".to_vec())));
    }

    #[test]
    fn parses_null_bulk_string() {
        let mut reader = Cursor::new(b"$-1\r\n".to_vec());
        let mut line = Vec::new();
        assert_eq!(read_response(&mut reader, &mut line).unwrap(), RespValue::Bulk(None));
    }

    #[test]
    fn parses_integer() {
        let mut reader = Cursor::new(b":42\r\n".to_vec());
        let mut line = Vec::new();
        assert_eq!(read_response(&mut reader, &mut line).unwrap(), RespValue::Integer(42));
    }

    #[test]
    fn parses_array_of_bulk_strings() {
        let mut reader = Cursor::new(b"*2\r\n$1\r\na\r\n$1\r\nb\r\n".to_vec());
        let mut line = Vec::new();
        let resp = read_response(&mut reader, &mut line).unwrap();
        assert_eq!(
            resp,
            RespValue::Array(vec![RespValue::Bulk(Some(b"a".to_vec())), RespValue::Bulk(Some(b"b".to_vec()))])
        );
    }

    #[test]
    fn parses_error() {
        let mut reader = Cursor::new(b"-ERR bad\r\n".to_vec());
        let mut line = Vec::new();
        assert_eq!(read_response(&mut reader, &mut line).unwrap(), RespValue::Error(b"ERR bad".to_vec()));
    }
}
