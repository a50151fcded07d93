//! # Command Vocabulary
//!
//! Translates a [`RawCommand`] (bytes only, no semantics) into a typed
//! [`Command`]. Grounded on `hkv-server::server::dispatch_command`'s
//! `if eq_ignore_ascii_case(cmd, ...)` chain, generalized into a `match` over
//! an upper-cased command name plus `KEYS` (supplemented from the original
//! C++ `HashTable::keys()`, which the teacher's RESP dispatch never wired up).

use cacheforge_common::CacheError;

pub use crate::frame::RawCommand;

/// A fully decoded, type-checked command ready for the keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping(Option<Vec<u8>>),
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        ttl_secs: Option<u64>,
    },
    Get(Vec<u8>),
    Del(Vec<Vec<u8>>),
    Keys(Vec<u8>),
    Ttl(Vec<u8>),
    Expire(Vec<u8>, u64),
    Info,
}

impl Command {
    /// Parses a raw wire command into its typed form.
    ///
    /// Returns `CacheError::UnknownCommand` for an unrecognized name and
    /// `CacheError::MalformedFrame` for a recognized command with the wrong
    /// argument count — both are protocol-layer failures the client sees as
    /// a plain `-ERR`, never a panic.
    pub fn from_raw(raw: &RawCommand) -> Result<Command, CacheError> {
        let name = raw.name.to_ascii_uppercase();
        match name.as_slice() {
            b"PING" => match raw.args.len() {
                0 => Ok(Command::Ping(None)),
                1 => Ok(Command::Ping(Some(raw.args[0].clone()))),
                _ => Err(CacheError::MalformedFrame),
            },
            b"SET" => parse_set(&raw.args),
            b"GET" => match raw.args.as_slice() {
                [key] => Ok(Command::Get(key.clone())),
                _ => Err(CacheError::MalformedFrame),
            },
            b"DEL" => {
                if raw.args.is_empty() {
                    return Err(CacheError::MalformedFrame);
                }
                Ok(Command::Del(raw.args.clone()))
            }
            b"KEYS" => match raw.args.as_slice() {
                [pattern] => Ok(Command::Keys(pattern.clone())),
                _ => Err(CacheError::MalformedFrame),
            },
            b"TTL" => match raw.args.as_slice() {
                [key] => Ok(Command::Ttl(key.clone())),
                _ => Err(CacheError::MalformedFrame),
            },
            b"EXPIRE" => match raw.args.as_slice() {
                [key, secs] => {
                    let secs = parse_u64(secs).ok_or(CacheError::MalformedFrame)?;
                    Ok(Command::Expire(key.clone(), secs))
                }
                _ => Err(CacheError::MalformedFrame),
            },
            b"INFO" => match raw.args.len() {
                0 => Ok(Command::Info),
                _ => Err(CacheError::MalformedFrame),
            },
            _ => Err(CacheError::UnknownCommand),
        }
    }
}

fn parse_set(args: &[Vec<u8>]) -> Result<Command, CacheError> {
    match args {
        [key, value] => Ok(Command::Set {
            key: key.clone(),
            value: value.clone(),
            ttl_secs: None,
        }),
        [key, value, flag, secs] if flag.eq_ignore_ascii_case(b"EX") => {
            let secs = parse_u64(secs).ok_or(CacheError::MalformedFrame)?;
            Ok(Command::Set {
                key: key.clone(),
                value: value.clone(),
                ttl_secs: Some(secs),
            })
        }
        _ => Err(CacheError::MalformedFrame),
    }
}

/// Parses an ASCII-digit byte string into a `u64`, saturating on overflow
/// rather than wrapping — mirrors `hkv-server::server::parse_u64`.
fn parse_u64(arg: &[u8]) -> Option<u64> {
    if arg.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for &b in arg {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as u64);
    }
    Some(value)
}
