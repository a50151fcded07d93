//! # Command Dispatch
//!
//! Translates a typed [`Command`] into a `Keyspace` call and a wire
//! response. Grounded on `hkv-server::server::dispatch_command`'s per-command
//! match arms, generalized to call `Keyspace` instead of `MemoryEngine` and
//! extended with `KEYS` (§4.2's supplemented command).

use std::time::Duration;

use cacheforge_common::{CacheError, Value};
use cacheforge_core::{Keyspace, TtlStatus};
use cacheforge_protocol::response::{encode_array, encode_bulk, encode_error, encode_integer, encode_null, encode_simple};
use cacheforge_protocol::Command;

const SERVER_BANNER: &[u8] = b"role:master\r\nengine:cacheforge\r\n";

pub fn dispatch_command(command: Command, keyspace: &Keyspace) -> Vec<u8> {
    match command {
        Command::Ping(None) => encode_simple("PONG"),
        Command::Ping(Some(payload)) => encode_bulk(&payload),
        Command::Set { key, value, ttl_secs } => handle_set(keyspace, key, value, ttl_secs),
        Command::Get(key) => handle_get(keyspace, &key),
        Command::Del(keys) => handle_del(keyspace, &keys),
        Command::Keys(pattern) => handle_keys(keyspace, &pattern),
        Command::Ttl(key) => handle_ttl(keyspace, &key),
        Command::Expire(key, secs) => handle_expire(keyspace, &key, secs),
        Command::Info => encode_bulk(SERVER_BANNER),
    }
}

/// Wire values arrive as raw bytes with no type annotation. Valid UTF-8
/// becomes `Value::Str` (so `as_str`-typed future commands can use it
/// directly); anything else becomes `Value::Binary`, which `as_binary`
/// already reads back byte-for-byte either way.
fn value_from_wire(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(s) => Value::Str(s),
        Err(err) => Value::Binary(err.into_bytes()),
    }
}

fn handle_set(keyspace: &Keyspace, key: Vec<u8>, value: Vec<u8>, ttl_secs: Option<u64>) -> Vec<u8> {
    let ttl = ttl_secs.map(Duration::from_secs);
    match keyspace.set(key, value_from_wire(value), ttl) {
        Ok(_) => encode_simple("OK"),
        Err(CacheError::KeyTooLarge) => encode_error("key too large"),
        Err(CacheError::ValueTooLarge) => encode_error("value too large"),
        Err(_) => encode_error("internal error"),
    }
}

fn handle_get(keyspace: &Keyspace, key: &[u8]) -> Vec<u8> {
    match keyspace.get(key) {
        Some(Value::Str(s)) => encode_bulk(s.as_bytes()),
        Some(value) => match value.as_binary() {
            Ok(bytes) => encode_bulk(bytes),
            Err(_) => encode_error("value is not representable as a bulk string"),
        },
        None => encode_null(),
    }
}

fn handle_del(keyspace: &Keyspace, keys: &[Vec<u8>]) -> Vec<u8> {
    let mut removed = 0i64;
    for key in keys {
        if keyspace.delete(key) {
            removed += 1;
        }
    }
    encode_integer(removed)
}

fn handle_keys(keyspace: &Keyspace, pattern: &[u8]) -> Vec<u8> {
    encode_array(&keyspace.keys(pattern))
}

fn handle_ttl(keyspace: &Keyspace, key: &[u8]) -> Vec<u8> {
    match keyspace.ttl(key) {
        TtlStatus::Absent => encode_integer(-2),
        TtlStatus::NoTtl => encode_integer(-1),
        TtlStatus::Remaining(remaining) => encode_integer(remaining.as_secs() as i64),
    }
}

fn handle_expire(keyspace: &Keyspace, key: &[u8], secs: u64) -> Vec<u8> {
    match keyspace.expire(key, Duration::from_secs(secs)) {
        Ok(()) => encode_integer(1),
        Err(CacheError::NotFound) => encode_integer(0),
        Err(_) => encode_error("internal error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cacheforge_core::KeyspaceLimits;

    fn keyspace() -> std::sync::Arc<Keyspace> {
        Keyspace::with_shard_count(4, KeyspaceLimits::default())
    }

    #[test]
    fn ping_without_payload_replies_pong() {
        let ks = keyspace();
        assert_eq!(dispatch_command(Command::Ping(None), &ks), b"+PONG\r\n");
    }

    #[test]
    fn set_then_get_roundtrips() {
        let ks = keyspace();
        let resp = dispatch_command(
            Command::Set { key: b"k".to_vec(), value: b"v".to_vec(), ttl_secs: None },
            &ks,
        );
        assert_eq!(resp, b"+OK\r\n");
        assert_eq!(dispatch_command(Command::Get(b"k".to_vec()), &ks), b"$1\r\nv\r\n");
    }

    #[test]
    fn get_missing_key_returns_null() {
        let ks = keyspace();
        assert_eq!(dispatch_command(Command::Get(b"missing".to_vec()), &ks), b"$-1\r\n");
    }

    #[test]
    fn del_counts_removed_keys() {
        let ks = keyspace();
        dispatch_command(Command::Set { key: b"a".to_vec(), value: b"1".to_vec(), ttl_secs: None }, &ks);
        let resp = dispatch_command(Command::Del(vec![b"a".to_vec(), b"missing".to_vec()]), &ks);
        assert_eq!(resp, b":1\r\n");
    }

    #[test]
    fn ttl_reports_absent_for_missing_key() {
        let ks = keyspace();
        assert_eq!(dispatch_command(Command::Ttl(b"missing".to_vec()), &ks), b":-2\r\n");
    }

    #[test]
    fn expire_on_missing_key_returns_zero() {
        let ks = keyspace();
        assert_eq!(dispatch_command(Command::Expire(b"missing".to_vec(), 30), &ks), b":0\r\n");
    }

    #[test]
    fn keys_returns_matching_array() {
        let ks = keyspace();
        dispatch_command(Command::Set { key: b"a:1".to_vec(), value: b"x".to_vec(), ttl_secs: None }, &ks);
        dispatch_command(Command::Set { key: b"b:1".to_vec(), value: b"x".to_vec(), ttl_secs: None }, &ks);
        let resp = dispatch_command(Command::Keys(b"a:*".to_vec()), &ks);
        assert_eq!(resp, b"*1\r\n$3\r\na:1\r\n");
    }
}
