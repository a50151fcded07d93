//! # Value
//!
//! The tagged value stored against every key. Values are immutable once
//! inserted; a `SET` replaces the whole value rather than mutating in place.
//!
//! Typed accessors (`as_str`, `as_int`, ...) return owned data and fail with
//! `CacheError::TypeMismatch` on the wrong variant. There is deliberately no
//! accessor that returns a borrow into the `Value` (no `as_str_ref`-style
//! method) — a borrow that could outlive its owner is the exact hazard this
//! type is built to rule out.

use crate::error::{CacheError, CacheResult};

/// A cached value. One of a string, a signed integer, an ordered list of
/// strings, or an opaque byte sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Int(i64),
    List(Vec<String>),
    Binary(Vec<u8>),
}

impl Value {
    /// Short, stable name for the active variant (used in snapshot headers
    /// and diagnostics, never as a format string).
    pub fn variant_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::List(_) => "list",
            Value::Binary(_) => "binary",
        }
    }

    /// Numeric tag used by the snapshot codec to identify the variant.
    pub fn type_tag(&self) -> i32 {
        match self {
            Value::Str(_) => 0,
            Value::Int(_) => 1,
            Value::List(_) => 2,
            Value::Binary(_) => 3,
        }
    }

    /// Approximate resident byte cost, used for eviction accounting.
    ///
    /// Integers report only the struct overhead; strings/lists/binaries add
    /// their content length on top.
    pub fn memory_size(&self) -> usize {
        const OVERHEAD: usize = 24;
        match self {
            Value::Str(s) => OVERHEAD + s.len(),
            Value::Int(_) => OVERHEAD,
            Value::List(items) => {
                OVERHEAD + items.iter().map(|item| OVERHEAD + item.len()).sum::<usize>()
            }
            Value::Binary(bytes) => OVERHEAD + bytes.len(),
        }
    }

    /// Returns the string content, failing on any other variant.
    pub fn as_str(&self) -> CacheResult<&str> {
        match self {
            Value::Str(s) => Ok(s.as_str()),
            _ => Err(CacheError::TypeMismatch),
        }
    }

    /// Returns the integer content, failing on any other variant.
    pub fn as_int(&self) -> CacheResult<i64> {
        match self {
            Value::Int(value) => Ok(*value),
            _ => Err(CacheError::TypeMismatch),
        }
    }

    /// Returns the list content, failing on any other variant.
    pub fn as_list(&self) -> CacheResult<&[String]> {
        match self {
            Value::List(items) => Ok(items.as_slice()),
            _ => Err(CacheError::TypeMismatch),
        }
    }

    /// Returns the raw byte content, failing on any other variant. No
    /// coercion: a `Str` is not a `Binary`, even though its bytes happen to
    /// be valid UTF-8 — callers that want either representation should
    /// match on the variant themselves.
    pub fn as_binary(&self) -> CacheResult<&[u8]> {
        match self {
            Value::Binary(bytes) => Ok(bytes.as_slice()),
            _ => Err(CacheError::TypeMismatch),
        }
    }
}
