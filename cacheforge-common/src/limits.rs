//! # Size Limits
//!
//! Bounds enforced uniformly by the protocol parser, the keyspace, and the
//! snapshot codec so a key/value pair can never be accepted by one layer and
//! rejected by another.

/// Maximum key length in bytes. Oversized keys are rejected, never truncated.
pub const MAX_KEY_LEN: usize = 1024;

/// Maximum value payload length in bytes.
pub const MAX_VALUE_LEN: usize = 16 * 1024 * 1024;
