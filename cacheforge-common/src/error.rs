//! # Error Taxonomy
//!
//! Shared error type for the storage and protocol layers. Kept small and
//! cheap to construct so hot-path commands never allocate on the error arm.

/// Result alias used across the cache core and protocol crates.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the storage core and the wire protocol.
///
/// Variants map directly onto the error responses a client can observe; none
/// of them carry a backtrace or heap-allocated context, keeping the type
/// `Copy`-ish and cheap to pass by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The wire frame could not be parsed (truncated length prefix, a
    /// length field that runs past the end of the buffer, and so on).
    #[error("malformed frame")]
    MalformedFrame,
    /// The command name did not match any known command.
    #[error("unknown command")]
    UnknownCommand,
    /// A typed `Value` accessor was called on the wrong variant.
    #[error("wrong type")]
    TypeMismatch,
    /// A key exceeded `MAX_KEY_LEN`.
    #[error("key too large")]
    KeyTooLarge,
    /// A value exceeded `MAX_VALUE_LEN`.
    #[error("value too large")]
    ValueTooLarge,
    /// The key does not exist (or has already expired).
    #[error("not found")]
    NotFound,
}
