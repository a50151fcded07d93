//! # Wire Protocol
//!
//! Binary and text frame parsing, command decoding, and response encoding
//! for the CacheForge TCP protocol.

pub mod command;
pub mod frame;
pub mod response;
pub mod text;

pub use command::{Command, RawCommand};
pub use frame::{BinaryFrameParser, ParseOutcome};
pub use text::TextFrameParser;
