//! Error types for the entry codec.
//!
//! Every codec failure is recoverable: the sync manager drops the offending
//! transaction and moves on. Nothing in here ever aborts block processing.

use thiserror::Error;

/// Errors produced while decoding or encoding registry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The script or payload is not registry metadata at all (wrong opcode,
    /// too short, or missing the identifier mask).
    #[error("not registry metadata: {0}")]
    NotMetadata(&'static str),

    /// The payload carries the identifier mask but cannot be decoded.
    #[error("malformed entry: {0}")]
    MalformedEntry(String),

    /// A hex string had odd length or contained a non-hex character.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Keys are length-prefixed with a single byte on the wire.
    #[error("key too long: {len} bytes (max {max})")]
    KeyTooLong {
        /// Length of the rejected key.
        len: usize,
        /// Largest encodable key.
        max: usize,
    },

    /// The encoded payload does not fit behind a two-byte script prefix.
    #[error("payload too large for a direct push: {len} bytes (max {max})")]
    PayloadTooLarge {
        /// Length of the rejected payload.
        len: usize,
        /// Largest payload a direct push can carry.
        max: usize,
    },

    /// An ownership transfer was found but the transaction names no receiver.
    #[error("ownership transfer without a receiving address")]
    MissingNewOwner,
}

impl From<hex::FromHexError> for CodecError {
    fn from(e: hex::FromHexError) -> Self {
        CodecError::InvalidHex(e.to_string())
    }
}
