//! Strict hex conversion.
//!
//! Odd-length strings and non-hex characters are rejected outright. Encoding
//! always produces lowercase, so `bytes_to_hex(hex_to_bytes(s))` equals
//! `s.to_ascii_lowercase()` for every valid `s`.

use super::error::CodecError;

/// Decodes a hex string into bytes. Accepts upper and lower case digits.
pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>, CodecError> {
    Ok(hex::decode(s)?)
}

/// Encodes bytes as lowercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
