//! Keys, typed values, and their binary layout.
//!
//! An encoded entry is laid out as:
//!
//! ```text
//! [value flag: 1B][key length: 1B][key bytes][value payload]
//! ```
//!
//! Fixed-size values (IPv4, IPv6, None) must fill the payload exactly. A byte
//! array takes whatever follows the key, including nothing.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use super::error::CodecError;
use super::hex::bytes_to_hex;

/// Identity of a registry slot. Compared byte for byte.
pub type EntryKey = Vec<u8>;

/// Value-type flag for an IPv4 address.
pub const IPV4_VALUE_FLAG: u8 = 0b0000_0001;
/// Value-type flag for an IPv6 address.
pub const IPV6_VALUE_FLAG: u8 = 0b0000_0010;
/// Value-type flag for the empty marker.
pub const NONE_VALUE_FLAG: u8 = 0b0000_0100;
/// Value-type flag for a variable-length byte array.
pub const BYTE_ARRAY_VALUE_FLAG: u8 = 0b0000_1000;

/// Longest key that fits behind the one-byte length prefix.
pub const MAX_KEY_LEN: usize = u8::MAX as usize;

// ---------------------------------------------------------------------------
// EntryValue
// ---------------------------------------------------------------------------

/// The value held by a registry slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryValue {
    Ipv4([u8; 4]),
    Ipv6([u8; 16]),
    ByteArray(Vec<u8>),
    None,
}

impl EntryValue {
    /// Wire flag identifying this variant.
    pub fn flag(&self) -> u8 {
        match self {
            EntryValue::Ipv4(_) => IPV4_VALUE_FLAG,
            EntryValue::Ipv6(_) => IPV6_VALUE_FLAG,
            EntryValue::ByteArray(_) => BYTE_ARRAY_VALUE_FLAG,
            EntryValue::None => NONE_VALUE_FLAG,
        }
    }

    /// Raw payload bytes, without the flag.
    pub fn payload(&self) -> &[u8] {
        match self {
            EntryValue::Ipv4(addr) => addr,
            EntryValue::Ipv6(addr) => addr,
            EntryValue::ByteArray(bytes) => bytes,
            EntryValue::None => &[],
        }
    }

    /// Short lowercase name used by the query API.
    pub fn type_name(&self) -> &'static str {
        match self {
            EntryValue::Ipv4(_) => "ipv4",
            EntryValue::Ipv6(_) => "ipv6",
            EntryValue::ByteArray(_) => "bytearray",
            EntryValue::None => "none",
        }
    }

    /// Rebuilds a value from its flag and payload.
    pub fn from_parts(flag: u8, payload: &[u8]) -> Result<Self, CodecError> {
        match flag {
            IPV4_VALUE_FLAG => {
                let addr: [u8; 4] = payload.try_into().map_err(|_| {
                    CodecError::MalformedEntry(format!(
                        "ipv4 value needs 4 bytes, got {}",
                        payload.len()
                    ))
                })?;
                Ok(EntryValue::Ipv4(addr))
            }
            IPV6_VALUE_FLAG => {
                let addr: [u8; 16] = payload.try_into().map_err(|_| {
                    CodecError::MalformedEntry(format!(
                        "ipv6 value needs 16 bytes, got {}",
                        payload.len()
                    ))
                })?;
                Ok(EntryValue::Ipv6(addr))
            }
            NONE_VALUE_FLAG => {
                if !payload.is_empty() {
                    return Err(CodecError::MalformedEntry(format!(
                        "none value carries {} trailing bytes",
                        payload.len()
                    )));
                }
                Ok(EntryValue::None)
            }
            BYTE_ARRAY_VALUE_FLAG => Ok(EntryValue::ByteArray(payload.to_vec())),
            other => Err(CodecError::MalformedEntry(format!(
                "unknown value flag 0b{other:08b}"
            ))),
        }
    }
}

impl fmt::Display for EntryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryValue::Ipv4(addr) => write!(f, "{}", Ipv4Addr::from(*addr)),
            EntryValue::Ipv6(addr) => write!(f, "{}", Ipv6Addr::from(*addr)),
            EntryValue::ByteArray(bytes) => f.write_str(&bytes_to_hex(bytes)),
            EntryValue::None => f.write_str("none"),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// A registry slot: a key together with its typed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: EntryKey,
    pub value: EntryValue,
}

impl Entry {
    pub fn new(key: impl Into<EntryKey>, value: EntryValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Serializes an entry into its wire layout.
pub fn encode_entry(entry: &Entry) -> Result<Vec<u8>, CodecError> {
    let key_len = entry.key.len();
    if key_len > MAX_KEY_LEN {
        return Err(CodecError::KeyTooLong {
            len: key_len,
            max: MAX_KEY_LEN,
        });
    }

    let payload = entry.value.payload();
    let mut out = Vec::with_capacity(2 + key_len + payload.len());
    out.push(entry.value.flag());
    out.push(key_len as u8);
    out.extend_from_slice(&entry.key);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Parses an entry from its wire layout. The whole slice must be consumed.
pub fn decode_entry(bytes: &[u8]) -> Result<Entry, CodecError> {
    let (&flag, rest) = bytes
        .split_first()
        .ok_or_else(|| CodecError::MalformedEntry("missing value flag".into()))?;
    let (&key_len, rest) = rest
        .split_first()
        .ok_or_else(|| CodecError::MalformedEntry("missing key length".into()))?;

    let key_len = key_len as usize;
    if rest.len() < key_len {
        return Err(CodecError::MalformedEntry(format!(
            "key truncated: expected {key_len} bytes, got {}",
            rest.len()
        )));
    }
    let (key, payload) = rest.split_at(key_len);

    Ok(Entry {
        key: key.to_vec(),
        value: EntryValue::from_parts(flag, payload)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_values() -> Vec<EntryValue> {
        vec![
            EntryValue::Ipv4([192, 168, 0, 1]),
            EntryValue::Ipv6([0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]),
            EntryValue::ByteArray(b"hello registry".to_vec()),
            EntryValue::ByteArray(Vec::new()),
            EntryValue::None,
        ]
    }

    #[test]
    fn test_round_trip_every_value_kind() {
        for value in sample_values() {
            let entry = Entry::new(b"example.key".to_vec(), value);
            let encoded = encode_entry(&entry).unwrap();
            assert_eq!(decode_entry(&encoded).unwrap(), entry);
        }
    }

    #[test]
    fn test_layout_is_flag_len_key_payload() {
        let entry = Entry::new(vec![0xAB], EntryValue::Ipv4([1, 2, 3, 4]));
        let encoded = encode_entry(&entry).unwrap();
        assert_eq!(encoded, vec![IPV4_VALUE_FLAG, 1, 0xAB, 1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_key_is_allowed() {
        let entry = Entry::new(Vec::new(), EntryValue::None);
        let encoded = encode_entry(&entry).unwrap();
        assert_eq!(encoded, vec![NONE_VALUE_FLAG, 0]);
        assert_eq!(decode_entry(&encoded).unwrap(), entry);
    }

    #[test]
    fn test_key_too_long_rejected() {
        let entry = Entry::new(vec![0u8; MAX_KEY_LEN + 1], EntryValue::None);
        assert_eq!(
            encode_entry(&entry),
            Err(CodecError::KeyTooLong {
                len: MAX_KEY_LEN + 1,
                max: MAX_KEY_LEN
            })
        );
    }

    #[test]
    fn test_unknown_value_flag_rejected() {
        let bytes = [0b0011_0000, 1, 0xAB];
        assert!(matches!(
            decode_entry(&bytes),
            Err(CodecError::MalformedEntry(_))
        ));
    }

    #[test]
    fn test_truncated_fixed_value_rejected() {
        // IPv4 with only three payload bytes.
        let bytes = [IPV4_VALUE_FLAG, 1, 0xAB, 1, 2, 3];
        assert!(matches!(
            decode_entry(&bytes),
            Err(CodecError::MalformedEntry(_))
        ));
    }

    #[test]
    fn test_truncated_key_rejected() {
        let bytes = [BYTE_ARRAY_VALUE_FLAG, 5, 0xAB, 0xCD];
        assert!(matches!(
            decode_entry(&bytes),
            Err(CodecError::MalformedEntry(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_after_none_rejected() {
        let bytes = [NONE_VALUE_FLAG, 0, 0xFF];
        assert!(matches!(
            decode_entry(&bytes),
            Err(CodecError::MalformedEntry(_))
        ));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(decode_entry(&[]), Err(CodecError::MalformedEntry(_))));
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(EntryValue::Ipv4([1, 2, 3, 4]).to_string(), "1.2.3.4");
        assert_eq!(EntryValue::ByteArray(vec![0xde, 0xad]).to_string(), "dead");
        assert_eq!(EntryValue::None.to_string(), "none");
        let mut v6 = [0u8; 16];
        v6[15] = 1;
        assert_eq!(EntryValue::Ipv6(v6).to_string(), "::1");
    }
}
