//! Registry metadata carried in data-carrier outputs.
//!
//! A metadata payload is the identifier mask, the entity flag and the
//! operation flag, followed by an encoded [`Entry`]:
//!
//! ```text
//! [mask: C6 DC][entity: 0x01][operation flag][entry ...]
//! ```
//!
//! On chain the payload sits behind `OP_RETURN <push len>`. Only direct
//! pushes are understood, which caps the payload at 75 bytes.

use crate::config::{
    ENTRY_ENTITY_FLAG, IDENTIFIER_MASK, MAX_DIRECT_PUSH, MIN_METADATA_SCRIPT_LEN, OP_RETURN_HEX,
    SCRIPT_PREFIX_HEX_LEN,
};

use super::entry::{decode_entry, encode_entry, Entry};
use super::error::CodecError;
use super::hex::{bytes_to_hex, hex_to_bytes};

/// Bytes preceding the encoded entry.
const HEADER_LEN: usize = IDENTIFIER_MASK.len() + 2;

/// A decoded metadata payload. The operation flag is kept raw; mapping it to
/// an operation kind is the operation model's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub operation_flag: u8,
    pub entry: Entry,
}

/// Whether an output script is a data carrier (`OP_RETURN ...`).
pub fn is_data_carrier(script_hex: &str) -> bool {
    script_hex
        .get(..OP_RETURN_HEX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(OP_RETURN_HEX))
}

/// Whether a byte payload opens with the identifier mask.
pub fn has_identifier_mask(payload: &[u8]) -> bool {
    payload.starts_with(&IDENTIFIER_MASK)
}

/// Pulls the metadata payload out of a data-carrier output script.
///
/// The returned bytes start with the identifier mask. Scripts that are too
/// short, are not data carriers, or carry somebody else's payload yield
/// [`CodecError::NotMetadata`].
pub fn extract_metadata(script_hex: &str) -> Result<Vec<u8>, CodecError> {
    if script_hex.len() < MIN_METADATA_SCRIPT_LEN {
        return Err(CodecError::NotMetadata("script too short"));
    }
    if !is_data_carrier(script_hex) {
        return Err(CodecError::NotMetadata("not a data-carrier script"));
    }

    let body = script_hex
        .get(SCRIPT_PREFIX_HEX_LEN..)
        .ok_or_else(|| CodecError::MalformedEntry("script prefix is not ascii".into()))?;
    let payload = hex_to_bytes(body)
        .map_err(|e| CodecError::MalformedEntry(format!("script payload: {e}")))?;

    if !has_identifier_mask(&payload) {
        return Err(CodecError::NotMetadata("identifier mask missing"));
    }
    Ok(payload)
}

/// Wraps a metadata payload into an `OP_RETURN` script (hex).
pub fn metadata_script(payload: &[u8]) -> Result<String, CodecError> {
    if payload.len() > MAX_DIRECT_PUSH {
        return Err(CodecError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_DIRECT_PUSH,
        });
    }
    Ok(format!(
        "{OP_RETURN_HEX}{:02x}{}",
        payload.len(),
        bytes_to_hex(payload)
    ))
}

/// Decodes a metadata payload (mask included).
pub fn decode_metadata(payload: &[u8]) -> Result<Metadata, CodecError> {
    if !has_identifier_mask(payload) {
        return Err(CodecError::NotMetadata("identifier mask missing"));
    }
    if payload.len() < HEADER_LEN {
        return Err(CodecError::MalformedEntry(format!(
            "header truncated: {} bytes",
            payload.len()
        )));
    }

    let entity_flag = payload[IDENTIFIER_MASK.len()];
    if entity_flag != ENTRY_ENTITY_FLAG {
        return Err(CodecError::MalformedEntry(format!(
            "unknown entity flag 0b{entity_flag:08b}"
        )));
    }

    Ok(Metadata {
        operation_flag: payload[IDENTIFIER_MASK.len() + 1],
        entry: decode_entry(&payload[HEADER_LEN..])?,
    })
}

/// Encodes an entry and operation flag into a metadata payload.
pub fn encode_metadata(operation_flag: u8, entry: &Entry) -> Result<Vec<u8>, CodecError> {
    let body = encode_entry(entry)?;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&IDENTIFIER_MASK);
    out.push(ENTRY_ENTITY_FLAG);
    out.push(operation_flag);
    out.extend_from_slice(&body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::entry::EntryValue;

    fn sample_entry() -> Entry {
        Entry::new(vec![0xAB], EntryValue::Ipv4([1, 2, 3, 4]))
    }

    #[test]
    fn test_encode_metadata_layout() {
        let payload = encode_metadata(0x01, &sample_entry()).unwrap();
        assert_eq!(
            payload,
            vec![0xC6, 0xDC, 0x01, 0x01, 0x01, 0x01, 0xAB, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_script_round_trip() {
        let payload = encode_metadata(0x08, &sample_entry()).unwrap();
        let script = metadata_script(&payload).unwrap();
        assert!(script.starts_with("6a0b"));

        let extracted = extract_metadata(&script).unwrap();
        assert_eq!(extracted, payload);

        let metadata = decode_metadata(&extracted).unwrap();
        assert_eq!(metadata.operation_flag, 0x08);
        assert_eq!(metadata.entry, sample_entry());
    }

    #[test]
    fn test_extract_accepts_uppercase_hex() {
        let payload = encode_metadata(0x01, &sample_entry()).unwrap();
        let script = metadata_script(&payload).unwrap().to_ascii_uppercase();
        assert_eq!(extract_metadata(&script).unwrap(), payload);
    }

    #[test]
    fn test_short_script_is_not_metadata() {
        assert_eq!(
            extract_metadata("6a04c6dc01"),
            Err(CodecError::NotMetadata("script too short"))
        );
    }

    #[test]
    fn test_non_carrier_script_is_not_metadata() {
        // Pay-to-pubkey-hash script.
        let p2pkh = "76a91489abcdefabbaabbaabbaabbaabbaabbaabbaabba88ac";
        assert_eq!(
            extract_metadata(p2pkh),
            Err(CodecError::NotMetadata("not a data-carrier script"))
        );
    }

    #[test]
    fn test_foreign_payload_is_not_metadata() {
        let script = metadata_script(b"someone else's data").unwrap();
        assert_eq!(
            extract_metadata(&script),
            Err(CodecError::NotMetadata("identifier mask missing"))
        );
    }

    #[test]
    fn test_bad_hex_body_is_malformed() {
        assert!(matches!(
            extract_metadata("6a0bc6dc0101zz"),
            Err(CodecError::MalformedEntry(_))
        ));
    }

    #[test]
    fn test_unknown_entity_flag_rejected() {
        let payload = [0xC6, 0xDC, 0x02, 0x01, 0x04, 0x00];
        assert!(matches!(
            decode_metadata(&payload),
            Err(CodecError::MalformedEntry(_))
        ));
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(matches!(
            decode_metadata(&[0xC6, 0xDC, 0x01]),
            Err(CodecError::MalformedEntry(_))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![0u8; MAX_DIRECT_PUSH + 1];
        assert_eq!(
            metadata_script(&payload),
            Err(CodecError::PayloadTooLarge {
                len: MAX_DIRECT_PUSH + 1,
                max: MAX_DIRECT_PUSH
            })
        );
    }

    #[test]
    fn test_is_data_carrier() {
        assert!(is_data_carrier("6a00"));
        assert!(is_data_carrier("6A00"));
        assert!(!is_data_carrier("76a9"));
        assert!(!is_data_carrier(""));
    }
}
