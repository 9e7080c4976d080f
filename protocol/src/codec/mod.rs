//! # Entry Codec
//!
//! Binary and hex encoding of registry metadata:
//!
//! - [`hex`]: strict hex conversion used everywhere a script is touched.
//! - [`entry`]: keys, typed values and the entry wire layout.
//! - [`metadata`]: the masked header and the `OP_RETURN` script wrapper.
//!
//! Decoding is total over its inputs: anything that is not well-formed
//! registry metadata comes back as a [`CodecError`], never a panic.

pub mod entry;
pub mod error;
pub mod hex;
pub mod metadata;

pub use entry::{decode_entry, encode_entry, Entry, EntryKey, EntryValue, MAX_KEY_LEN};
pub use error::CodecError;
pub use self::hex::{bytes_to_hex, hex_to_bytes};
pub use metadata::{
    decode_metadata, encode_metadata, extract_metadata, is_data_carrier, metadata_script,
    Metadata,
};
