//! # Operation Model
//!
//! An [`Operation`] is one decoded registry instruction, stamped with who
//! issued it, where it was mined and how much was burned to issue it. It is
//! immutable once built. Whether it is allowed to take effect is decided by
//! the lookup table, not here.
//!
//! Operation flags on the wire:
//!
//! | Flag          | Kind                |
//! |---------------|---------------------|
//! | `0b0000_0001` | Create              |
//! | `0b0000_0010` | Renew               |
//! | `0b0000_0100` | Delete              |
//! | `0b0000_1000` | Update              |
//! | `0b0001_0000` | TransferOwnership   |

pub mod extract;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::entry::{Entry, EntryKey, EntryValue};
use crate::codec::error::CodecError;
use crate::codec::metadata::{decode_metadata, encode_metadata, Metadata};

pub use extract::extract_operation;

pub const CREATE_FLAG: u8 = 0b0000_0001;
pub const RENEW_FLAG: u8 = 0b0000_0010;
pub const DELETE_FLAG: u8 = 0b0000_0100;
pub const UPDATE_FLAG: u8 = 0b0000_1000;
pub const TRANSFER_OWNERSHIP_FLAG: u8 = 0b0001_0000;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// What an operation does, together with the data only that kind carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Create { value: EntryValue },
    Update { value: EntryValue },
    Renew,
    TransferOwnership { new_owner: String },
    /// Deletion only succeeds while the stored value still equals `value`.
    Delete { value: EntryValue },
}

impl OperationKind {
    pub fn flag(&self) -> u8 {
        match self {
            OperationKind::Create { .. } => CREATE_FLAG,
            OperationKind::Update { .. } => UPDATE_FLAG,
            OperationKind::Renew => RENEW_FLAG,
            OperationKind::TransferOwnership { .. } => TRANSFER_OWNERSHIP_FLAG,
            OperationKind::Delete { .. } => DELETE_FLAG,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Create { .. } => "create",
            OperationKind::Update { .. } => "update",
            OperationKind::Renew => "renew",
            OperationKind::TransferOwnership { .. } => "transfer",
            OperationKind::Delete { .. } => "delete",
        }
    }
}

/// Facts about an operation that come from the enclosing transaction rather
/// than from the metadata itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    /// Address that funded the transaction.
    pub owner: String,
    /// Address receiving the first spendable output, if any.
    pub new_owner: Option<String>,
    /// Height of the containing block.
    pub block: u64,
    /// Amount burned in the data-carrier output, in base units.
    pub weight: u64,
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    key: EntryKey,
    owner: String,
    block: u64,
    weight: u64,
    kind: OperationKind,
}

impl Operation {
    pub fn new(
        key: impl Into<EntryKey>,
        owner: impl Into<String>,
        block: u64,
        weight: u64,
        kind: OperationKind,
    ) -> Self {
        Self {
            key: key.into(),
            owner: owner.into(),
            block,
            weight,
            kind,
        }
    }

    /// Decodes a metadata payload (mask included) into an operation.
    pub fn from_metadata(payload: &[u8], context: OperationContext) -> Result<Self, CodecError> {
        Self::from_decoded(decode_metadata(payload)?, context)
    }

    /// Builds an operation from already-decoded metadata.
    ///
    /// Renew and transfer ignore the entry value. A transfer needs a
    /// receiving address in `context`.
    pub fn from_decoded(metadata: Metadata, context: OperationContext) -> Result<Self, CodecError> {
        let Metadata {
            operation_flag,
            entry: Entry { key, value },
        } = metadata;

        let kind = match operation_flag {
            CREATE_FLAG => OperationKind::Create { value },
            UPDATE_FLAG => OperationKind::Update { value },
            DELETE_FLAG => OperationKind::Delete { value },
            RENEW_FLAG => OperationKind::Renew,
            TRANSFER_OWNERSHIP_FLAG => OperationKind::TransferOwnership {
                new_owner: context.new_owner.ok_or(CodecError::MissingNewOwner)?,
            },
            other => {
                return Err(CodecError::MalformedEntry(format!(
                    "unknown operation flag 0b{other:08b}"
                )))
            }
        };

        Ok(Self {
            key,
            owner: context.owner,
            block: context.block,
            weight: context.weight,
            kind,
        })
    }

    /// Encodes the operation back into a metadata payload, as a wallet
    /// would before broadcasting it. Kinds without a value carry `None`.
    pub fn to_metadata(&self) -> Result<Vec<u8>, CodecError> {
        let value = self.value().cloned().unwrap_or(EntryValue::None);
        encode_metadata(self.kind.flag(), &Entry::new(self.key.clone(), value))
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// Value carried by create, update and delete.
    pub fn value(&self) -> Option<&EntryValue> {
        match &self.kind {
            OperationKind::Create { value }
            | OperationKind::Update { value }
            | OperationKind::Delete { value } => Some(value),
            OperationKind::Renew | OperationKind::TransferOwnership { .. } => None,
        }
    }

    pub fn new_owner(&self) -> Option<&str> {
        match &self.kind {
            OperationKind::TransferOwnership { new_owner } => Some(new_owner),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} key={} owner={} block={} weight={}",
            self.kind.name(),
            hex::encode(&self.key),
            self.owner,
            self.block,
            self.weight
        )
    }
}
