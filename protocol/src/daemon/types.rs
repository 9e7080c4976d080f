//! Chain data as the indexer sees it.
//!
//! Only the fields registry indexing needs are kept. Output values are in
//! base units regardless of how the daemon reports them.

use serde::{Deserialize, Serialize};

use crate::codec::metadata::is_data_carrier;

/// A block reduced to its height, hash and transaction ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub txids: Vec<String>,
}

/// Reference to the output an input spends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxIn {
    pub txid: String,
    pub vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Amount in base units.
    pub value: u64,
    pub script_hex: String,
    pub addresses: Vec<String>,
}

impl TxOut {
    pub fn is_data_carrier(&self) -> bool {
        is_data_carrier(&self.script_hex)
    }

    pub fn first_address(&self) -> Option<&str> {
        self.addresses.first().map(String::as_str)
    }
}

/// A transaction. Coinbase inputs are omitted, so a coinbase transaction has
/// no inputs at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    /// Outputs whose script starts with `OP_RETURN`.
    pub fn data_carrier_outputs(&self) -> impl Iterator<Item = &TxOut> {
        self.outputs.iter().filter(|out| out.is_data_carrier())
    }

    /// First output that is not a data carrier.
    pub fn first_spendable_output(&self) -> Option<&TxOut> {
        self.outputs.iter().find(|out| !out.is_data_carrier())
    }
}
