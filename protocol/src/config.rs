//! # Registry Configuration & Constants
//!
//! Every magic number the indexer depends on lives here: the wire-format
//! identifiers, the script prefix, and the per-network parameters that decide
//! how deep a block must be before we trust it and how long an entry lives.
//!
//! Changing a wire constant after entries exist on-chain orphans every one
//! of them, so treat this section as frozen once a network launches.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Wire Identifiers
// ---------------------------------------------------------------------------

/// Marker bytes that open every registry payload. Metadata without this
/// prefix belongs to somebody else and is ignored.
pub const IDENTIFIER_MASK: [u8; 2] = [0xC6, 0xDC];

/// Entity-type flag for key/value entries. It is the only entity type we
/// index today; anything else is not registry metadata.
pub const ENTRY_ENTITY_FLAG: u8 = 0b0000_0001;

/// Script opcode (hex) that marks a data-carrier output.
pub const OP_RETURN_HEX: &str = "6a";

/// Shortest output script (in hex characters) that can possibly carry a
/// registry payload: opcode, push length, mask and flags.
pub const MIN_METADATA_SCRIPT_LEN: usize = 13;

/// Number of hex characters stripped off the front of a data-carrier script
/// (one opcode byte plus one push-length byte).
pub const SCRIPT_PREFIX_HEX_LEN: usize = 4;

/// Largest payload a single direct push can carry after `OP_RETURN`.
pub const MAX_DIRECT_PUSH: usize = 75;

/// Base units per coin. Daemons report output values in coins.
pub const BASE_UNITS_PER_COIN: f64 = 100_000_000.0;

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

/// The chains the indexer knows how to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// Chain parameters for this network.
    pub fn params(self) -> CoinParams {
        match self {
            Network::Mainnet => CoinParams {
                network: self,
                maturity_depth: 10,
                starting_height: 1_850_000,
                block_time: Duration::from_secs(60),
                entry_ttl: Some(525_600),
            },
            Network::Testnet => CoinParams {
                network: self,
                maturity_depth: 6,
                starting_height: 0,
                block_time: Duration::from_secs(60),
                entry_ttl: Some(10_080),
            },
            Network::Regtest => CoinParams {
                network: self,
                maturity_depth: 1,
                starting_height: 0,
                block_time: Duration::from_secs(2),
                entry_ttl: None,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// CoinParams
// ---------------------------------------------------------------------------

/// Per-network knobs consumed by the sync manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoinParams {
    /// Network these parameters belong to.
    pub network: Network,

    /// Number of most recent blocks left unindexed. Anything shallower is
    /// still likely to be reorganized away.
    pub maturity_depth: u64,

    /// Height below which no registry entries can exist. Indexing starts at
    /// `starting_height + 1`.
    pub starting_height: u64,

    /// Expected average time between blocks.
    pub block_time: Duration,

    /// Blocks an entry stays valid after its last (re)activation. `None`
    /// disables expiry.
    pub entry_ttl: Option<u64>,
}

impl CoinParams {
    /// Cadence of the background sync driver: half the block time, so a new
    /// block is usually picked up within one interval of maturing.
    pub fn sync_interval(&self) -> Duration {
        self.block_time / 2
    }

    /// Highest height that is deep enough to index, or `None` while the chain
    /// is still shorter than the maturity depth.
    pub fn mature_height(&self, chain_height: u64) -> Option<u64> {
        chain_height.checked_sub(self.maturity_depth)
    }
}
