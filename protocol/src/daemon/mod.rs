//! # Chain Daemon
//!
//! The indexer reads the chain through the [`ChainDaemon`] trait. Two
//! implementations ship with the crate:
//!
//! - [`RpcDaemon`]: a bitcoind-compatible JSON-RPC client.
//! - [`MemoryDaemon`]: an in-process chain for tests and local demos.
//!
//! Every call is fallible and none are retried here. Retry policy belongs to
//! whoever drives the sync loop.

pub mod error;
pub mod memory;
pub mod rpc;
pub mod types;

use async_trait::async_trait;

pub use error::DaemonError;
pub use memory::MemoryDaemon;
pub use rpc::{RpcDaemon, RpcDaemonConfig};
pub use types::{Block, Transaction, TxIn, TxOut};

/// Read access to a UTXO chain.
#[async_trait]
pub trait ChainDaemon: Send + Sync {
    /// Height of the best block.
    async fn get_block_count(&self) -> Result<u64, DaemonError>;

    /// Hash of the block at `height` on the best chain.
    async fn get_block_hash(&self, height: u64) -> Result<String, DaemonError>;

    async fn get_block(&self, hash: &str) -> Result<Block, DaemonError>;

    async fn get_transaction(&self, txid: &str) -> Result<Transaction, DaemonError>;

    /// Fetches the output spent by `input`.
    async fn resolve_input(&self, input: &TxIn) -> Result<TxOut, DaemonError> {
        let tx = self.get_transaction(&input.txid).await?;
        tx.outputs
            .into_iter()
            .nth(input.vout as usize)
            .ok_or_else(|| DaemonError::NotFound(format!("output {}:{}", input.txid, input.vout)))
    }
}
