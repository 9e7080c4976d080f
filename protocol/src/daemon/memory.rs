//! In-process chain used by tests and local demos.
//!
//! Block hashes are BLAKE3 digests chained over the previous hash, the height
//! and the transaction ids, so replacing a block changes its hash and the hash
//! of every block above it, just like a real reorg.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::error::DaemonError;
use super::types::{Block, Transaction, TxIn, TxOut};
use super::ChainDaemon;
use crate::codec::error::CodecError;
use crate::codec::metadata::metadata_script;

/// Script of a plain pay-to-address output. The content is irrelevant to the
/// indexer as long as it is not a data carrier.
const PAY_SCRIPT_HEX: &str = "76a914000000000000000000000000000000000000000088ac";

/// Output value used for funding and receiver outputs.
const DUST_VALUE: u64 = 546;

#[derive(Default)]
struct ChainState {
    blocks: Vec<Block>,
    transactions: HashMap<String, Transaction>,
    nonce: u64,
    failing_height: Option<u64>,
}

impl ChainState {
    fn next_nonce(&mut self) -> u64 {
        self.nonce += 1;
        self.nonce
    }

    fn block_hash(&self, prev: &str, height: u64, txids: &[String], salt: u64) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(prev.as_bytes());
        hasher.update(&height.to_le_bytes());
        hasher.update(&salt.to_le_bytes());
        for txid in txids {
            hasher.update(txid.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Recomputes hashes from `from` upward after a block changed.
    fn rehash_from(&mut self, from: u64) {
        for height in from..self.blocks.len() as u64 {
            let prev = match height.checked_sub(1) {
                Some(h) => self.blocks[h as usize].hash.clone(),
                None => String::new(),
            };
            let salt = self.next_nonce();
            let hash = self.block_hash(&prev, height, &self.blocks[height as usize].txids, salt);
            self.blocks[height as usize].hash = hash;
        }
    }
}

/// A chain held entirely in memory. Starts with an empty genesis block at
/// height zero.
pub struct MemoryDaemon {
    state: RwLock<ChainState>,
}

impl MemoryDaemon {
    pub fn new() -> Self {
        let daemon = Self {
            state: RwLock::new(ChainState::default()),
        };
        daemon.push_block(Vec::new());
        daemon
    }

    /// Current best height.
    pub fn height(&self) -> u64 {
        (self.state.read().blocks.len() as u64).saturating_sub(1)
    }

    /// Appends a block containing `transactions` and returns it.
    pub fn push_block(&self, transactions: Vec<Transaction>) -> Block {
        let mut state = self.state.write();
        let height = state.blocks.len() as u64;
        let prev = state.blocks.last().map(|b| b.hash.clone()).unwrap_or_default();
        let txids: Vec<String> = transactions.iter().map(|tx| tx.txid.clone()).collect();
        let salt = state.next_nonce();
        let hash = state.block_hash(&prev, height, &txids, salt);

        for tx in transactions {
            state.transactions.insert(tx.txid.clone(), tx);
        }
        let block = Block { height, hash, txids };
        state.blocks.push(block.clone());
        block
    }

    /// Appends `count` empty blocks.
    pub fn mine_empty(&self, count: u64) {
        for _ in 0..count {
            self.push_block(Vec::new());
        }
    }

    /// Swaps the contents of the block at `height` and rehashes it and every
    /// block above. Returns `false` if no such block exists.
    pub fn replace_block(&self, height: u64, transactions: Vec<Transaction>) -> bool {
        let mut state = self.state.write();
        if height as usize >= state.blocks.len() {
            return false;
        }
        let txids = transactions.iter().map(|tx| tx.txid.clone()).collect();
        for tx in transactions {
            state.transactions.insert(tx.txid.clone(), tx);
        }
        state.blocks[height as usize].txids = txids;
        state.rehash_from(height);
        true
    }

    /// Makes every lookup of the block at `height` fail until cleared.
    pub fn fail_at(&self, height: Option<u64>) {
        self.state.write().failing_height = height;
    }

    /// Records an unconfirmed transaction paying `address` and returns an
    /// input spending it.
    pub fn fund_address(&self, address: &str) -> TxIn {
        let mut state = self.state.write();
        let nonce = state.next_nonce();
        let txid = blake3::hash(format!("fund:{address}:{nonce}").as_bytes())
            .to_hex()
            .to_string();
        state.transactions.insert(
            txid.clone(),
            Transaction {
                txid: txid.clone(),
                inputs: Vec::new(),
                outputs: vec![pay_output(address)],
            },
        );
        TxIn { txid, vout: 0 }
    }

    /// Builds a transaction carrying `payload` in a data-carrier output worth
    /// `burn`, spent from `owner`, optionally paying `receiver`. The result is
    /// not on chain until passed to [`push_block`](Self::push_block).
    pub fn metadata_transaction(
        &self,
        owner: &str,
        payload: &[u8],
        burn: u64,
        receiver: Option<&str>,
    ) -> Result<Transaction, CodecError> {
        let input = self.fund_address(owner);
        let mut outputs = vec![TxOut {
            value: burn,
            script_hex: metadata_script(payload)?,
            addresses: Vec::new(),
        }];
        outputs.extend(receiver.map(pay_output));

        let nonce = self.state.write().next_nonce();
        let mut hasher = blake3::Hasher::new();
        hasher.update(input.txid.as_bytes());
        hasher.update(payload);
        hasher.update(&nonce.to_le_bytes());

        Ok(Transaction {
            txid: hasher.finalize().to_hex().to_string(),
            inputs: vec![input],
            outputs,
        })
    }

    fn check_failure(&self, height: u64) -> Result<(), DaemonError> {
        if self.state.read().failing_height == Some(height) {
            return Err(DaemonError::Rpc {
                code: -1,
                message: format!("injected failure at height {height}"),
            });
        }
        Ok(())
    }
}

impl Default for MemoryDaemon {
    fn default() -> Self {
        Self::new()
    }
}

fn pay_output(address: &str) -> TxOut {
    TxOut {
        value: DUST_VALUE,
        script_hex: PAY_SCRIPT_HEX.to_string(),
        addresses: vec![address.to_string()],
    }
}

#[async_trait]
impl ChainDaemon for MemoryDaemon {
    async fn get_block_count(&self) -> Result<u64, DaemonError> {
        Ok(self.height())
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, DaemonError> {
        self.check_failure(height)?;
        self.state
            .read()
            .blocks
            .get(height as usize)
            .map(|b| b.hash.clone())
            .ok_or_else(|| DaemonError::NotFound(format!("block at height {height}")))
    }

    async fn get_block(&self, hash: &str) -> Result<Block, DaemonError> {
        let block = self
            .state
            .read()
            .blocks
            .iter()
            .find(|b| b.hash == hash)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(format!("block {hash}")))?;
        self.check_failure(block.height)?;
        Ok(block)
    }

    async fn get_transaction(&self, txid: &str) -> Result<Transaction, DaemonError> {
        self.state
            .read()
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(format!("transaction {txid}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_with_genesis() {
        let daemon = MemoryDaemon::new();
        assert_eq!(daemon.get_block_count().await.unwrap(), 0);
        let hash = daemon.get_block_hash(0).await.unwrap();
        let genesis = daemon.get_block(&hash).await.unwrap();
        assert_eq!(genesis.height, 0);
        assert!(genesis.txids.is_empty());
    }

    #[tokio::test]
    async fn test_replace_block_rehashes_upward() {
        let daemon = MemoryDaemon::new();
        daemon.mine_empty(4);
        let before: Vec<String> = (0..=4)
            .map(|h| daemon.state.read().blocks[h].hash.clone())
            .collect();

        assert!(daemon.replace_block(2, Vec::new()));
        for h in 0..=1u64 {
            assert_eq!(daemon.get_block_hash(h).await.unwrap(), before[h as usize]);
        }
        for h in 2..=4u64 {
            assert_ne!(daemon.get_block_hash(h).await.unwrap(), before[h as usize]);
        }
        assert!(!daemon.replace_block(9, Vec::new()));
    }

    #[tokio::test]
    async fn test_resolve_input_finds_funded_address() {
        let daemon = MemoryDaemon::new();
        let input = daemon.fund_address("alice");
        let spent = daemon.resolve_input(&input).await.unwrap();
        assert_eq!(spent.first_address(), Some("alice"));

        let bogus = TxIn { txid: input.txid, vout: 7 };
        assert!(matches!(
            daemon.resolve_input(&bogus).await,
            Err(DaemonError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_metadata_transaction_shape() {
        let daemon = MemoryDaemon::new();
        let tx = daemon
            .metadata_transaction("alice", &[0xC6, 0xDC, 0x01], 1_000, Some("bob"))
            .unwrap();
        daemon.push_block(vec![tx.clone()]);

        assert_eq!(tx.data_carrier_outputs().count(), 1);
        assert_eq!(tx.outputs[0].value, 1_000);
        assert_eq!(tx.first_spendable_output().and_then(TxOut::first_address), Some("bob"));
        assert_eq!(daemon.get_transaction(&tx.txid).await.unwrap(), tx);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let daemon = MemoryDaemon::new();
        daemon.mine_empty(2);
        daemon.fail_at(Some(2));
        assert!(matches!(
            daemon.get_block_hash(2).await,
            Err(DaemonError::Rpc { code: -1, .. })
        ));
        daemon.fail_at(None);
        assert!(daemon.get_block_hash(2).await.is_ok());
    }
}
