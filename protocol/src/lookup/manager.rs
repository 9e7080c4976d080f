//! # Sync Manager
//!
//! The `LookupManager` keeps the registry in step with the chain. It owns the
//! one and only [`LookupTable`] together with the hash of every block it has
//! indexed, and it is the only thing that ever writes to either.
//!
//! ## Passes
//!
//! A sync pass walks every mature block above the current height, in order:
//!
//! ```text
//! getblockcount ─> target = tip - maturity
//!      │
//!      └─ for h in current+1 ..= target
//!            getblockhash(h) ─> getblock ─> getrawtransaction (each)
//!                 ─> extract operations ─> apply ─> record hash ─> prune
//! ```
//!
//! A failure stops the pass where it is. Blocks applied before the failure
//! stay applied, and the next pass resumes right after them.
//!
//! ## Locking
//!
//! The table and hash history sit behind a single `tokio::sync::RwLock`.
//! Passes hold the write half from start to finish, daemon round-trips
//! included, so readers never observe a half-indexed block. An atomic
//! "indexing" flag is taken before the lock: a second update or rebuild
//! arriving mid-pass fails immediately with [`SyncError::AlreadyIndexing`]
//! instead of queueing behind the first.
//!
//! ## Reorgs
//!
//! Nothing here heals itself. [`LookupManager::check_validity`] compares the
//! recorded hashes with the daemon's current view; when it reports `false`
//! the caller decides whether to [`rebuild`](LookupManager::rebuild_lookup).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::error::SyncError;
use super::table::{LookupRecord, LookupTable};
use crate::codec::entry::{EntryKey, EntryValue};
use crate::config::{CoinParams, Network};
use crate::daemon::{ChainDaemon, DaemonError};
use crate::operation::extract_operation;
use crate::storage::{IndexSnapshot, RegistryDb};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle of the manager. `ShuttingDown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ManagerState {
    Idle = 0,
    Syncing = 1,
    ShuttingDown = 2,
}

impl ManagerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ManagerState::Idle,
            1 => ManagerState::Syncing,
            _ => ManagerState::ShuttingDown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ManagerState::Idle => "idle",
            ManagerState::Syncing => "syncing",
            ManagerState::ShuttingDown => "shutting_down",
        }
    }
}

/// Table plus the hash history that proves which chain it was built from.
/// `block_hashes[i]` is the hash at height `starting_height + 1 + i`.
#[derive(Debug, Default)]
struct IndexState {
    table: LookupTable,
    block_hashes: Vec<String>,
}

/// Point-in-time view of the manager, served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerStatus {
    pub network: Network,
    pub state: ManagerState,
    pub height: u64,
    pub entries: usize,
    pub indexed_blocks: usize,
}

/// Outcome of a successful update or rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub rebuild: bool,
    pub blocks_applied: u64,
    pub operations_applied: usize,
    pub height: u64,
    pub entries: usize,
    pub duration: Duration,
}

/// Hook for anything that wants to follow sync passes, such as metrics.
///
/// A failed pass still reports the blocks it applied before the error,
/// since those stay committed.
pub trait SyncObserver: Send + Sync {
    fn pass_completed(&self, _report: &PassReport) {}
    fn pass_failed(&self, _report: &PassReport, _error: &SyncError) {}
}

#[derive(Debug, Default)]
struct PassProgress {
    blocks_applied: u64,
    operations_applied: usize,
}

// ---------------------------------------------------------------------------
// LookupManager
// ---------------------------------------------------------------------------

pub struct LookupManager {
    daemon: Arc<dyn ChainDaemon>,
    params: CoinParams,
    index: RwLock<IndexState>,
    indexing: AtomicBool,
    state: AtomicU8,
    sync_interval: Duration,
    store: Option<RegistryDb>,
    observer: Option<Arc<dyn SyncObserver>>,
}

impl LookupManager {
    /// Creates a manager with an empty table positioned at the network's
    /// starting height.
    pub fn new(daemon: Arc<dyn ChainDaemon>, params: CoinParams) -> Self {
        let mut table = LookupTable::new();
        table.set_height(params.starting_height);

        Self {
            daemon,
            params,
            index: RwLock::new(IndexState {
                table,
                block_hashes: Vec::new(),
            }),
            indexing: AtomicBool::new(false),
            state: AtomicU8::new(ManagerState::Idle as u8),
            sync_interval: params.sync_interval(),
            store: None,
            observer: None,
        }
    }

    /// Attaches a snapshot store, restoring the index from it when a usable
    /// snapshot exists.
    pub fn with_store(mut self, store: RegistryDb) -> Result<Self, SyncError> {
        if let Some(snapshot) = store.load_snapshot_for(self.params.network)? {
            let expected = self.params.starting_height + snapshot.block_hashes.len() as u64;
            if snapshot.height == expected {
                info!(
                    height = snapshot.height,
                    entries = snapshot.records.len(),
                    "restored registry snapshot"
                );
                let index = self.index.get_mut();
                index.table = LookupTable::from_records(snapshot.height, snapshot.records);
                index.block_hashes = snapshot.block_hashes;
            } else {
                warn!(
                    height = snapshot.height,
                    hashes = snapshot.block_hashes.len(),
                    "ignoring inconsistent registry snapshot"
                );
            }
        }
        self.store = Some(store);
        Ok(self)
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Overrides the background cadence, which defaults to half the block
    /// time.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn params(&self) -> &CoinParams {
        &self.params
    }

    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_indexing(&self) -> bool {
        self.indexing.load(Ordering::Acquire)
    }

    /// Stops accepting new passes. A pass already running completes.
    pub fn shutdown(&self) {
        self.state
            .store(ManagerState::ShuttingDown as u8, Ordering::Release);
    }

    // -- Passes -------------------------------------------------------------

    /// Indexes every mature block above the current height.
    ///
    /// Returns `true` if at least one block was applied.
    pub async fn update_lookup(&self) -> Result<bool, SyncError> {
        let _guard = self.begin_indexing()?;
        let started = Instant::now();
        let mut index = self.index.write().await;

        let mut progress = PassProgress::default();
        let result = self.sync_forward(&mut index, &mut progress).await;
        self.finish_pass(&index, progress, started, false, result)
    }

    /// Discards the index and replays the chain from the starting height.
    pub async fn rebuild_lookup(&self) -> Result<(), SyncError> {
        let _guard = self.begin_indexing()?;
        let started = Instant::now();
        let mut index = self.index.write().await;

        info!(
            network = %self.params.network,
            from = self.params.starting_height,
            discarded = index.table.len(),
            "rebuilding registry index"
        );
        index.table.clear();
        index.table.set_height(self.params.starting_height);
        index.block_hashes.clear();

        let mut progress = PassProgress::default();
        let result = self.sync_forward(&mut index, &mut progress).await;
        self.finish_pass(&index, progress, started, true, result)
            .map(|_| ())
    }

    /// Checks every recorded block hash against the daemon.
    ///
    /// Returns `false` at the first mismatch, or when an indexed height no
    /// longer exists on the daemon's chain.
    pub async fn check_validity(&self) -> Result<bool, SyncError> {
        let index = self.index.read().await;
        for (offset, recorded) in index.block_hashes.iter().enumerate() {
            let height = self.params.starting_height + 1 + offset as u64;
            let current = match self.daemon.get_block_hash(height).await {
                Ok(hash) => hash,
                Err(DaemonError::NotFound(_)) => {
                    warn!(height, "indexed block no longer on the daemon's chain");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };
            if &current != recorded {
                warn!(height, %recorded, %current, "indexed block hash mismatch");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Runs `update_lookup` every sync interval until `shutdown` flips to
    /// `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            network = %self.params.network,
            interval_ms = self.sync_interval.as_millis() as u64,
            "sync loop starting"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.update_lookup().await {
                Ok(_) => {}
                Err(SyncError::AlreadyIndexing) => {
                    debug!("indexing already in progress, skipping cycle");
                }
                Err(SyncError::ShuttingDown) => break,
                Err(e) => warn!(error = %e, "sync cycle failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.sync_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.shutdown();
        info!("sync loop stopped");
    }

    // -- Reads --------------------------------------------------------------

    pub async fn lookup_value(&self, key: &[u8]) -> Option<EntryValue> {
        self.index.read().await.table.lookup(key).cloned()
    }

    pub async fn lookup_owner(&self, key: &[u8]) -> Option<String> {
        self.index
            .read()
            .await
            .table
            .lookup_owner(key)
            .map(str::to_string)
    }

    pub async fn lookup_record(&self, key: &[u8]) -> Option<LookupRecord> {
        self.index.read().await.table.lookup_record(key).cloned()
    }

    pub async fn lookup_activation_block(&self, key: &[u8]) -> Option<u64> {
        self.index.read().await.table.lookup_activation_block(key)
    }

    pub async fn entries_of_owner(&self, owner: &str) -> Vec<(EntryKey, LookupRecord)> {
        self.index.read().await.table.entries_of_owner(owner)
    }

    pub async fn height(&self) -> u64 {
        self.index.read().await.table.height()
    }

    pub async fn status(&self) -> ManagerStatus {
        let index = self.index.read().await;
        ManagerStatus {
            network: self.params.network,
            state: self.state(),
            height: index.table.height(),
            entries: index.table.len(),
            indexed_blocks: index.block_hashes.len(),
        }
    }

    // -- Internals ----------------------------------------------------------

    fn begin_indexing(&self) -> Result<IndexingGuard<'_>, SyncError> {
        if self.state() == ManagerState::ShuttingDown {
            return Err(SyncError::ShuttingDown);
        }
        self.indexing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::AlreadyIndexing)?;
        let _ = self.state.compare_exchange(
            ManagerState::Idle as u8,
            ManagerState::Syncing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        Ok(IndexingGuard { manager: self })
    }

    async fn sync_forward(
        &self,
        index: &mut IndexState,
        progress: &mut PassProgress,
    ) -> Result<(), SyncError> {
        let chain_height = self.daemon.get_block_count().await?;
        let Some(target) = self.params.mature_height(chain_height) else {
            debug!(chain_height, "chain shorter than maturity depth");
            return Ok(());
        };

        let current = index.table.height();
        if target <= current {
            return Ok(());
        }
        debug!(current, target, chain_height, "indexing mature blocks");

        for height in current + 1..=target {
            progress.operations_applied += self.index_block(index, height).await?;
            progress.blocks_applied += 1;
        }
        Ok(())
    }

    /// Indexes one block. Returns the number of operations that took effect.
    async fn index_block(&self, index: &mut IndexState, height: u64) -> Result<usize, SyncError> {
        let hash = self.daemon.get_block_hash(height).await?;
        let block = self.daemon.get_block(&hash).await?;

        let mut ops = Vec::new();
        for txid in &block.txids {
            let tx = self.daemon.get_transaction(txid).await?;
            if let Some(op) = extract_operation(&tx, height, self.daemon.as_ref()).await? {
                ops.push(op);
            }
        }

        let found = ops.len();
        let summary = index.table.apply_operations(ops)?;
        index.block_hashes.push(hash);
        index.table.set_height(height);

        if let Some(ttl) = self.params.entry_ttl {
            let pruned = index.table.prune_expired(ttl);
            if pruned > 0 {
                debug!(height, pruned, "expired entries pruned");
            }
        }

        debug!(
            height,
            hash = %block.hash,
            txs = block.txids.len(),
            ops = found,
            applied = summary.applied,
            "block indexed"
        );
        Ok(summary.applied)
    }

    /// Persists, logs and reports the end of a pass.
    fn finish_pass(
        &self,
        index: &IndexState,
        progress: PassProgress,
        started: Instant,
        rebuild: bool,
        result: Result<(), SyncError>,
    ) -> Result<bool, SyncError> {
        let changed = rebuild || progress.blocks_applied > 0;
        let saved = if changed { self.save(index) } else { Ok(()) };

        let result = match (result, saved) {
            (Ok(()), Ok(())) => Ok(changed),
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(save_error)) => {
                warn!(error = %save_error, "failed to persist partial progress");
                Err(e)
            }
        };

        let report = PassReport {
            rebuild,
            blocks_applied: progress.blocks_applied,
            operations_applied: progress.operations_applied,
            height: index.table.height(),
            entries: index.table.len(),
            duration: started.elapsed(),
        };

        match &result {
            Ok(_) => {
                if changed {
                    info!(
                        rebuild,
                        blocks = report.blocks_applied,
                        ops = report.operations_applied,
                        height = report.height,
                        entries = report.entries,
                        elapsed_ms = report.duration.as_millis() as u64,
                        "sync pass complete"
                    );
                }
                if let Some(observer) = &self.observer {
                    observer.pass_completed(&report);
                }
            }
            Err(e) => {
                warn!(
                    rebuild,
                    blocks = report.blocks_applied,
                    height = report.height,
                    error = %e,
                    "sync pass aborted"
                );
                if let Some(observer) = &self.observer {
                    observer.pass_failed(&report, e);
                }
            }
        }
        result
    }

    fn save(&self, index: &IndexState) -> Result<(), SyncError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = IndexSnapshot {
            network: self.params.network,
            height: index.table.height(),
            block_hashes: index.block_hashes.clone(),
            records: index
                .table
                .iter()
                .map(|(key, record)| (key.clone(), record.clone()))
                .collect(),
        };
        store.save_snapshot(&snapshot)?;
        Ok(())
    }
}

/// Releases the indexing flag when a pass ends, however it ends.
struct IndexingGuard<'a> {
    manager: &'a LookupManager,
}

impl Drop for IndexingGuard<'_> {
    fn drop(&mut self) {
        let _ = self.manager.state.compare_exchange(
            ManagerState::Syncing as u8,
            ManagerState::Idle as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.manager.indexing.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
