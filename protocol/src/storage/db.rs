//! # RegistryDb: Index Snapshots on Disk
//!
//! Rebuilding the registry from the chain's starting height can take a long
//! time on mainnet, so the indexer persists its state after every pass that
//! changed something. On restart it loads the snapshot, checks it against the
//! daemon and carries on from the saved height.
//!
//! ## Tree Layout
//!
//! | Tree       | Key              | Value                   |
//! |------------|------------------|-------------------------|
//! | `snapshot` | `index`          | `bincode(IndexSnapshot)`|
//! | `metadata` | key (UTF-8)      | value (bytes)           |
//!
//! The snapshot is a single value, so every save replaces the whole index in
//! one write. A crash mid-save leaves the previous snapshot intact.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::codec::entry::EntryKey;
use crate::config::Network;
use crate::lookup::LookupRecord;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("snapshot was written for {found}, expected {expected}")]
    NetworkMismatch { expected: Network, found: Network },
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

const SNAPSHOT_KEY: &[u8] = b"index";
const META_INDEXED_HEIGHT: &[u8] = b"indexed_height";
const META_NETWORK: &[u8] = b"network";

// ---------------------------------------------------------------------------
// IndexSnapshot
// ---------------------------------------------------------------------------

/// Everything needed to resume indexing without replaying the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub network: Network,
    pub height: u64,
    /// Hash of every indexed block, starting right above the network's
    /// starting height.
    pub block_hashes: Vec<String>,
    pub records: Vec<(EntryKey, LookupRecord)>,
}

// ---------------------------------------------------------------------------
// RegistryDb
// ---------------------------------------------------------------------------

/// sled-backed store for index snapshots. Cheap to clone; clones share the
/// same database.
#[derive(Debug, Clone)]
pub struct RegistryDb {
    db: Db,
    snapshot: Tree,
    metadata: Tree,
}

impl RegistryDb {
    /// Opens or creates a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Creates a database that is removed when dropped. Used by tests.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let snapshot = db.open_tree("snapshot")?;
        let metadata = db.open_tree("metadata")?;
        Ok(Self {
            db,
            snapshot,
            metadata,
        })
    }

    /// Replaces the stored snapshot and flushes it to disk.
    pub fn save_snapshot(&self, snapshot: &IndexSnapshot) -> DbResult<()> {
        let bytes =
            bincode::serialize(snapshot).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.snapshot.insert(SNAPSHOT_KEY, bytes)?;
        self.metadata
            .insert(META_INDEXED_HEIGHT, &snapshot.height.to_be_bytes())?;
        self.metadata
            .insert(META_NETWORK, snapshot.network.as_str().as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    /// Loads the stored snapshot, if any.
    pub fn load_snapshot(&self) -> DbResult<Option<IndexSnapshot>> {
        match self.snapshot.get(SNAPSHOT_KEY)? {
            Some(bytes) => {
                let snapshot = bincode::deserialize(&bytes)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Loads the stored snapshot and checks it belongs to `network`.
    pub fn load_snapshot_for(&self, network: Network) -> DbResult<Option<IndexSnapshot>> {
        match self.load_snapshot()? {
            Some(snapshot) if snapshot.network != network => Err(DbError::NetworkMismatch {
                expected: network,
                found: snapshot.network,
            }),
            other => Ok(other),
        }
    }

    /// Height of the stored snapshot, read without decoding it.
    pub fn indexed_height(&self) -> DbResult<Option<u64>> {
        match self.metadata.get(META_INDEXED_HEIGHT)? {
            Some(bytes) => {
                let height = u64::from_be_bytes(
                    bytes
                        .as_ref()
                        .try_into()
                        .map_err(|_| DbError::Serialization("invalid height bytes".to_string()))?,
                );
                Ok(Some(height))
            }
            None => Ok(None),
        }
    }

    /// Forgets the stored snapshot.
    pub fn clear(&self) -> DbResult<()> {
        self.snapshot.clear()?;
        self.metadata.clear()?;
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
