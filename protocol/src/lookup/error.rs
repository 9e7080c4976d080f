//! Error types for the lookup table and the sync manager.

use thiserror::Error;

use crate::daemon::DaemonError;
use crate::storage::DbError;

/// Errors raised by [`LookupTable`](super::LookupTable).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// A batch contained an operation from a block the table has already
    /// moved past. Blocks must be applied in strictly increasing order.
    #[error("operation at block {block} does not advance table height {height}")]
    InvariantViolated { block: u64, height: u64 },
}

/// Errors surfaced by [`LookupManager`](super::LookupManager).
///
/// Blocks applied before an error stay applied. A failed pass can simply be
/// retried and resumes from the last indexed height.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another update or rebuild is in progress.
    #[error("Server is already indexing")]
    AlreadyIndexing,

    /// The manager has been told to shut down and accepts no more work.
    #[error("indexer is shutting down")]
    ShuttingDown,

    #[error("daemon error: {0}")]
    Daemon(#[from] DaemonError),

    #[error("lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}
