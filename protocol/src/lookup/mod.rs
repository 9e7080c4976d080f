//! # Lookup
//!
//! The registry's queryable state and the machinery that keeps it current.
//!
//! - [`table`]: the in-memory key/value table and its admission rules.
//! - [`manager`]: the sync manager that feeds the table from the chain.

pub mod error;
pub mod manager;
pub mod table;

pub use error::{LookupError, SyncError};
pub use manager::{LookupManager, ManagerState, ManagerStatus, PassReport, SyncObserver};
pub use table::{ApplySummary, LookupRecord, LookupTable};
