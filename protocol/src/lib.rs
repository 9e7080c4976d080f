// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # chainreg Core Library
//!
//! chainreg indexes a key/value registry that lives inside a UTXO chain.
//! Users write to the registry by burning coins into an `OP_RETURN` output
//! that carries a small tagged payload; the indexer follows the chain, decodes
//! those payloads and keeps a table of who owns which key and what it maps to.
//!
//! ## Architecture
//!
//! - **codec**: Wire format of registry metadata. Strict, total decoding.
//! - **operation**: Create, update, renew, transfer and delete, as a sum type.
//! - **lookup**: The registry table and the sync manager that feeds it.
//! - **daemon**: Read access to the chain: JSON-RPC and in-memory.
//! - **storage**: sled snapshots so restarts don't replay the chain.
//! - **config**: Wire constants and per-network parameters.
//!
//! ## Rules of the Registry
//!
//! 1. First create wins a free key. Everything else needs the current owner.
//! 2. Within a block, the operation that burned the most wins its key.
//! 3. Only blocks buried under the maturity depth are indexed.
//! 4. Entries expire unless renewed, on networks that define a lifetime.

pub mod codec;
pub mod config;
pub mod daemon;
pub mod lookup;
pub mod operation;
pub mod storage;

pub use codec::{Entry, EntryKey, EntryValue};
pub use config::{CoinParams, Network};
pub use daemon::{ChainDaemon, MemoryDaemon, RpcDaemon, RpcDaemonConfig};
pub use lookup::{LookupManager, LookupTable, SyncError};
pub use operation::{Operation, OperationKind};
