//! # Storage Module
//!
//! Persistence for the registry index. The indexer works entirely in memory;
//! this module only snapshots that state to sled so a restart does not mean
//! replaying the chain from the starting height.
//!
//! Bincode is used on disk. JSON is for the API.

pub mod db;

pub use db::{DbError, DbResult, IndexSnapshot, RegistryDb};
