//! # Persistent Storage
//!
//! Disk-backed [`crate::store::ResourceStore`] implementations.

mod redb_store;

pub use redb_store::RedbStore;
