//! Persistent document storage.
//!
//! RocksDB-backed store for current documents, the append-only version
//! ledger, and comments.

pub mod rocks;

pub use rocks::{Document, DocumentStore, StoreConfig, StoreError, VersionRecord};
