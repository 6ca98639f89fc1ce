//! RocksDB-backed document store.
//!
//! Column families:
//! - `documents` — current document records (LZ4 compressed)
//! - `versions`  — append-only version ledger (LZ4 compressed, keyed by
//!   doc_id:version)
//! - `comments`  — comments keyed by doc_id:comment_id
//!
//! Versions for a document are strictly increasing and never reused: every
//! save and every rollback appends a new row with version
//! `max(existing) + 1`, so rollback preserves the full history including
//! "future" snapshots left behind by an earlier rollback.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::comment::Comment;
use crate::protocol::now_millis;

/// Column family names.
const CF_DOCUMENTS: &str = "documents";
const CF_VERSIONS: &str = "versions";
const CF_COMMENTS: &str = "comments";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_VERSIONS, CF_COMMENTS];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 64MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scriptorium_data"),
            block_cache_size: 256 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// The current state of a document.
///
/// Mutated only by explicit save or rollback, never by relayed operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    /// Serialized rich text (HTML).
    pub content: String,
    pub creator_id: Uuid,
    /// Monotonically increasing; never reused after rollback.
    pub version: u64,
    /// Epoch milliseconds.
    pub created_at: u64,
    pub updated_at: u64,
}

impl Document {
    fn new(title: impl Into<String>, creator_id: Uuid) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            content: String::new(),
            creator_id,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One row of the append-only version ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub document_id: Uuid,
    pub version: u64,
    pub content: String,
    pub created_by: Uuid,
    pub created_at: u64,
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Document not found
    NotFound(Uuid),
    /// No snapshot for that version of the document
    VersionNotFound(Uuid, u64),
    /// Optimistic save rejected: the stored version moved
    VersionConflict { expected: u64, actual: u64 },
    /// Rollback target equals the current version
    RollbackToCurrent(u64),
    /// Comment not found
    CommentNotFound(Uuid),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
    /// No persistent store configured
    Disabled,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(id) => write!(f, "Document not found: {id}"),
            StoreError::VersionNotFound(id, v) => {
                write!(f, "Version {v} not found for document {id}")
            }
            StoreError::VersionConflict { expected, actual } => {
                write!(f, "Version conflict: expected {expected}, stored {actual}")
            }
            StoreError::RollbackToCurrent(v) => {
                write!(f, "Cannot roll back to the current version {v}")
            }
            StoreError::CommentNotFound(id) => write!(f, "Comment not found: {id}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::Disabled => write!(f, "No persistent store configured"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

fn encode_compressed<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let raw = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&raw))
}

fn decode_compressed<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::CompressionError(e.to_string()))?;
    let (value, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(value)
}

/// RocksDB-backed store for documents, version snapshots, and comments.
pub struct DocumentStore {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl DocumentStore {
    /// Open the document store at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.set_max_total_wal_size(128 * 1024 * 1024);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let cf_opts = Self::cf_options(name, &config);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self { db, config })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_DOCUMENTS => {
                // Point lookups by doc id dominate
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_VERSIONS => {
                // Many appended rows, prefix-scanned by doc_id
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            CF_COMMENTS => {
                opts.set_max_write_buffer_number(2);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            _ => {}
        }

        opts
    }

    // ─── Documents ────────────────────────────────────────────────────

    /// Create a new document owned by `creator_id`.
    ///
    /// Starts at version 1 with empty content and an initial ledger row.
    pub fn create_document(
        &self,
        title: impl Into<String>,
        creator_id: Uuid,
    ) -> Result<Document, StoreError> {
        let document = Document::new(title, creator_id);
        self.write_document_and_version(&document, creator_id)?;
        Ok(document)
    }

    /// Load the current state of a document.
    pub fn get_document(&self, doc_id: Uuid) -> Result<Document, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(&cf, doc_id.as_bytes())? {
            Some(bytes) => decode_compressed(&bytes),
            None => Err(StoreError::NotFound(doc_id)),
        }
    }

    pub fn document_exists(&self, doc_id: Uuid) -> Result<bool, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        Ok(self.db.get_cf(&cf, doc_id.as_bytes())?.is_some())
    }

    /// List all document IDs in the store.
    pub fn list_documents(&self) -> Result<Vec<Uuid>, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut doc_ids = Vec::new();

        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            if key.len() == 16 {
                let id = Uuid::from_bytes(
                    key.as_ref()
                        .try_into()
                        .map_err(|_| StoreError::DeserializationError("Invalid UUID key".into()))?,
                );
                doc_ids.push(id);
            }
        }

        Ok(doc_ids)
    }

    /// Persist new content, last-write-wins.
    ///
    /// Bumps the document version to `max(existing versions) + 1` and
    /// appends a ledger row in the same atomic batch. There is no check
    /// against the version the caller last observed — concurrent saves can
    /// lose updates (see [`Self::save_checked`] for the optimistic variant).
    pub fn save(&self, doc_id: Uuid, content: &str, user_id: Uuid) -> Result<Document, StoreError> {
        let document = self.get_document(doc_id)?;
        self.save_internal(document, content, user_id)
    }

    /// Persist new content only if the stored version still matches
    /// `expected_version`.
    ///
    /// Returns [`StoreError::VersionConflict`] without mutating anything
    /// when another save landed first.
    pub fn save_checked(
        &self,
        doc_id: Uuid,
        content: &str,
        user_id: Uuid,
        expected_version: u64,
    ) -> Result<Document, StoreError> {
        let document = self.get_document(doc_id)?;
        if document.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: document.version,
            });
        }
        self.save_internal(document, content, user_id)
    }

    fn save_internal(
        &self,
        mut document: Document,
        content: &str,
        user_id: Uuid,
    ) -> Result<Document, StoreError> {
        let next = self.latest_version(document.id)?.max(document.version) + 1;
        document.content = content.to_string();
        document.version = next;
        document.updated_at = now_millis();
        self.write_document_and_version(&document, user_id)?;
        Ok(document)
    }

    /// Delete a document, its version history, and its comments.
    pub fn delete_document(&self, doc_id: Uuid) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_versions = self.cf(CF_VERSIONS)?;
        let cf_comments = self.cf(CF_COMMENTS)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_docs, doc_id.as_bytes());

        for cf in [cf_versions, cf_comments] {
            let iter = self.db.iterator_cf(
                cf,
                IteratorMode::From(doc_id.as_bytes(), rocksdb::Direction::Forward),
            );
            for item in iter {
                let (key, _) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
                if key.len() < 16 || &key[..16] != doc_id.as_bytes() {
                    break;
                }
                batch.delete_cf(cf, &key);
            }
        }

        self.db.write(batch)?;
        Ok(())
    }

    // ─── Version ledger ───────────────────────────────────────────────

    /// List every version snapshot of a document, ascending by version.
    ///
    /// The order is the natural key order of the `doc_id ++ version (BE)`
    /// scheme, so it is stable across calls.
    pub fn list_versions(&self, doc_id: Uuid) -> Result<Vec<VersionRecord>, StoreError> {
        let cf = self.cf(CF_VERSIONS)?;
        let start_key = Self::version_key(doc_id, 0);

        let mut versions = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&start_key, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            if key.len() < 24 || &key[..16] != doc_id.as_bytes() {
                break;
            }
            versions.push(decode_compressed(&value)?);
        }

        Ok(versions)
    }

    /// Load a single version snapshot.
    pub fn version_snapshot(&self, doc_id: Uuid, version: u64) -> Result<VersionRecord, StoreError> {
        let cf = self.cf(CF_VERSIONS)?;
        let key = Self::version_key(doc_id, version);
        match self.db.get_cf(&cf, &key)? {
            Some(bytes) => decode_compressed(&bytes),
            None => Err(StoreError::VersionNotFound(doc_id, version)),
        }
    }

    /// Restore a prior snapshot's content as the new current content.
    ///
    /// The target may be any existing version other than the current one,
    /// including versions numerically greater than the current version. A
    /// fresh ledger row is appended at `max(existing versions) + 1`; the
    /// target's own row (and everything between) stays retrievable.
    pub fn rollback(
        &self,
        doc_id: Uuid,
        target_version: u64,
        user_id: Uuid,
    ) -> Result<Document, StoreError> {
        let mut document = self.get_document(doc_id)?;
        if target_version == document.version {
            return Err(StoreError::RollbackToCurrent(target_version));
        }
        let target = self.version_snapshot(doc_id, target_version)?;

        let next = self.latest_version(doc_id)?.max(document.version) + 1;
        document.content = target.content;
        document.version = next;
        document.updated_at = now_millis();
        self.write_document_and_version(&document, user_id)?;
        Ok(document)
    }

    /// Highest version in the ledger for a document (0 if none).
    fn latest_version(&self, doc_id: Uuid) -> Result<u64, StoreError> {
        let cf = self.cf(CF_VERSIONS)?;
        let end_key = Self::version_key(doc_id, u64::MAX);

        let mut iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&end_key, rocksdb::Direction::Reverse),
        );

        match iter.next() {
            Some(Ok((key, _))) if key.len() >= 24 && &key[..16] == doc_id.as_bytes() => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&key[16..24]);
                Ok(u64::from_be_bytes(buf))
            }
            Some(Err(e)) => Err(StoreError::DatabaseError(e.to_string())),
            _ => Ok(0),
        }
    }

    /// Atomic batch: current document record + its ledger row.
    fn write_document_and_version(
        &self,
        document: &Document,
        created_by: Uuid,
    ) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_versions = self.cf(CF_VERSIONS)?;

        let record = VersionRecord {
            document_id: document.id,
            version: document.version,
            content: document.content.clone(),
            created_by,
            created_at: now_millis(),
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_docs, document.id.as_bytes(), encode_compressed(document)?);
        batch.put_cf(
            &cf_versions,
            Self::version_key(document.id, document.version),
            encode_compressed(&record)?,
        );

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    // ─── Comments ─────────────────────────────────────────────────────

    /// Add a comment, optionally anchored (`position > 0`) or replying to a
    /// top-level comment.
    ///
    /// A reply-to-a-reply is re-parented to the thread root — threads stay
    /// one level deep.
    pub fn add_comment(
        &self,
        doc_id: Uuid,
        user_id: Uuid,
        content: impl Into<String>,
        position: usize,
        parent_id: Option<Uuid>,
    ) -> Result<Comment, StoreError> {
        if !self.document_exists(doc_id)? {
            return Err(StoreError::NotFound(doc_id));
        }

        let parent_id = match parent_id {
            Some(parent) => {
                let parent_comment = self.get_comment(doc_id, parent)?;
                Some(parent_comment.parent_id.unwrap_or(parent_comment.id))
            }
            None => None,
        };

        let comment = Comment::new(doc_id, user_id, content, position, parent_id);
        self.put_comment(&comment)?;
        Ok(comment)
    }

    pub fn get_comment(&self, doc_id: Uuid, comment_id: Uuid) -> Result<Comment, StoreError> {
        let cf = self.cf(CF_COMMENTS)?;
        let key = Self::comment_key(doc_id, comment_id);
        match self.db.get_cf(&cf, &key)? {
            Some(bytes) => {
                let (comment, _) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
                Ok(comment)
            }
            None => Err(StoreError::CommentNotFound(comment_id)),
        }
    }

    /// All comments on a document, ordered by creation time.
    pub fn list_comments(&self, doc_id: Uuid) -> Result<Vec<Comment>, StoreError> {
        let cf = self.cf(CF_COMMENTS)?;
        let mut comments: Vec<Comment> = Vec::new();

        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(doc_id.as_bytes(), rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            if key.len() < 32 || &key[..16] != doc_id.as_bytes() {
                break;
            }
            let (comment, _) =
                bincode::serde::decode_from_slice(&value, bincode::config::standard())
                    .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
            comments.push(comment);
        }

        comments.sort_by_key(|c: &Comment| (c.created_at, c.id));
        Ok(comments)
    }

    /// Change a comment's content and/or resolved flag.
    pub fn update_comment(
        &self,
        doc_id: Uuid,
        comment_id: Uuid,
        content: Option<String>,
        is_resolved: Option<bool>,
    ) -> Result<Comment, StoreError> {
        let mut comment = self.get_comment(doc_id, comment_id)?;
        if let Some(content) = content {
            comment.content = content;
        }
        if let Some(resolved) = is_resolved {
            comment.is_resolved = resolved;
        }
        comment.updated_at = now_millis();
        self.put_comment(&comment)?;
        Ok(comment)
    }

    /// Remove a comment by id. Returns whether it existed.
    pub fn delete_comment(&self, doc_id: Uuid, comment_id: Uuid) -> Result<bool, StoreError> {
        let cf = self.cf(CF_COMMENTS)?;
        let key = Self::comment_key(doc_id, comment_id);
        let existed = self.db.get_cf(&cf, &key)?.is_some();
        if existed {
            self.db.delete_cf(&cf, &key)?;
        }
        Ok(existed)
    }

    fn put_comment(&self, comment: &Comment) -> Result<(), StoreError> {
        let cf = self.cf(CF_COMMENTS)?;
        let key = Self::comment_key(comment.document_id, comment.id);
        let bytes = bincode::serde::encode_to_vec(comment, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        self.db.put_cf(&cf, &key, bytes)?;
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    /// Key: doc_id (16 bytes) + version (8 bytes big-endian).
    fn version_key(doc_id: Uuid, version: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(doc_id.as_bytes());
        key.extend_from_slice(&version.to_be_bytes());
        key
    }

    /// Key: doc_id (16 bytes) + comment_id (16 bytes).
    fn comment_key(doc_id: Uuid, comment_id: Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(doc_id.as_bytes());
        key.extend_from_slice(comment_id.as_bytes());
        key
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_db_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("scriptorium_test_{name}_{}", Uuid::new_v4()))
    }

    fn cleanup(path: &Path) {
        let _ = fs::remove_dir_all(path);
    }

    fn open_store(path: &Path) -> DocumentStore {
        DocumentStore::open(StoreConfig::for_testing(path)).unwrap()
    }

    #[test]
    fn test_create_and_get_document() {
        let path = temp_db_path("create_get");
        let store = open_store(&path);
        let creator = Uuid::new_v4();

        let doc = store.create_document("Design notes", creator).unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.content, "");
        assert_eq!(doc.creator_id, creator);

        let loaded = store.get_document(doc.id).unwrap();
        assert_eq!(loaded, doc);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_get_missing_document() {
        let path = temp_db_path("missing");
        let store = open_store(&path);
        assert!(matches!(
            store.get_document(Uuid::new_v4()),
            Err(StoreError::NotFound(_))
        ));
        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_save_increments_version_and_appends_ledger() {
        let path = temp_db_path("save");
        let store = open_store(&path);
        let user = Uuid::new_v4();

        let doc = store.create_document("t", user).unwrap();
        let doc = store.save(doc.id, "<p>one</p>", user).unwrap();
        assert_eq!(doc.version, 2);
        let doc = store.save(doc.id, "<p>two</p>", user).unwrap();
        assert_eq!(doc.version, 3);

        let versions = store.list_versions(doc.id).unwrap();
        assert_eq!(versions.len(), 3);
        assert_eq!(
            versions.iter().map(|v| v.version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(versions[2].content, "<p>two</p>");

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_save_is_last_write_wins() {
        let path = temp_db_path("lww");
        let store = open_store(&path);
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();

        let doc = store.create_document("t", user_a).unwrap();
        // Both callers observed version 1; neither save is rejected
        store.save(doc.id, "from A", user_a).unwrap();
        let doc = store.save(doc.id, "from B", user_b).unwrap();
        assert_eq!(doc.version, 3);
        assert_eq!(doc.content, "from B");

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_save_checked_rejects_stale_version() {
        let path = temp_db_path("checked");
        let store = open_store(&path);
        let user = Uuid::new_v4();

        let doc = store.create_document("t", user).unwrap();
        store.save(doc.id, "first", user).unwrap(); // version now 2

        let result = store.save_checked(doc.id, "stale", user, 1);
        assert!(matches!(
            result,
            Err(StoreError::VersionConflict { expected: 1, actual: 2 })
        ));

        // Prior state unchanged by the rejected save
        let current = store.get_document(doc.id).unwrap();
        assert_eq!(current.content, "first");
        assert_eq!(current.version, 2);

        let doc = store.save_checked(doc.id, "fresh", user, 2).unwrap();
        assert_eq!(doc.version, 3);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_version_monotonicity_across_save_and_rollback() {
        let path = temp_db_path("monotonic");
        let store = open_store(&path);
        let user = Uuid::new_v4();

        let doc = store.create_document("t", user).unwrap();
        let mut produced = vec![1u64];
        for i in 0..4 {
            let d = store.save(doc.id, &format!("v{i}"), user).unwrap();
            produced.push(d.version);
        }
        let d = store.rollback(doc.id, 2, user).unwrap();
        produced.push(d.version);
        let d = store.save(doc.id, "after rollback", user).unwrap();
        produced.push(d.version);

        for pair in produced.windows(2) {
            assert!(pair[1] > pair[0], "versions must strictly increase: {produced:?}");
        }

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_rollback_preserves_history() {
        let path = temp_db_path("rollback_history");
        let store = open_store(&path);
        let user = Uuid::new_v4();

        let doc = store.create_document("t", user).unwrap();
        for i in 2..=5u64 {
            store.save(doc.id, &format!("content v{i}"), user).unwrap();
        }

        // Document now at version 5; roll back to 3
        let rolled = store.rollback(doc.id, 3, user).unwrap();
        assert_eq!(rolled.version, 6);
        assert_eq!(rolled.content, "content v3");

        // Versions 3, 4, 5 remain retrievable
        for v in 3..=5u64 {
            let snapshot = store.version_snapshot(doc.id, v).unwrap();
            assert_eq!(snapshot.content, format!("content v{v}"));
        }
        let versions = store.list_versions(doc.id).unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5, 6]
        );

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_rollback_to_future_version() {
        let path = temp_db_path("rollback_future");
        let store = open_store(&path);
        let user = Uuid::new_v4();

        let doc = store.create_document("t", user).unwrap();
        for i in 2..=5u64 {
            store.save(doc.id, &format!("content v{i}"), user).unwrap();
        }
        // Back to 2 (current becomes 6), then "forward" to 5
        store.rollback(doc.id, 2, user).unwrap();
        let forward = store.rollback(doc.id, 5, user).unwrap();
        assert_eq!(forward.version, 7);
        assert_eq!(forward.content, "content v5");

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_rollback_rejects_current_and_missing_versions() {
        let path = temp_db_path("rollback_reject");
        let store = open_store(&path);
        let user = Uuid::new_v4();

        let doc = store.create_document("t", user).unwrap();
        let doc = store.save(doc.id, "x", user).unwrap();

        assert!(matches!(
            store.rollback(doc.id, doc.version, user),
            Err(StoreError::RollbackToCurrent(_))
        ));
        assert!(matches!(
            store.rollback(doc.id, 99, user),
            Err(StoreError::VersionNotFound(_, 99))
        ));

        // Failed rollbacks leave the document untouched
        let current = store.get_document(doc.id).unwrap();
        assert_eq!(current.version, doc.version);
        assert_eq!(current.content, "x");

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_list_documents_and_delete() {
        let path = temp_db_path("list_delete");
        let store = open_store(&path);
        let user = Uuid::new_v4();

        let a = store.create_document("a", user).unwrap();
        let b = store.create_document("b", user).unwrap();

        let listed = store.list_documents().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&a.id) && listed.contains(&b.id));

        store.save(a.id, "x", user).unwrap();
        store.add_comment(a.id, user, "note", 0, None).unwrap();
        store.delete_document(a.id).unwrap();

        assert!(!store.document_exists(a.id).unwrap());
        assert!(store.list_versions(a.id).unwrap().is_empty());
        assert!(store.list_comments(a.id).unwrap().is_empty());
        // The other document is untouched
        assert!(store.document_exists(b.id).unwrap());

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_store_reopen_keeps_state() {
        let path = temp_db_path("reopen");
        let user = Uuid::new_v4();
        let doc_id;
        {
            let store = open_store(&path);
            let doc = store.create_document("persist me", user).unwrap();
            store.save(doc.id, "<p>kept</p>", user).unwrap();
            doc_id = doc.id;
        }
        {
            let store = open_store(&path);
            let doc = store.get_document(doc_id).unwrap();
            assert_eq!(doc.content, "<p>kept</p>");
            assert_eq!(doc.version, 2);
            // Next save continues the sequence after reopen
            let doc = store.save(doc.id, "more", user).unwrap();
            assert_eq!(doc.version, 3);
        }
        cleanup(&path);
    }

    #[test]
    fn test_comment_crud() {
        let path = temp_db_path("comments");
        let store = open_store(&path);
        let user = Uuid::new_v4();
        let doc = store.create_document("t", user).unwrap();

        let anchored = store.add_comment(doc.id, user, "typo here", 14, None).unwrap();
        assert!(anchored.is_anchored());
        let general = store.add_comment(doc.id, user, "nice doc", 0, None).unwrap();
        assert!(!general.is_anchored());

        let listed = store.list_comments(doc.id).unwrap();
        assert_eq!(listed.len(), 2);

        let resolved = store
            .update_comment(doc.id, anchored.id, None, Some(true))
            .unwrap();
        assert!(resolved.is_resolved);
        assert_eq!(resolved.content, "typo here");

        let reworded = store
            .update_comment(doc.id, general.id, Some("great doc".into()), None)
            .unwrap();
        assert_eq!(reworded.content, "great doc");
        assert!(!reworded.is_resolved);

        assert!(store.delete_comment(doc.id, anchored.id).unwrap());
        assert!(!store.delete_comment(doc.id, anchored.id).unwrap());
        assert_eq!(store.list_comments(doc.id).unwrap().len(), 1);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_reply_to_reply_is_reparented_to_root() {
        let path = temp_db_path("reply_depth");
        let store = open_store(&path);
        let user = Uuid::new_v4();
        let doc = store.create_document("t", user).unwrap();

        let root = store.add_comment(doc.id, user, "root", 5, None).unwrap();
        let reply = store
            .add_comment(doc.id, user, "reply", 0, Some(root.id))
            .unwrap();
        assert_eq!(reply.parent_id, Some(root.id));

        let nested = store
            .add_comment(doc.id, user, "reply to reply", 0, Some(reply.id))
            .unwrap();
        assert_eq!(nested.parent_id, Some(root.id));

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_comment_on_missing_document_rejected() {
        let path = temp_db_path("comment_missing");
        let store = open_store(&path);
        let result = store.add_comment(Uuid::new_v4(), Uuid::new_v4(), "x", 0, None);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotFound(Uuid::nil());
        assert!(err.to_string().contains("not found"));

        let err = StoreError::VersionConflict { expected: 2, actual: 5 };
        assert!(err.to_string().contains("expected 2"));
    }
}
