//! # scriptorium-collab — Real-time document collaboration engine
//!
//! Synchronization core for multi-user rich-text editing: the operation
//! model, per-document broadcast rooms, the presence/roster protocol, and
//! the version/snapshot/rollback store.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     WebSocket      ┌───────────────┐
//! │ SessionClient │ ◄────────────────► │  RelayServer  │
//! │  (per user)   │    Binary Proto    │   (central)   │
//! └──────┬────────┘                    └──────┬────────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌───────────────┐                   ┌───────────────┐
//! │  SyncEngine   │                   │ BroadcastGroup│
//! │ (local buffer)│                   │ (room fan-out)│
//! └───────────────┘                   └──────┬────────┘
//!                                            │
//!                                     ┌──────┴────────┐
//!                                     │ DocumentStore │
//!                                     │   (RocksDB)   │
//!                                     └───────────────┘
//! ```
//!
//! The relay is deliberately dumb: operations fan out verbatim in arrival
//! order, receivers clamp positions into their own bounds, and convergence
//! of concurrent edits is best-effort rather than proven. Persisted saves
//! bypass the relay and append to a strictly increasing version ledger that
//! rollback never rewrites.
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded RoomMessage)
//! - [`operation`] — Edit operations and delta derivation
//! - [`buffer`] — Char-indexed rich-text buffer
//! - [`engine`] — Client-side apply/clamp/echo-suppression engine
//! - [`broadcast`] — Room fan-out and roster state
//! - [`presence`] — Client-side roster and cursor tracking
//! - [`server`] — WebSocket relay server
//! - [`client`] — WebSocket session client with offline queue
//! - [`store`] — RocksDB document/version/comment persistence
//! - [`comment`] — Comment model and anchor resolution

pub mod broadcast;
pub mod buffer;
pub mod client;
pub mod comment;
pub mod engine;
pub mod operation;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod store;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use buffer::TextBuffer;
pub use client::{JoinError, OfflineQueue, SessionClient, SessionEvent, SessionState};
pub use comment::{build_threads, resolve_anchor, Comment, CommentThread};
pub use engine::{ApplyOrigin, SyncEngine};
pub use operation::{
    derive_operations, DeltaOp, EditDelta, FormatSet, FormatValue, OpKind, Operation,
};
pub use presence::{PresenceRoster, RemotePeer};
pub use protocol::{
    MessagePayload, MessageType, ProtocolError, RoomMessage, UserColor, UserProfile,
};
pub use server::{RelayServer, ServerConfig, ServerStats};
pub use store::{Document, DocumentStore, StoreConfig, StoreError, VersionRecord};
