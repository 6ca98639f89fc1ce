//! WebSocket relay server with room-based document routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (doc_id) ── BroadcastGroup ── roster
//! Client B ──┘                        │
//!                                     ├── DocumentStore (RocksDB)
//!                                     │       ├── documents
//!                                     │       ├── versions (append-only)
//!                                     │       └── comments
//!                          ┌──────────┼───────────┐
//!                          ▼          ▼           ▼
//!                       Client A   Client B    Client C
//! ```
//!
//! The server is a dumb relay: operations are fanned out verbatim, in
//! arrival order, to every room member except the sender. It never
//! transforms, reorders, or merges concurrent operations — convergence is
//! best-effort by design. Saves and rollbacks bypass the relay entirely and
//! go through the [`DocumentStore`], after which the room is notified with a
//! full-content `DocumentUpdated` broadcast.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, RoomManager};
use crate::protocol::{MessagePayload, RoomMessage, UserProfile};
use crate::store::{Document, DocumentStore, StoreConfig, StoreError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum users per room
    pub max_users_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Persistence storage path (None = relay only, no document store)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_users_per_room: 100,
            broadcast_capacity: 256,
            storage_path: None,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub documents_saved: u64,
    pub rollbacks_applied: u64,
}

/// The room relay server.
pub struct RelayServer {
    config: ServerConfig,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
    store: Option<Arc<DocumentStore>>,
}

impl RelayServer {
    /// Create a new relay server, opening the document store when a storage
    /// path is configured.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store = match config.storage_path.as_ref() {
            Some(path) => {
                let store_config = StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                };
                Some(Arc::new(DocumentStore::open(store_config)?))
            }
            None => None,
        };

        Ok(Self {
            rooms: Arc::new(RoomManager::new(config.broadcast_capacity)),
            stats: Arc::new(RwLock::new(ServerStats::default())),
            store,
            config,
        })
    }

    /// Create with default configuration (relay only, no persistence).
    pub fn with_defaults() -> Self {
        Self {
            rooms: Arc::new(RoomManager::new(ServerConfig::default().broadcast_capacity)),
            stats: Arc::new(RwLock::new(ServerStats::default())),
            store: None,
            config: ServerConfig::default(),
        }
    }

    /// Create with persistence enabled at the given path.
    pub fn with_storage(
        bind_addr: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let config = ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..ServerConfig::default()
        };
        Self::new(config)
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RoomManager>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Per-connection room membership
        let mut user_id: Option<Uuid> = None;
        let mut doc_id: Option<Uuid> = None;
        let mut room: Option<Arc<BroadcastGroup>> = None;
        let mut broadcast_rx: Option<tokio::sync::broadcast::Receiver<Arc<Vec<u8>>>> = None;

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let room_msg = match RoomMessage::decode(&bytes) {
                                Ok(m) => m,
                                Err(e) => {
                                    // Protocol errors are logged and dropped,
                                    // never fatal to the session
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                    continue;
                                }
                            };

                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match &room_msg.payload {
                                MessagePayload::Join(profile) => {
                                    // A connection switching documents leaves
                                    // its old room first
                                    if let (Some(r), Some(did), Some(uid)) =
                                        (room.as_ref(), doc_id, user_id)
                                    {
                                        if did != room_msg.document_id {
                                            Self::depart(r, &rooms, did, uid).await;
                                            room = None;
                                            broadcast_rx = None;
                                        }
                                    }

                                    let target = rooms.get_or_create(room_msg.document_id).await;

                                    let rejoining = target.has_member(&room_msg.user_id).await;
                                    if !rejoining
                                        && target.member_count().await >= config.max_users_per_room
                                    {
                                        log::warn!(
                                            "Room {} full, rejecting join from {}",
                                            room_msg.document_id,
                                            room_msg.user_id
                                        );
                                        continue;
                                    }

                                    // A rejoin replaces the roster entry and
                                    // discards the previous subscription
                                    let rx = target.join(profile.clone()).await;
                                    broadcast_rx = Some(rx);
                                    user_id = Some(room_msg.user_id);
                                    doc_id = Some(room_msg.document_id);

                                    // Authoritative roster straight to the
                                    // joiner, then relay the join and a
                                    // refreshed roster to the whole room
                                    let snapshot = RoomMessage::roster(
                                        room_msg.document_id,
                                        target.roster().await,
                                    );
                                    let encoded = snapshot.encode()?;
                                    ws_sender.send(Message::Binary(encoded.into())).await?;

                                    let _ = target.broadcast(&room_msg);
                                    let refreshed = RoomMessage::roster(
                                        room_msg.document_id,
                                        target.roster().await,
                                    );
                                    let _ = target.broadcast(&refreshed);

                                    log::info!(
                                        "User {} ({}) joined doc {}",
                                        profile.username,
                                        profile.user_id,
                                        room_msg.document_id
                                    );

                                    room = Some(target);
                                    let mut s = stats.write().await;
                                    s.active_rooms = rooms.room_count().await;
                                }

                                MessagePayload::Leave => {
                                    if let (Some(r), Some(did), Some(uid)) =
                                        (room.take(), doc_id.take(), user_id.take())
                                    {
                                        Self::depart(&r, &rooms, did, uid).await;
                                        broadcast_rx = None;
                                        let mut s = stats.write().await;
                                        s.active_rooms = rooms.room_count().await;
                                    }
                                    // Leaving twice, or without joining, is
                                    // not an error
                                }

                                MessagePayload::Cursor { position } => {
                                    if let Some(r) = &room {
                                        r.update_cursor(&room_msg.user_id, *position).await;
                                        let _ = r.broadcast_raw(Arc::new(bytes));
                                    }
                                }

                                // Operations, comment events, and full-content
                                // updates are relayed verbatim: no transform,
                                // no reorder
                                _ => {
                                    if let Some(r) = &room {
                                        let _ = r.broadcast_raw(Arc::new(bytes));
                                    } else {
                                        log::debug!(
                                            "Dropping {:?} from {addr} before join",
                                            room_msg.message_type()
                                        );
                                    }
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing broadcast message
                msg = async {
                    if let Some(ref mut rx) = broadcast_rx {
                        rx.recv().await
                    } else {
                        // Not in a room yet — wait forever
                        std::future::pending().await
                    }
                } => {
                    match msg {
                        Ok(data) => {
                            // Self-filter: the sender never receives its own
                            // broadcast
                            if let Ok(room_msg) = RoomMessage::decode(&data) {
                                if Some(room_msg.user_id) == user_id {
                                    continue;
                                }
                            }
                            ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("User {user_id:?} lagged by {n} messages");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        // Cleanup: transport close acts as an implicit leave
        if let (Some(r), Some(did), Some(uid)) = (room, doc_id, user_id) {
            Self::depart(&r, &rooms, did, uid).await;
        }

        let mut s = stats.write().await;
        s.active_connections -= 1;
        s.active_rooms = rooms.room_count().await;

        Ok(())
    }

    /// Remove a user from a room, reconcile the roster, and drop the room if
    /// it emptied. Idempotent: departing a room the user is not in only
    /// runs the empty-room check.
    async fn depart(room: &BroadcastGroup, rooms: &RoomManager, doc_id: Uuid, user_id: Uuid) {
        if room.leave(&user_id).await.is_some() {
            let _ = room.broadcast(&RoomMessage::leave(doc_id, user_id));
            let refreshed = RoomMessage::roster(doc_id, room.roster().await);
            let _ = room.broadcast(&refreshed);
            log::info!("User {user_id} left doc {doc_id}");
        }
        if rooms.remove_if_empty(&doc_id).await {
            log::info!("Room {doc_id} removed (empty)");
        }
    }

    /// Persist document content and notify the room.
    ///
    /// Bypasses the operation channel: the store applies the save
    /// (last-write-wins) and the room receives a `DocumentUpdated`
    /// broadcast with the new content and version.
    pub async fn save_document(
        &self,
        doc_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> Result<Document, StoreError> {
        let store = self.store.as_ref().ok_or(StoreError::Disabled)?;
        let document = store.save(doc_id, content, user_id)?;
        self.notify_document_updated(&document, user_id).await;
        self.stats.write().await.documents_saved += 1;
        Ok(document)
    }

    /// Roll a document back to a prior snapshot and notify the room.
    ///
    /// Creator-only authorization is checked by the external permission
    /// collaborator before this is invoked.
    pub async fn rollback_document(
        &self,
        doc_id: Uuid,
        target_version: u64,
        user_id: Uuid,
    ) -> Result<Document, StoreError> {
        let store = self.store.as_ref().ok_or(StoreError::Disabled)?;
        let document = store.rollback(doc_id, target_version, user_id)?;
        self.notify_document_updated(&document, user_id).await;
        self.stats.write().await.rollbacks_applied += 1;
        Ok(document)
    }

    async fn notify_document_updated(&self, document: &Document, user_id: Uuid) {
        if let Some(room) = self.rooms.get(&document.id).await {
            let msg = RoomMessage::document_updated(
                document.id,
                user_id,
                document.content.clone(),
                document.version,
            );
            if let Err(e) = room.broadcast(&msg) {
                log::error!("Failed to broadcast document update for {}: {e}", document.id);
            }
        }
    }

    /// Authoritative roster for a document's room.
    ///
    /// Clients re-fetch this after join/leave races instead of trusting
    /// incremental payloads. An empty list means no live room.
    pub async fn online_users(&self, doc_id: Uuid) -> Vec<UserProfile> {
        match self.rooms.get(&doc_id).await {
            Some(room) => room.roster().await,
            None => Vec::new(),
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    /// Get the persistent store (if configured).
    pub fn store(&self) -> Option<&Arc<DocumentStore>> {
        self.store.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.max_users_per_room, 100);
        assert_eq!(config.broadcast_capacity, 256);
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_server_creation() {
        let server = RelayServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
        assert!(server.store().is_none());
    }

    #[test]
    fn test_server_custom_config() {
        let config = ServerConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_users_per_room: 50,
            broadcast_capacity: 512,
            storage_path: None,
        };
        let server = RelayServer::new(config).unwrap();
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_server_with_storage() {
        let dir = tempfile::tempdir().unwrap();
        let server = RelayServer::with_storage("127.0.0.1:0", dir.path().join("db")).unwrap();
        assert!(server.store().is_some());
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = RelayServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(stats.documents_saved, 0);
        assert_eq!(stats.rollbacks_applied, 0);
    }

    #[tokio::test]
    async fn test_online_users_empty_without_room() {
        let server = RelayServer::with_defaults();
        assert!(server.online_users(Uuid::new_v4()).await.is_empty());

        let doc_id = Uuid::new_v4();
        let room = server.rooms().get_or_create(doc_id).await;
        let alice = UserProfile::new("Alice");
        let _rx = room.join(alice.clone()).await;

        let online = server.online_users(doc_id).await;
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].user_id, alice.user_id);
    }

    #[tokio::test]
    async fn test_save_without_store_is_disabled() {
        let server = RelayServer::with_defaults();
        let result = server
            .save_document(Uuid::new_v4(), Uuid::new_v4(), "content")
            .await;
        assert!(matches!(result, Err(StoreError::Disabled)));
    }

    #[tokio::test]
    async fn test_save_broadcasts_document_updated() {
        let dir = tempfile::tempdir().unwrap();
        let server = RelayServer::with_storage("127.0.0.1:0", dir.path().join("db")).unwrap();

        let creator = Uuid::new_v4();
        let doc = server
            .store()
            .unwrap()
            .create_document("notes", creator)
            .unwrap();

        // Simulate a connected room member
        let room = server.rooms().get_or_create(doc.id).await;
        let viewer = UserProfile::new("Viewer");
        let mut rx = room.join(viewer).await;

        let saved = server
            .save_document(doc.id, creator, "<p>hello</p>")
            .await
            .unwrap();
        assert_eq!(saved.version, 2);

        let frame = rx.recv().await.unwrap();
        let msg = RoomMessage::decode(&frame).unwrap();
        match msg.payload {
            MessagePayload::DocumentUpdated { content, version } => {
                assert_eq!(content, "<p>hello</p>");
                assert_eq!(version, 2);
            }
            other => panic!("expected DocumentUpdated, got {other:?}"),
        }

        assert_eq!(server.stats().await.documents_saved, 1);
    }

    #[tokio::test]
    async fn test_rollback_broadcasts_document_updated() {
        let dir = tempfile::tempdir().unwrap();
        let server = RelayServer::with_storage("127.0.0.1:0", dir.path().join("db")).unwrap();

        let creator = Uuid::new_v4();
        let store = server.store().unwrap().clone();
        let doc = store.create_document("notes", creator).unwrap();
        store.save(doc.id, "v2 content", creator).unwrap();
        store.save(doc.id, "v3 content", creator).unwrap();

        let rolled = server.rollback_document(doc.id, 2, creator).await.unwrap();
        assert_eq!(rolled.version, 4);
        assert_eq!(rolled.content, "v2 content");
        assert_eq!(server.stats().await.rollbacks_applied, 1);
    }
}
