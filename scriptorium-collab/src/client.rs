//! WebSocket session client for one (user, document) pairing.
//!
//! Lifecycle: `Disconnected → Connecting → Joined → Active → Left`.
//! The client subscribes (spawns its reader) *before* announcing Join so it
//! cannot miss the roster refresh triggered by its own announcement, then
//! waits a bounded time for the relay's roster snapshot to confirm the join.
//! Leaving is explicit and idempotent; reconnection re-runs the whole join
//! sequence with fresh channels, discarding any stale subscription.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::comment::Comment;
use crate::operation::Operation;
use crate::protocol::{MessagePayload, ProtocolError, RoomMessage, UserProfile};

/// Poll interval while waiting for the join to be acknowledged.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Number of polls before the join attempt is reported as failed.
const JOIN_POLL_ATTEMPTS: u32 = 10;

/// Session lifecycle state for a (user, document) pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Join accepted — the relay confirmed us in the roster.
    Joined,
    /// Steady state: operations and cursors flow.
    Active,
    /// Explicitly left; terminal until the next connect.
    Left,
}

/// Why a join attempt failed.
#[derive(Debug, Clone)]
pub enum JoinError {
    /// The transport handshake failed.
    Connection(ProtocolError),
    /// The relay never acknowledged the join within the bounded wait.
    Timeout,
}

impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "Join failed: {e}"),
            Self::Timeout => write!(f, "Join not acknowledged in time"),
        }
    }
}

impl std::error::Error for JoinError {}

/// Events emitted by the session client.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Join acknowledged; carries the authoritative roster snapshot.
    Joined(Vec<UserProfile>),
    /// A remote user joined the document.
    UserJoined(UserProfile),
    /// A remote user left the document.
    UserLeft(Uuid),
    /// Authoritative roster refresh after a membership change.
    RosterRefreshed(Vec<UserProfile>),
    /// A remote edit to apply to the local buffer.
    RemoteOperation { user_id: Uuid, operation: Operation },
    /// A remote cursor moved.
    CursorMoved { user_id: Uuid, position: usize },
    /// Another actor persisted new content.
    DocumentUpdated { content: String, version: u64 },
    /// A comment was added remotely.
    CommentAdded(Comment),
    /// A comment changed remotely.
    CommentChanged(Comment),
    /// A comment was removed remotely.
    CommentRemoved { comment_id: Uuid },
    /// The transport dropped.
    Disconnected,
}

/// Queue for operations composed while disconnected.
///
/// Queued operations are replayed FIFO on the next successful join.
pub struct OfflineQueue {
    queue: VecDeque<Operation>,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue an operation for later replay. Returns false when full.
    pub fn enqueue(&mut self, op: Operation) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(op);
        true
    }

    /// Drain all queued operations for replay, oldest first.
    pub fn drain(&mut self) -> Vec<Operation> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// The session client.
///
/// Manages a WebSocket connection to the relay, the join protocol, and
/// offline queueing of operations.
pub struct SessionClient {
    profile: UserProfile,
    doc_id: Uuid,
    state: Arc<RwLock<SessionState>>,
    offline_queue: Arc<Mutex<OfflineQueue>>,
    /// Channel to the WebSocket writer task (None while disconnected).
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
    event_tx: mpsc::Sender<SessionEvent>,
    server_url: String,
}

impl SessionClient {
    pub fn new(profile: UserProfile, doc_id: Uuid, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            profile,
            doc_id,
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            offline_queue: Arc::new(Mutex::new(OfflineQueue::new(10_000))),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Run the full join sequence: handshake, subscribe, announce, wait for
    /// the roster acknowledgement, replay queued operations.
    ///
    /// Safe to call again after a disconnect or leave — previous channels
    /// are replaced, never double-registered.
    pub async fn connect(&mut self) -> Result<(), JoinError> {
        *self.state.write().await = SessionState::Connecting;

        let url = format!("{}/{}", self.server_url, self.doc_id);
        let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(ok) => ok,
            Err(_) => {
                *self.state.write().await = SessionState::Disconnected;
                return Err(JoinError::Connection(ProtocolError::ConnectionClosed));
            }
        };

        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the socket
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer
                    .send(tokio_tungstenite::tungstenite::Message::Binary(data.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        // Reader task, spawned before the Join goes out so the subscription
        // is live when the relay answers
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let user_id = self.profile.user_id;
        tokio::spawn(async move {
            let mut join_acked = false;
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        let room_msg = match RoomMessage::decode(&bytes) {
                            Ok(m) => m,
                            Err(e) => {
                                log::warn!("Dropping undecodable frame: {e}");
                                continue;
                            }
                        };

                        // Skip our own relayed frames
                        if room_msg.user_id == user_id {
                            continue;
                        }

                        let event = match room_msg.payload {
                            MessagePayload::Roster(members) => {
                                if join_acked {
                                    Some(SessionEvent::RosterRefreshed(members))
                                } else {
                                    join_acked = true;
                                    *state.write().await = SessionState::Joined;
                                    Some(SessionEvent::Joined(members))
                                }
                            }
                            MessagePayload::Operation(operation) => {
                                Some(SessionEvent::RemoteOperation {
                                    user_id: room_msg.user_id,
                                    operation,
                                })
                            }
                            MessagePayload::Cursor { position } => Some(SessionEvent::CursorMoved {
                                user_id: room_msg.user_id,
                                position,
                            }),
                            MessagePayload::Join(profile) => {
                                Some(SessionEvent::UserJoined(profile))
                            }
                            MessagePayload::Leave => Some(SessionEvent::UserLeft(room_msg.user_id)),
                            MessagePayload::DocumentUpdated { content, version } => {
                                Some(SessionEvent::DocumentUpdated { content, version })
                            }
                            MessagePayload::Comment(comment) => {
                                Some(SessionEvent::CommentAdded(comment))
                            }
                            MessagePayload::CommentUpdated(comment) => {
                                Some(SessionEvent::CommentChanged(comment))
                            }
                            MessagePayload::CommentDeleted { comment_id } => {
                                Some(SessionEvent::CommentRemoved { comment_id })
                            }
                        };

                        if let Some(evt) = event {
                            let _ = event_tx.send(evt).await;
                        }
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Transport lost; an explicit leave keeps its terminal state
            let mut s = state.write().await;
            if *s != SessionState::Left {
                *s = SessionState::Disconnected;
                let _ = event_tx.send(SessionEvent::Disconnected).await;
            }
        });

        // Announce the join
        let join_msg = RoomMessage::join(self.doc_id, self.profile.clone());
        if let Err(e) = self.send_encoded(&join_msg).await {
            *self.state.write().await = SessionState::Disconnected;
            self.outgoing_tx = None;
            return Err(e);
        }

        // Bounded wait for the roster acknowledgement — a join that hangs is
        // a reported failure, not a silent one
        let mut acked = false;
        for _ in 0..JOIN_POLL_ATTEMPTS {
            if *self.state.read().await == SessionState::Joined {
                acked = true;
                break;
            }
            tokio::time::sleep(JOIN_POLL_INTERVAL).await;
        }
        if !acked {
            *self.state.write().await = SessionState::Disconnected;
            self.outgoing_tx = None;
            return Err(JoinError::Timeout);
        }

        // Replay operations queued while offline
        let queued = self.offline_queue.lock().await.drain();
        if !queued.is_empty() {
            log::info!("Replaying {} queued operations", queued.len());
            for op in queued {
                let msg = RoomMessage::operation(self.doc_id, self.profile.user_id, op);
                self.send_encoded(&msg).await?;
            }
        }

        *self.state.write().await = SessionState::Active;
        Ok(())
    }

    /// Leave the room.
    ///
    /// Idempotent: calling it twice, or without ever joining, does nothing.
    pub async fn leave(&mut self) {
        let current = *self.state.read().await;
        if !matches!(current, SessionState::Joined | SessionState::Active) {
            return;
        }

        let msg = RoomMessage::leave(self.doc_id, self.profile.user_id);
        if let (Ok(encoded), Some(tx)) = (msg.encode(), self.outgoing_tx.as_ref()) {
            let _ = tx.send(encoded).await;
        }

        *self.state.write().await = SessionState::Left;
        self.outgoing_tx = None;
    }

    /// Send an edit operation, queueing it when not in the active state.
    pub async fn send_operation(&self, op: Operation) -> Result<(), ProtocolError> {
        if *self.state.read().await != SessionState::Active {
            let mut queue = self.offline_queue.lock().await;
            if !queue.enqueue(op) {
                return Err(ProtocolError::ConnectionClosed);
            }
            return Ok(());
        }

        let msg = RoomMessage::operation(self.doc_id, self.profile.user_id, op);
        self.send_encoded(&msg).await.map_err(|e| match e {
            JoinError::Connection(p) => p,
            JoinError::Timeout => ProtocolError::Timeout,
        })
    }

    /// Send a cursor position. Silently dropped when not active — presence
    /// is transient and never queued.
    pub async fn send_cursor(&self, position: usize) -> Result<(), ProtocolError> {
        if *self.state.read().await != SessionState::Active {
            return Ok(());
        }
        let msg = RoomMessage::cursor(self.doc_id, self.profile.user_id, position);
        self.send_encoded(&msg).await.map_err(|e| match e {
            JoinError::Connection(p) => p,
            JoinError::Timeout => ProtocolError::Timeout,
        })
    }

    /// Relay an arbitrary room message (comment events and the like).
    pub async fn send_message(&self, msg: &RoomMessage) -> Result<(), ProtocolError> {
        if *self.state.read().await != SessionState::Active {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.send_encoded(msg).await.map_err(|e| match e {
            JoinError::Connection(p) => p,
            JoinError::Timeout => ProtocolError::Timeout,
        })
    }

    async fn send_encoded(&self, msg: &RoomMessage) -> Result<(), JoinError> {
        let encoded = msg
            .encode()
            .map_err(JoinError::Connection)?;
        match self.outgoing_tx.as_ref() {
            Some(tx) => tx
                .send(encoded)
                .await
                .map_err(|_| JoinError::Connection(ProtocolError::ConnectionClosed)),
            None => Err(JoinError::Connection(ProtocolError::ConnectionClosed)),
        }
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn doc_id(&self) -> Uuid {
        self.doc_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub async fn offline_queue_len(&self) -> usize {
        self.offline_queue.lock().await.len()
    }
}
