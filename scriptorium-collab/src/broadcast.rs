//! Room fan-out and roster state.
//!
//! Each document gets one [`BroadcastGroup`]: a tokio broadcast channel that
//! fans every accepted frame out to the room's subscribers, plus the roster
//! of online users keyed by `user_id`. The group never reorders or merges
//! messages — delivery order is the order frames were handed to it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, RoomMessage, UserProfile};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_users: usize,
}

/// Atomic counters so the send path never takes a lock.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// A broadcast group for a single document room.
///
/// The roster is the only state mutated by multiple concurrent senders;
/// every mutation happens under one write lock so near-simultaneous joins
/// cannot drop each other.
pub struct BroadcastGroup {
    /// Broadcast channel sender (cloned per-room)
    sender: broadcast::Sender<Arc<Vec<u8>>>,

    /// Online users in this room, keyed by user id
    roster: Arc<RwLock<HashMap<Uuid, UserProfile>>>,

    /// Channel capacity (messages buffered per receiver)
    capacity: usize,

    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// Create a new broadcast group with the given buffer capacity.
    ///
    /// `capacity` determines how many messages can be buffered per member
    /// before lagging members start dropping messages (backpressure).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            roster: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    /// Add a user to the roster and return its message receiver.
    ///
    /// A second join for the same `user_id` replaces the previous roster
    /// entry — reconnects replace, they never duplicate.
    pub async fn join(&self, profile: UserProfile) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut roster = self.roster.write().await;
        roster.insert(profile.user_id, profile);
        self.sender.subscribe()
    }

    /// Remove a user from the roster.
    ///
    /// Idempotent: removing an absent user returns `None` and is not an
    /// error.
    pub async fn leave(&self, user_id: &Uuid) -> Option<UserProfile> {
        let mut roster = self.roster.write().await;
        roster.remove(user_id)
    }

    /// Record a user's cursor position. Returns false for unknown users.
    pub async fn update_cursor(&self, user_id: &Uuid, position: usize) -> bool {
        let mut roster = self.roster.write().await;
        match roster.get_mut(user_id) {
            Some(profile) => {
                profile.cursor_position = Some(position);
                true
            }
            None => false,
        }
    }

    /// Broadcast a message to every subscriber.
    ///
    /// Receivers are responsible for filtering out the sender's own frames
    /// by `user_id`. Returns the number of receivers reached.
    pub fn broadcast(&self, msg: &RoomMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Broadcast pre-encoded bytes directly (zero-copy fast path).
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Current number of online users.
    pub async fn member_count(&self) -> usize {
        self.roster.read().await.len()
    }

    /// Authoritative roster snapshot.
    pub async fn roster(&self) -> Vec<UserProfile> {
        self.roster.read().await.values().cloned().collect()
    }

    /// Check if a user is in the roster.
    pub async fn has_member(&self, user_id: &Uuid) -> bool {
        self.roster.read().await.contains_key(user_id)
    }

    /// Get broadcast statistics (lock-free counters + roster size).
    pub async fn stats(&self) -> BroadcastStats {
        let roster = self.roster.read().await;
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_users: roster.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe without joining the roster (observer connections).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }
}

/// Room manager: maps document IDs to broadcast groups.
///
/// Each document gets its own group so messages are isolated between
/// documents.
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<Uuid, Arc<BroadcastGroup>>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            default_capacity,
        }
    }

    /// Get or create a room for the given document.
    pub async fn get_or_create(&self, doc_id: Uuid) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&doc_id) {
                return room.clone();
            }
        }

        // Slow path: write lock to create
        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(&doc_id) {
            return room.clone();
        }

        let room = Arc::new(BroadcastGroup::new(self.default_capacity));
        rooms.insert(doc_id, room.clone());
        room
    }

    /// Look up an existing room without creating one.
    pub async fn get(&self, doc_id: &Uuid) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(doc_id).cloned()
    }

    /// Remove a room once its roster is empty.
    pub async fn remove_if_empty(&self, doc_id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(doc_id) {
            if room.member_count().await == 0 {
                rooms.remove(doc_id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_documents(&self) -> Vec<Uuid> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
