//! Client-side presence tracking.
//!
//! Tracks the remote roster for one document room: who is online and where
//! their cursors are. Join payloads are not trusted incrementally — the
//! relay follows every membership change with an authoritative roster
//! snapshot, and [`PresenceRoster::apply_roster`] replaces local state
//! wholesale, which keeps the view consistent across races and reconnects.
//!
//! Outgoing cursor updates are rate-limited so a fast typist doesn't flood
//! the room; joins/leaves always go out immediately.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::protocol::{MessagePayload, RoomMessage, UserProfile};

/// Minimum interval between outgoing cursor broadcasts (~30/s).
const CURSOR_BROADCAST_INTERVAL: Duration = Duration::from_millis(33);

/// A remote participant tracked locally.
#[derive(Debug, Clone)]
pub struct RemotePeer {
    pub profile: UserProfile,
    /// Last time any message arrived from this peer.
    last_seen: Instant,
    pub active: bool,
}

impl RemotePeer {
    fn new(profile: UserProfile) -> Self {
        Self {
            profile,
            last_seen: Instant::now(),
            active: true,
        }
    }

    pub fn cursor_position(&self) -> Option<usize> {
        self.profile.cursor_position
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

/// Presence state for all remote users in one document room.
pub struct PresenceRoster {
    local_user_id: Uuid,
    peers: HashMap<Uuid, RemotePeer>,
    last_cursor_broadcast: Instant,
    cursor_broadcast_interval: Duration,
    local_cursor: Option<usize>,
    idle_timeout: Duration,
}

impl PresenceRoster {
    pub fn new(local_user_id: Uuid) -> Self {
        Self {
            local_user_id,
            peers: HashMap::new(),
            // allow an immediate first broadcast
            last_cursor_broadcast: Instant::now() - Duration::from_secs(1),
            cursor_broadcast_interval: CURSOR_BROADCAST_INTERVAL,
            local_cursor: None,
            idle_timeout: Duration::from_secs(30),
        }
    }

    /// Create with a custom broadcast interval (for testing).
    pub fn with_interval(local_user_id: Uuid, interval: Duration) -> Self {
        let mut roster = Self::new(local_user_id);
        roster.cursor_broadcast_interval = interval;
        roster
    }

    /// Feed an incoming room message through the tracker.
    ///
    /// Only membership and cursor payloads mutate state; everything else is
    /// ignored here. The local user's own frames are ignored entirely.
    pub fn handle_message(&mut self, msg: &RoomMessage) {
        if msg.user_id == self.local_user_id {
            return;
        }

        match &msg.payload {
            MessagePayload::Join(profile) => {
                self.peers
                    .insert(profile.user_id, RemotePeer::new(profile.clone()));
            }
            MessagePayload::Leave => {
                self.peers.remove(&msg.user_id);
            }
            MessagePayload::Cursor { position } => {
                match self.peers.get_mut(&msg.user_id) {
                    Some(peer) => {
                        peer.profile.cursor_position = Some(*position);
                        peer.touch();
                    }
                    // Cursor from an unknown peer: they joined before we
                    // subscribed — track a placeholder until the next
                    // roster snapshot names them
                    None => {
                        let mut profile = UserProfile::with_id(
                            msg.user_id,
                            format!("user-{}", &msg.user_id.to_string()[..8]),
                        );
                        profile.cursor_position = Some(*position);
                        self.peers.insert(msg.user_id, RemotePeer::new(profile));
                    }
                }
            }
            MessagePayload::Roster(members) => {
                self.apply_roster(members.clone());
            }
            _ => {}
        }
    }

    /// Replace the remote roster with an authoritative snapshot.
    pub fn apply_roster(&mut self, members: Vec<UserProfile>) {
        let mut next = HashMap::with_capacity(members.len());
        for profile in members {
            if profile.user_id == self.local_user_id {
                continue;
            }
            // Keep the last-seen clock for peers we already track
            let peer = match self.peers.remove(&profile.user_id) {
                Some(mut existing) => {
                    existing.profile = profile;
                    existing
                }
                None => RemotePeer::new(profile),
            };
            next.insert(peer.profile.user_id, peer);
        }
        self.peers = next;
    }

    /// Record the local cursor and decide whether to broadcast it now.
    ///
    /// Returns the position to send, or `None` when throttled.
    pub fn update_local_cursor(&mut self, position: usize) -> Option<usize> {
        self.local_cursor = Some(position);

        if self.last_cursor_broadcast.elapsed() < self.cursor_broadcast_interval {
            return None; // Throttled
        }

        self.last_cursor_broadcast = Instant::now();
        Some(position)
    }

    /// Force a cursor broadcast regardless of rate limiting.
    pub fn force_cursor_broadcast(&mut self) -> Option<usize> {
        self.last_cursor_broadcast = Instant::now();
        self.local_cursor
    }

    /// Drop peers that have been silent past the idle timeout.
    pub fn cleanup_idle_peers(&mut self) -> Vec<Uuid> {
        let timeout = self.idle_timeout;
        let stale: Vec<Uuid> = self
            .peers
            .iter()
            .filter(|(_, p)| p.is_idle(timeout))
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            self.peers.remove(id);
        }

        stale
    }

    pub fn peers(&self) -> &HashMap<Uuid, RemotePeer> {
        &self.peers
    }

    pub fn peer(&self, user_id: &Uuid) -> Option<&RemotePeer> {
        self.peers.get(user_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn local_user_id(&self) -> Uuid {
        self.local_user_id
    }

    pub fn local_cursor(&self) -> Option<usize> {
        self.local_cursor
    }

    /// Remote cursors to render: (profile, clamped position).
    ///
    /// Positions past `document_len` are clamped rather than dropped so a
    /// cursor at a stale offset still renders at the end of the document.
    pub fn visible_cursors(&self, document_len: usize) -> Vec<(&UserProfile, usize)> {
        self.peers
            .values()
            .filter(|p| p.active)
            .filter_map(|p| {
                p.profile
                    .cursor_position
                    .map(|pos| (&p.profile, pos.min(document_len)))
            })
            .collect()
    }
}
