//! Binary room-relay protocol.
//!
//! Every frame on the wire is a bincode-encoded [`RoomMessage`]: an envelope
//! carrying the document id, the sending user, a timestamp, and a typed
//! payload. One concrete payload variant exists per message type, resolved
//! by pattern match — there is no dynamic `data` field to shape-sniff.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::comment::Comment;
use crate::operation::Operation;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Discriminant of a room message, mirroring [`MessagePayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Operation,
    Cursor,
    Join,
    Leave,
    Roster,
    DocumentUpdated,
    Comment,
    CommentUpdated,
    CommentDeleted,
}

/// RGBA presence color, derived deterministically from a user id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl UserColor {
    /// Stable, visually distinct color from a user id.
    ///
    /// Hue comes from the id hash; saturation/lightness are fixed high so
    /// cursors stay vivid against document text.
    pub fn from_user_id(id: Uuid) -> Self {
        let hash = id.as_u128();
        let hue = ((hash % 360) as f32) / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b, a: 1.0 }
    }

    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// CSS hex string (`#rrggbb`) for rendering layers that want one.
    pub fn to_hex(&self) -> String {
        format!(
            "#{:02x}{:02x}{:02x}",
            (self.r.clamp(0.0, 1.0) * 255.0) as u8,
            (self.g.clamp(0.0, 1.0) * 255.0) as u8,
            (self.b.clamp(0.0, 1.0) * 255.0) as u8,
        )
    }
}

impl Default for UserColor {
    fn default() -> Self {
        Self { r: 0.26, g: 0.52, b: 0.96, a: 1.0 } // Default blue
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l); // Achromatic
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);

    (r, g, b)
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// A room participant as it appears in the roster.
///
/// Keyed by `user_id`, not connection — a reconnect replaces the entry
/// rather than duplicating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar: Option<String>,
    pub cursor_position: Option<usize>,
    pub color: UserColor,
}

impl UserProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    pub fn with_id(user_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            user_id,
            username: name.into(),
            nickname: None,
            avatar: None,
            cursor_position: None,
            color: UserColor::from_user_id(user_id),
        }
    }

    /// Name to render next to the user's cursor.
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.username)
    }
}

/// Typed payload of a room message, one variant per message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessagePayload {
    /// A single edit to relay to the other room members.
    Operation(Operation),
    /// Cursor moved to a character offset.
    Cursor { position: usize },
    /// Sender joins the room with its profile.
    Join(UserProfile),
    /// Sender leaves the room.
    Leave,
    /// Authoritative roster snapshot for the room.
    Roster(Vec<UserProfile>),
    /// Full-content refresh after a persisted save or rollback.
    DocumentUpdated { content: String, version: u64 },
    /// A comment was added.
    Comment(Comment),
    /// A comment's content or resolved flag changed.
    CommentUpdated(Comment),
    /// A comment was removed.
    CommentDeleted { comment_id: Uuid },
}

impl MessagePayload {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessagePayload::Operation(_) => MessageType::Operation,
            MessagePayload::Cursor { .. } => MessageType::Cursor,
            MessagePayload::Join(_) => MessageType::Join,
            MessagePayload::Leave => MessageType::Leave,
            MessagePayload::Roster(_) => MessageType::Roster,
            MessagePayload::DocumentUpdated { .. } => MessageType::DocumentUpdated,
            MessagePayload::Comment(_) => MessageType::Comment,
            MessagePayload::CommentUpdated(_) => MessageType::CommentUpdated,
            MessagePayload::CommentDeleted { .. } => MessageType::CommentDeleted,
        }
    }
}

/// Top-level transport envelope.
///
/// Serialized with bincode for minimal overhead; presence and cursor
/// messages are never persisted, they only transit the room relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMessage {
    pub document_id: Uuid,
    pub user_id: Uuid,
    /// Sender wall-clock, epoch milliseconds.
    pub timestamp: u64,
    pub payload: MessagePayload,
}

impl RoomMessage {
    pub fn new(document_id: Uuid, user_id: Uuid, payload: MessagePayload) -> Self {
        Self {
            document_id,
            user_id,
            timestamp: now_millis(),
            payload,
        }
    }

    pub fn operation(document_id: Uuid, user_id: Uuid, op: Operation) -> Self {
        Self::new(document_id, user_id, MessagePayload::Operation(op))
    }

    pub fn cursor(document_id: Uuid, user_id: Uuid, position: usize) -> Self {
        Self::new(document_id, user_id, MessagePayload::Cursor { position })
    }

    pub fn join(document_id: Uuid, profile: UserProfile) -> Self {
        let user_id = profile.user_id;
        Self::new(document_id, user_id, MessagePayload::Join(profile))
    }

    pub fn leave(document_id: Uuid, user_id: Uuid) -> Self {
        Self::new(document_id, user_id, MessagePayload::Leave)
    }

    pub fn roster(document_id: Uuid, members: Vec<UserProfile>) -> Self {
        // Roster snapshots originate from the relay, not a participant
        Self::new(document_id, Uuid::nil(), MessagePayload::Roster(members))
    }

    pub fn document_updated(
        document_id: Uuid,
        user_id: Uuid,
        content: String,
        version: u64,
    ) -> Self {
        Self::new(
            document_id,
            user_id,
            MessagePayload::DocumentUpdated { content, version },
        )
    }

    pub fn comment(document_id: Uuid, user_id: Uuid, comment: Comment) -> Self {
        Self::new(document_id, user_id, MessagePayload::Comment(comment))
    }

    pub fn comment_updated(document_id: Uuid, user_id: Uuid, comment: Comment) -> Self {
        Self::new(document_id, user_id, MessagePayload::CommentUpdated(comment))
    }

    pub fn comment_deleted(document_id: Uuid, user_id: Uuid, comment_id: Uuid) -> Self {
        Self::new(
            document_id,
            user_id,
            MessagePayload::CommentDeleted { comment_id },
        )
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}
