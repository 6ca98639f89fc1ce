//! Per-client synchronization engine.
//!
//! Converts local edits into operations, applies remote operations to the
//! local buffer with defensive clamping, and suppresses the feedback loop
//! between the two. Every buffer mutation carries an explicit origin tag;
//! the tag is restored synchronously after a remote application, never on a
//! timer, so a genuine local edit arriving immediately afterwards is not
//! swallowed.

use crate::buffer::TextBuffer;
use crate::operation::{derive_operations, EditDelta, OpKind, Operation};
use crate::protocol::now_millis;

/// Where a buffer mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOrigin {
    /// The local user typed it — derive and emit operations.
    Local,
    /// It arrived over the relay — apply silently.
    Remote,
    /// Full-content refresh (initial load, save broadcast, rollback).
    Programmatic,
}

/// The per-client synchronization engine.
pub struct SyncEngine {
    buffer: TextBuffer,
    origin: ApplyOrigin,
    /// Last document version observed from the store.
    version: u64,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self {
            buffer: TextBuffer::new(),
            origin: ApplyOrigin::Local,
            version: 0,
        }
    }

    /// Initialize from persisted content at a known version.
    pub fn with_content(content: &str, version: u64) -> Self {
        Self {
            buffer: TextBuffer::from_text(content),
            origin: ApplyOrigin::Local,
            version,
        }
    }

    pub fn text(&self) -> String {
        self.buffer.text()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffer(&self) -> &TextBuffer {
        &self.buffer
    }

    pub fn origin(&self) -> ApplyOrigin {
        self.origin
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Apply a local edit and derive the operations to broadcast.
    ///
    /// Returns an empty list when the engine is currently applying a remote
    /// or programmatic change — those must not re-enter the send path.
    pub fn apply_local(&mut self, delta: &EditDelta) -> Vec<Operation> {
        if self.origin != ApplyOrigin::Local {
            log::debug!("suppressing edit derivation, origin {:?}", self.origin);
            return Vec::new();
        }
        let ops = derive_operations(delta, now_millis(), self.version);
        self.buffer.apply_delta(delta);
        ops
    }

    /// Apply an operation received from the relay.
    ///
    /// Positions and lengths are clamped into the current buffer bounds;
    /// operations that clamp to nothing are skipped. Never panics and never
    /// surfaces an error to the sender — a malformed operation is logged and
    /// dropped.
    pub fn apply_remote(&mut self, op: &Operation) {
        let previous = self.origin;
        self.origin = ApplyOrigin::Remote;
        self.apply_clamped(op);
        // Restore synchronously — a timer here would race genuine local edits
        self.origin = previous;
    }

    /// Replace the full buffer contents (DOCUMENT_UPDATED, rollback, load).
    pub fn set_contents(&mut self, content: &str, version: u64) {
        let previous = self.origin;
        self.origin = ApplyOrigin::Programmatic;
        self.buffer.set_text(content);
        self.version = version;
        self.origin = previous;
    }

    fn apply_clamped(&mut self, op: &Operation) {
        let len = self.buffer.len();
        let position = op.position.min(len);

        match op.kind {
            OpKind::Insert => {
                let text = op.data.as_deref().unwrap_or("");
                self.buffer.insert(position, text, &op.attributes);
            }
            OpKind::Delete => {
                let length = op.length.min(len - position);
                if length == 0 {
                    log::debug!(
                        "dropping delete clamped to zero (position {}, length {}, buffer {})",
                        op.position,
                        op.length,
                        len
                    );
                    return;
                }
                self.buffer.delete(position, length);
            }
            OpKind::Format => {
                let span = if op.length == 0 { 1 } else { op.length };
                let length = span.min(len - position);
                if length == 0 {
                    return;
                }
                match (&op.format_type, &op.format_value) {
                    (Some(key), Some(value)) => {
                        self.buffer.format(position, length, key, value);
                    }
                    _ if !op.attributes.is_empty() => {
                        self.buffer.format_all(position, length, &op.attributes);
                    }
                    _ => {
                        log::warn!("format operation without format key, ignoring");
                    }
                }
            }
        }
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}
