//! Comments anchored to document positions.
//!
//! A comment carries an optional integer anchor into the document buffer;
//! `position == 0` means a general, unanchored comment. Anchors are static —
//! the engine does not transform them when operations land elsewhere in the
//! document, so resolution must tolerate offsets that have drifted out of
//! range.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::now_millis;

/// A comment on a document, optionally anchored to a text position.
///
/// Replies reference a top-level comment via `parent_id`; threads are one
/// level deep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    /// Character offset into the document buffer; 0 = unanchored.
    pub position: usize,
    pub parent_id: Option<Uuid>,
    pub is_resolved: bool,
    /// Epoch milliseconds.
    pub created_at: u64,
    pub updated_at: u64,
}

impl Comment {
    pub fn new(
        document_id: Uuid,
        user_id: Uuid,
        content: impl Into<String>,
        position: usize,
        parent_id: Option<Uuid>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            document_id,
            user_id,
            content: content.into(),
            position,
            parent_id,
            is_resolved: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this comment points at a text position.
    pub fn is_anchored(&self) -> bool {
        self.position > 0
    }

    /// Whether this comment is a reply to another comment.
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// Resolve a stored anchor against the current document length.
///
/// Returns `None` for unanchored comments and for anchors that edits have
/// pushed past the end of the document — "no visible anchor", never an
/// error.
pub fn resolve_anchor(position: usize, document_len: usize) -> Option<usize> {
    if position == 0 || position > document_len {
        None
    } else {
        Some(position)
    }
}

/// A top-level comment with its direct replies, ordered by creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentThread {
    pub root: Comment,
    pub replies: Vec<Comment>,
}

/// Group a flat comment list into threads.
///
/// Replies whose parent is missing from the list are treated as roots
/// rather than dropped, so a stale client snapshot still renders everything.
pub fn build_threads(mut comments: Vec<Comment>) -> Vec<CommentThread> {
    comments.sort_by_key(|c| (c.created_at, c.id));

    let root_ids: Vec<Uuid> = comments
        .iter()
        .filter(|c| c.parent_id.is_none())
        .map(|c| c.id)
        .collect();

    let mut threads: Vec<CommentThread> = Vec::new();
    let mut orphans: Vec<Comment> = Vec::new();

    for comment in comments {
        match comment.parent_id {
            None => threads.push(CommentThread {
                root: comment,
                replies: Vec::new(),
            }),
            Some(parent) if root_ids.contains(&parent) => {
                if let Some(thread) = threads.iter_mut().find(|t| t.root.id == parent) {
                    thread.replies.push(comment);
                } else {
                    orphans.push(comment);
                }
            }
            Some(_) => orphans.push(comment),
        }
    }

    for orphan in orphans {
        threads.push(CommentThread {
            root: orphan,
            replies: Vec::new(),
        });
    }

    threads.sort_by_key(|t| (t.root.created_at, t.root.id));
    threads
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_comment(position: usize, parent_id: Option<Uuid>, created_at: u64) -> Comment {
        let mut c = Comment::new(Uuid::new_v4(), Uuid::new_v4(), "note", position, parent_id);
        c.created_at = created_at;
        c
    }

    #[test]
    fn test_position_zero_is_unanchored() {
        let c = doc_comment(0, None, 1);
        assert!(!c.is_anchored());
        assert_eq!(resolve_anchor(c.position, 100), None);
    }

    #[test]
    fn test_anchor_in_range_resolves() {
        assert_eq!(resolve_anchor(5, 10), Some(5));
        assert_eq!(resolve_anchor(10, 10), Some(10));
    }

    #[test]
    fn test_anchor_past_end_is_invisible_not_error() {
        assert_eq!(resolve_anchor(42, 10), None);
    }

    #[test]
    fn test_build_threads_groups_replies() {
        let root = doc_comment(3, None, 1);
        let reply_a = doc_comment(0, Some(root.id), 2);
        let reply_b = doc_comment(0, Some(root.id), 3);
        let other_root = doc_comment(0, None, 4);

        let threads = build_threads(vec![
            reply_b.clone(),
            other_root.clone(),
            root.clone(),
            reply_a.clone(),
        ]);

        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].root.id, root.id);
        assert_eq!(threads[0].replies.len(), 2);
        assert_eq!(threads[0].replies[0].id, reply_a.id);
        assert_eq!(threads[0].replies[1].id, reply_b.id);
        assert_eq!(threads[1].root.id, other_root.id);
        assert!(threads[1].replies.is_empty());
    }

    #[test]
    fn test_orphaned_reply_becomes_root() {
        let orphan = doc_comment(0, Some(Uuid::new_v4()), 5);
        let threads = build_threads(vec![orphan.clone()]);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].root.id, orphan.id);
    }

    #[test]
    fn test_threads_ordered_by_creation() {
        let late = doc_comment(0, None, 9);
        let early = doc_comment(0, None, 1);
        let threads = build_threads(vec![late.clone(), early.clone()]);
        assert_eq!(threads[0].root.id, early.id);
        assert_eq!(threads[1].root.id, late.id);
    }
}
