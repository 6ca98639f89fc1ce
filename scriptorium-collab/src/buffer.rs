//! Char-indexed rich-text buffer.
//!
//! The document's linear buffer: every position in an [`Operation`] or a
//! cursor update indexes into this. Formatting is tracked as a per-character
//! attribute set so that insert/delete splices and format spans stay aligned
//! with the text under concurrent edits.

use crate::operation::{DeltaOp, EditDelta, FormatSet, FormatValue};

/// A linear text buffer with per-character formatting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextBuffer {
    chars: Vec<char>,
    formats: Vec<FormatSet>,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a buffer from plain text with no formatting.
    pub fn from_text(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let formats = vec![FormatSet::new(); chars.len()];
        Self { chars, formats }
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// The buffer contents as plain text.
    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    /// Formatting attributes at a position, if in range.
    pub fn formats_at(&self, position: usize) -> Option<&FormatSet> {
        self.formats.get(position)
    }

    /// Splice `text` in at `position` with the given attributes.
    ///
    /// `position` must be `<= len()`; out-of-range positions are clamped to
    /// the end.
    pub fn insert(&mut self, position: usize, text: &str, attributes: &FormatSet) {
        let position = position.min(self.chars.len());
        let incoming: Vec<char> = text.chars().collect();
        let marks = vec![attributes.clone(); incoming.len()];
        self.chars.splice(position..position, incoming);
        self.formats.splice(position..position, marks);
    }

    /// Remove `length` characters starting at `position`.
    ///
    /// The range is clamped to the buffer bounds; a clamped-to-zero range is
    /// a no-op.
    pub fn delete(&mut self, position: usize, length: usize) {
        let position = position.min(self.chars.len());
        let end = position.saturating_add(length).min(self.chars.len());
        if end > position {
            self.chars.drain(position..end);
            self.formats.drain(position..end);
        }
    }

    /// Apply one attribute over `[position, position + length)`, clamped to
    /// the buffer bounds.
    pub fn format(&mut self, position: usize, length: usize, key: &str, value: &FormatValue) {
        let position = position.min(self.chars.len());
        let end = position.saturating_add(length).min(self.chars.len());
        for set in &mut self.formats[position..end] {
            set.insert(key.to_string(), value.clone());
        }
    }

    /// Apply a whole attribute set over a span (used for formatted inserts
    /// arriving as retain runs).
    pub fn format_all(&mut self, position: usize, length: usize, attributes: &FormatSet) {
        for (key, value) in attributes {
            self.format(position, length, key, value);
        }
    }

    /// Replace the entire contents with plain text (full-document refresh).
    pub fn set_text(&mut self, text: &str) {
        *self = Self::from_text(text);
    }

    /// Apply a local edit delta directly.
    ///
    /// This is the reference semantics that `derive_operations` must
    /// round-trip against: applying the derived operations one by one yields
    /// the same buffer as applying the delta here.
    pub fn apply_delta(&mut self, delta: &EditDelta) {
        let mut position = 0usize;
        for op in delta.ops() {
            match op {
                DeltaOp::Retain { len, attributes } => {
                    if !attributes.is_empty() {
                        self.format_all(position, *len, attributes);
                    }
                    position += len;
                }
                DeltaOp::Insert { text, attributes } => {
                    self.insert(position, text, attributes);
                    position += text.chars().count();
                }
                DeltaOp::Delete { len } => {
                    self.delete(position, *len);
                }
            }
        }
    }
}
