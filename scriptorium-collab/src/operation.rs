//! Addressed edit operations and their derivation from local edit deltas.
//!
//! An [`Operation`] is a single edit against the document's linear text
//! buffer, addressed by a zero-based character offset in the *sender's* view
//! of the document at emission time. The relay never transforms positions;
//! receivers clamp them into their own bounds (see `engine`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind of a single edit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    Insert,
    Delete,
    Format,
}

/// A formatting attribute value.
///
/// One concrete variant per supported shape instead of a dynamic value,
/// so payloads decode by pattern match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FormatValue {
    Bool(bool),
    Number(i64),
    Text(String),
}

/// Attribute set attached to inserted or formatted text.
pub type FormatSet = BTreeMap<String, FormatValue>;

/// A single addressed edit.
///
/// `position` is a character offset into the sender's buffer; for `Delete`
/// and `Format`, `length` is the span covered. `Insert` carries the inserted
/// text in `data` plus optional `attributes`. `Format` carries exactly one
/// `format_type`/`format_value` pair (one operation per attribute key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    pub position: usize,
    pub length: usize,
    pub data: Option<String>,
    pub attributes: FormatSet,
    pub format_type: Option<String>,
    pub format_value: Option<FormatValue>,
    /// Sender wall-clock timestamp, milliseconds since epoch.
    pub timestamp: u64,
    /// Document version the sender observed when emitting.
    pub version: u64,
}

impl Operation {
    /// Create an insert operation.
    pub fn insert(position: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            kind: OpKind::Insert,
            position,
            length: text.chars().count(),
            data: Some(text),
            attributes: FormatSet::new(),
            format_type: None,
            format_value: None,
            timestamp: 0,
            version: 0,
        }
    }

    /// Create an insert operation carrying formatting attributes.
    pub fn insert_with(position: usize, text: impl Into<String>, attributes: FormatSet) -> Self {
        let mut op = Self::insert(position, text);
        op.attributes = attributes;
        op
    }

    /// Create a delete operation.
    pub fn delete(position: usize, length: usize) -> Self {
        Self {
            kind: OpKind::Delete,
            position,
            length,
            data: None,
            attributes: FormatSet::new(),
            format_type: None,
            format_value: None,
            timestamp: 0,
            version: 0,
        }
    }

    /// Create a format operation for a single attribute key.
    pub fn format(
        position: usize,
        length: usize,
        format_type: impl Into<String>,
        format_value: FormatValue,
    ) -> Self {
        let format_type = format_type.into();
        let mut attributes = FormatSet::new();
        attributes.insert(format_type.clone(), format_value.clone());
        Self {
            kind: OpKind::Format,
            position,
            length,
            data: None,
            attributes,
            format_type: Some(format_type),
            format_value: Some(format_value),
            timestamp: 0,
            version: 0,
        }
    }

    /// Stamp the sender's observed document version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Stamp the emission timestamp (epoch milliseconds).
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// One primitive of a local edit delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeltaOp {
    /// Skip over `len` characters; a non-empty attribute set formats the
    /// skipped span.
    Retain { len: usize, attributes: FormatSet },
    /// Insert text at the current position.
    Insert { text: String, attributes: FormatSet },
    /// Delete `len` characters at the current position.
    Delete { len: usize },
}

/// A local edit expressed as a sequence of retain/insert/delete primitives,
/// the shape rich-text editors report changes in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditDelta {
    ops: Vec<DeltaOp>,
}

impl EditDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retain(mut self, len: usize) -> Self {
        self.ops.push(DeltaOp::Retain {
            len,
            attributes: FormatSet::new(),
        });
        self
    }

    pub fn retain_with(mut self, len: usize, attributes: FormatSet) -> Self {
        self.ops.push(DeltaOp::Retain { len, attributes });
        self
    }

    pub fn insert(mut self, text: impl Into<String>) -> Self {
        self.ops.push(DeltaOp::Insert {
            text: text.into(),
            attributes: FormatSet::new(),
        });
        self
    }

    pub fn insert_with(mut self, text: impl Into<String>, attributes: FormatSet) -> Self {
        self.ops.push(DeltaOp::Insert {
            text: text.into(),
            attributes,
        });
        self
    }

    pub fn delete(mut self, len: usize) -> Self {
        self.ops.push(DeltaOp::Delete { len });
        self
    }

    pub fn ops(&self) -> &[DeltaOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Convert a local edit delta into zero or more wire operations.
///
/// A running cursor tracks the position across the delta: retains advance it
/// without emitting (unless they carry attributes, in which case one Format
/// operation is emitted per attribute key over the retained span); inserts
/// emit an Insert at the current position and advance by the inserted
/// length; deletes emit a Delete and do not advance, since the following
/// text shifts left.
pub fn derive_operations(delta: &EditDelta, timestamp: u64, version: u64) -> Vec<Operation> {
    let mut operations = Vec::new();
    let mut position = 0usize;

    for op in delta.ops() {
        match op {
            DeltaOp::Retain { len, attributes } => {
                for (key, value) in attributes {
                    operations.push(
                        Operation::format(position, *len, key.clone(), value.clone())
                            .with_timestamp(timestamp)
                            .with_version(version),
                    );
                }
                position += len;
            }
            DeltaOp::Insert { text, attributes } => {
                let inserted = text.chars().count();
                operations.push(
                    Operation::insert_with(position, text.clone(), attributes.clone())
                        .with_timestamp(timestamp)
                        .with_version(version),
                );
                position += inserted;
            }
            DeltaOp::Delete { len } => {
                operations.push(
                    Operation::delete(position, *len)
                        .with_timestamp(timestamp)
                        .with_version(version),
                );
            }
        }
    }

    operations
}
