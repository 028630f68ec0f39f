// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Deltas: the concrete effect of a change on a tree.
//!
//! A changeset describes intent relative to its input context; a delta is
//! what a tree or an anchor set actually has to do. Each touched field gets
//! a list of marks that walks the field's nodes from left to right.

use std::collections::BTreeMap;

use super::tree::FieldKey;
use super::tree::Value;

/// Identifies the two ends of a move within one delta.
pub type MoveId = u32;

/// Per-field mark lists for one node (or the root).
pub type Root = BTreeMap<FieldKey, MarkList>;

pub type MarkList = Vec<Mark>;

/// The delta that does nothing.
pub fn empty() -> Root {
    return Root::new();
}

#[derive(Clone, Debug, PartialEq)]
pub enum Mark {
    /// Leave this many nodes untouched.
    Skip(u32),
    /// Edit the next node in place.
    Modify(Modify),
    /// Insert new nodes before the next node.
    Insert(Vec<ProtoNode>),
    /// Delete this many nodes.
    Delete(u32),
    /// Detach this many nodes, to be attached by the matching `MoveIn`.
    MoveOut { count: u32, id: MoveId },
    /// Attach the nodes detached by the matching `MoveOut`.
    MoveIn { count: u32, id: MoveId },
}

/// An in-place edit of one node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Modify {
    /// `Some(value)` replaces the node's value, `Some(None)` clears it.
    pub set_value: Option<Value>,
    pub fields: Option<Root>,
}

impl Modify {
    pub fn is_empty(&self) -> bool {
        return self.set_value.is_none() && self.fields.is_none();
    }
}

/// A node that does not exist in the tree yet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProtoNode {
    pub value: Value,
    pub fields: BTreeMap<FieldKey, Vec<ProtoNode>>,
}
