// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Addressing inside the document tree.
//!
//! Nodes live in fields; a field is a sequence of nodes under a key. An
//! [`UpPath`] names a node by walking up from it to the root, one
//! (field, index) step at a time.

use std::fmt;
use std::rc::Rc;

/// A node's value. `None` means the node has no value.
pub type Value = Option<serde_json::Value>;

/// The name of a field under a node.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldKey(Rc<str>);

impl FieldKey {
    pub fn new(name: &str) -> FieldKey {
        return FieldKey(Rc::from(name));
    }

    pub fn as_str(&self) -> &str {
        return &self.0;
    }
}

impl From<&str> for FieldKey {
    fn from(value: &str) -> FieldKey {
        return FieldKey::new(value);
    }
}

impl fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{:?}", &*self.0);
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(&self.0);
    }
}

/// Path from a node up to the root.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UpPath {
    /// The node holding `parent_field`, or `None` for the root.
    pub parent: Option<Rc<UpPath>>,
    pub parent_field: FieldKey,
    pub parent_index: u32,
}

impl UpPath {
    /// A node directly under the root.
    pub fn root_child(field: impl Into<FieldKey>, index: u32) -> UpPath {
        return UpPath { parent: None, parent_field: field.into(), parent_index: index };
    }

    /// A node under `parent`.
    pub fn child(parent: &Rc<UpPath>, field: impl Into<FieldKey>, index: u32) -> UpPath {
        return UpPath {
            parent: Some(parent.clone()),
            parent_field: field.into(),
            parent_index: index,
        };
    }

    /// Number of steps from the root to this node.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut cursor = self.parent.as_deref();
        while let Some(path) = cursor {
            depth += 1;
            cursor = path.parent.as_deref();
        }
        return depth;
    }

    /// The (field, index) steps from the root down to this node.
    pub fn steps_from_root(&self) -> Vec<(FieldKey, u32)> {
        let mut steps = Vec::with_capacity(self.depth());
        steps.push((self.parent_field.clone(), self.parent_index));
        let mut cursor = self.parent.as_deref();
        while let Some(path) = cursor {
            steps.push((path.parent_field.clone(), path.parent_index));
            cursor = path.parent.as_deref();
        }
        steps.reverse();
        return steps;
    }
}

/// Path to a field: the node that holds it plus the field key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldUpPath {
    /// `None` for a field of the root.
    pub parent: Option<Rc<UpPath>>,
    pub field: FieldKey,
}

impl FieldUpPath {
    pub fn new(parent: Option<Rc<UpPath>>, field: impl Into<FieldKey>) -> FieldUpPath {
        return FieldUpPath { parent, field: field.into() };
    }
}
