// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Building local edits.
//!
//! An edit names a field by its path from the root and carries a change of
//! that field's kind. The builder wraps it in generic changes for every
//! ancestor, so the result is a changeset rooted at the document root, and
//! hands it to a [`ChangeReceiver`].

use super::changeset::ChangesetLocalId;
use super::changeset::FieldChange;
use super::changeset::FieldChangeMap;
use super::changeset::FieldChangeset;
use super::changeset::FieldKindIdentifier;
use super::changeset::IdAllocator;
use super::changeset::ModularChangeset;
use super::changeset::NodeChangeset;
use super::changeset::ValueChange;
use super::changeset::ValueConstraint;
use super::family::ModularChangeFamily;
use super::generic::GENERIC_FIELD_KIND;
use super::generic::GenericChange;
use super::generic::GenericChangeset;
use crate::core::FieldUpPath;
use crate::core::TaggedChange;
use crate::core::UpPath;
use crate::core::Value;
use crate::error::Error;
use crate::error::Result;

/// Somewhere finished edits go, usually a branch.
pub trait ChangeReceiver {
    fn receive(&mut self, change: ModularChangeset) -> Result<()>;
}

impl ChangeReceiver for Vec<ModularChangeset> {
    fn receive(&mut self, change: ModularChangeset) -> Result<()> {
        self.push(change);
        return Ok(());
    }
}

/// One field edit in a batch.
#[derive(Clone, Debug)]
pub struct EditDescription {
    pub field: FieldUpPath,
    pub kind: FieldKindIdentifier,
    pub change: FieldChangeset,
}

pub struct ModularEditBuilder<'a> {
    family: &'a ModularChangeFamily,
    receiver: &'a mut dyn ChangeReceiver,
    transaction_depth: usize,
    ids: IdAllocator,
}

impl<'a> ModularEditBuilder<'a> {
    pub fn new(family: &'a ModularChangeFamily, receiver: &'a mut dyn ChangeReceiver) -> ModularEditBuilder<'a> {
        return ModularEditBuilder { family, receiver, transaction_depth: 0, ids: IdAllocator::default() };
    }

    /// Ids are unique from the outermost `enter_transaction` until the
    /// matching `exit_transaction`.
    pub fn enter_transaction(&mut self) {
        self.transaction_depth += 1;
        if self.transaction_depth == 1 {
            self.ids = IdAllocator::default();
        }
    }

    pub fn exit_transaction(&mut self) -> Result<()> {
        if self.transaction_depth == 0 {
            return Err(Error::Invariant("exit_transaction without a matching enter_transaction"));
        }
        self.transaction_depth -= 1;
        if self.transaction_depth == 0 {
            self.ids = IdAllocator::default();
        }
        return Ok(());
    }

    pub fn apply(&mut self, change: ModularChangeset) -> Result<()> {
        return self.receiver.receive(change);
    }

    /// Submit a change of `kind` to the field at `field`.
    pub fn submit_change(
        &mut self,
        field: &FieldUpPath,
        kind: FieldKindIdentifier,
        change: FieldChangeset,
    ) -> Result<()> {
        let field_changes = build_change_map(field, kind, change);
        let change = ModularChangeset { field_changes, max_id: self.ids.max(), ..ModularChangeset::default() };
        return self.apply(change);
    }

    /// Submit several field edits as one change.
    pub fn submit_changes(&mut self, edits: &[EditDescription]) -> Result<()> {
        let changes: Vec<ModularChangeset> = edits
            .iter()
            .map(|edit| ModularChangeset::from_fields(build_change_map(&edit.field, edit.kind, edit.change.clone())))
            .collect();
        let tagged: Vec<TaggedChange<&ModularChangeset>> = changes.iter().map(TaggedChange::anonymous).collect();
        let mut composed = self.family.compose(&tagged)?;
        composed.max_id = composed.max_id.max(self.ids.max());
        return self.apply(composed);
    }

    pub fn generate_id(&mut self, count: u32) -> ChangesetLocalId {
        return self.ids.allocate(count);
    }

    /// Set the value of the node at `path`.
    pub fn set_value(&mut self, path: &UpPath, value: Value) -> Result<()> {
        let node = NodeChangeset { value_change: Some(ValueChange::set(value)), ..NodeChangeset::default() };
        return self.submit_node_change(path, node);
    }

    /// Require the node at `path` to hold `value` for this edit to apply.
    pub fn add_value_constraint(&mut self, path: &UpPath, value: Value) -> Result<()> {
        let node = NodeChangeset {
            value_constraint: Some(ValueConstraint { value, violated: false }),
            ..NodeChangeset::default()
        };
        return self.submit_node_change(path, node);
    }

    fn submit_node_change(&mut self, path: &UpPath, node: NodeChangeset) -> Result<()> {
        let field = FieldUpPath::new(path.parent.clone(), path.parent_field.clone());
        let change = generic_child(path.parent_index, node);
        return self.submit_change(&field, GENERIC_FIELD_KIND, change);
    }
}

fn generic_child(index: u32, node_change: NodeChangeset) -> FieldChangeset {
    return FieldChangeset::new(GenericChangeset(vec![GenericChange { index, node_change }]));
}

/// Nest a single field change under generic changes for each ancestor.
pub fn build_change_map(field: &FieldUpPath, kind: FieldKindIdentifier, change: FieldChangeset) -> FieldChangeMap {
    let mut map = FieldChangeMap::new();
    map.insert(field.field.clone(), FieldChange { kind, change, revision: None });

    let mut cursor = field.parent.as_deref();
    while let Some(node) = cursor {
        let node_change = NodeChangeset { field_changes: Some(map), ..NodeChangeset::default() };
        map = FieldChangeMap::new();
        map.insert(
            node.parent_field.clone(),
            FieldChange {
                kind: GENERIC_FIELD_KIND,
                change: generic_child(node.parent_index, node_change),
                revision: None,
            },
        );
        cursor = node.parent.as_deref();
    }
    return map;
}
