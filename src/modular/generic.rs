// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! The generic field kind.
//!
//! Generic changes only edit existing children in place; they never insert,
//! remove or move. Any field can hold one, which makes the generic kind the
//! fallback for fields whose kind is not known yet, and the kind the edit
//! builder uses for the ancestors of an edited field.

use std::collections::BTreeMap;

use super::changeset::FieldChangeset;
use super::changeset::FieldKindIdentifier;
use super::changeset::NodeChangeset;
use super::field_kind::ComposeContext;
use super::field_kind::DeltaFromChild;
use super::field_kind::FieldChangeHandler;
use super::field_kind::FieldKind;
use super::field_kind::InvertContext;
use super::field_kind::RebaseContext;
use crate::core::RevisionTag;
use crate::core::TaggedChange;
use crate::core::delta;
use crate::core::delta::Mark;
use crate::error::Result;

pub const GENERIC_FIELD_KIND: FieldKindIdentifier = FieldKindIdentifier("generic");

/// One edited child.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericChange {
    pub index: u32,
    pub node_change: NodeChangeset,
}

/// Edited children, sorted by index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenericChangeset(pub Vec<GenericChange>);

pub fn generic_field_kind() -> FieldKind {
    return FieldKind::new(GENERIC_FIELD_KIND, GenericChangeHandler);
}

/// An empty generic payload.
pub fn empty_generic() -> FieldChangeset {
    return FieldChangeset::new(GenericChangeset::default());
}

pub struct GenericChangeHandler;

impl GenericChangeHandler {
    fn rebase_children(
        &self,
        change: &FieldChangeset,
        over: &FieldChangeset,
        cx: &mut dyn RebaseContext,
    ) -> Result<FieldChangeset> {
        let change = &change.downcast::<GenericChangeset>()?.0;
        let over = &over.downcast::<GenericChangeset>()?.0;
        let mut rebased = Vec::with_capacity(change.len());
        let mut i_change = 0;
        let mut i_over = 0;

        // Both lists are sorted; walk them together by index.
        while i_change < change.len() || i_over < over.len() {
            let a = change.get(i_change);
            let b = over.get(i_over);
            let (index, node, base) = match (a, b) {
                (Some(a), Some(b)) if a.index == b.index => {
                    i_change += 1;
                    i_over += 1;
                    (a.index, Some(&a.node_change), Some(&b.node_change))
                }
                (Some(a), Some(b)) if a.index < b.index => {
                    i_change += 1;
                    (a.index, Some(&a.node_change), None)
                }
                (_, Some(b)) => {
                    i_over += 1;
                    (b.index, None, Some(&b.node_change))
                }
                (Some(a), None) => {
                    i_change += 1;
                    (a.index, Some(&a.node_change), None)
                }
                (None, None) => break,
            };
            if let Some(node_change) = cx.rebase_child(index, node, base)? {
                rebased.push(GenericChange { index, node_change });
            }
        }
        return Ok(FieldChangeset::new(GenericChangeset(rebased)));
    }
}

impl FieldChangeHandler for GenericChangeHandler {
    fn compose(
        &self,
        changes: &[TaggedChange<&FieldChangeset>],
        cx: &mut dyn ComposeContext,
    ) -> Result<FieldChangeset> {
        let mut by_index: BTreeMap<u32, Vec<TaggedChange<&NodeChangeset>>> = BTreeMap::new();
        for tagged in changes {
            for entry in &tagged.change.downcast::<GenericChangeset>()?.0 {
                by_index.entry(entry.index).or_default().push(TaggedChange {
                    revision: tagged.revision,
                    rollback_of: tagged.rollback_of,
                    change: &entry.node_change,
                });
            }
        }

        let mut composed = Vec::with_capacity(by_index.len());
        for (index, children) in by_index {
            let node_change = cx.compose_child(index, &children)?;
            if !node_change.is_empty() {
                composed.push(GenericChange { index, node_change });
            }
        }
        return Ok(FieldChangeset::new(GenericChangeset(composed)));
    }

    fn amend_compose(&self, composed: &FieldChangeset, _cx: &mut dyn ComposeContext) -> Result<FieldChangeset> {
        return Ok(composed.clone());
    }

    fn invert(&self, change: TaggedChange<&FieldChangeset>, cx: &mut dyn InvertContext) -> Result<FieldChangeset> {
        let entries = &change.change.downcast::<GenericChangeset>()?.0;
        let mut inverted = Vec::with_capacity(entries.len());
        for entry in entries {
            let node_change = cx.invert_child(&entry.node_change, Some(entry.index), entry.index)?;
            if !node_change.is_empty() {
                inverted.push(GenericChange { index: entry.index, node_change });
            }
        }
        return Ok(FieldChangeset::new(GenericChangeset(inverted)));
    }

    fn amend_invert(
        &self,
        inverted: &FieldChangeset,
        _original_revision: Option<RevisionTag>,
        _cx: &mut dyn InvertContext,
    ) -> Result<FieldChangeset> {
        return Ok(inverted.clone());
    }

    fn rebase(
        &self,
        change: &FieldChangeset,
        over: TaggedChange<&FieldChangeset>,
        cx: &mut dyn RebaseContext,
    ) -> Result<FieldChangeset> {
        return self.rebase_children(change, over.change, cx);
    }

    fn amend_rebase(
        &self,
        change: &FieldChangeset,
        over: TaggedChange<&FieldChangeset>,
        cx: &mut dyn RebaseContext,
    ) -> Result<FieldChangeset> {
        return self.rebase_children(change, over.change, cx);
    }

    fn into_delta(&self, change: &FieldChangeset, delta_child: DeltaFromChild<'_>) -> Result<delta::MarkList> {
        let mut marks = Vec::new();
        let mut next = 0;
        for entry in &change.downcast::<GenericChangeset>()?.0 {
            let modify = delta_child(&entry.node_change)?;
            // Constraints have no effect on the tree.
            if modify.is_empty() {
                continue;
            }
            if entry.index > next {
                marks.push(Mark::Skip(entry.index - next));
            }
            marks.push(Mark::Modify(modify));
            next = entry.index + 1;
        }
        return Ok(marks);
    }

    fn is_empty(&self, change: &FieldChangeset) -> Result<bool> {
        return Ok(change.downcast::<GenericChangeset>()?.0.is_empty());
    }

    fn build_child_change(&self, index: u32, change: NodeChangeset) -> FieldChangeset {
        return FieldChangeset::new(GenericChangeset(vec![GenericChange { index, node_change: change }]));
    }

    fn child<'c>(&self, change: &'c FieldChangeset, index: u32) -> Result<Option<&'c NodeChangeset>> {
        let entries = &change.downcast::<GenericChangeset>()?.0;
        return Ok(entries
            .binary_search_by_key(&index, |entry| entry.index)
            .ok()
            .map(|found| &entries[found].node_change));
    }

    fn with_child(&self, change: &FieldChangeset, index: u32, child: NodeChangeset) -> Result<FieldChangeset> {
        let mut entries = change.downcast::<GenericChangeset>()?.0.clone();
        match entries.binary_search_by_key(&index, |entry| entry.index) {
            Ok(found) => entries[found].node_change = child,
            Err(slot) => entries.insert(slot, GenericChange { index, node_change: child }),
        }
        return Ok(FieldChangeset::new(GenericChangeset(entries)));
    }
}
