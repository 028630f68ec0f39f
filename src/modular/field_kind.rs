// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! The plugin contract for field kinds.
//!
//! A field kind owns one category of field content (sequences, optional
//! values, ...) and knows how to compose, invert and rebase its own
//! payloads. It reaches the nodes inside a field through a context the
//! family passes in, which also carries the cross-field manager for the
//! field being processed.
//!
//! Child callbacks take the index the child occupies in the handler's
//! output. The family uses it to find nested fields again when they have to
//! be amended, together with [`FieldChangeHandler::child`] and
//! [`FieldChangeHandler::with_child`].

use std::rc::Rc;

use super::changeset::ChangesetLocalId;
use super::changeset::FieldChangeset;
use super::changeset::FieldKindIdentifier;
use super::changeset::NodeChangeset;
use super::cross_field::CrossFieldManager;
use crate::core::RevisionMetadata;
use crate::core::RevisionTag;
use crate::core::TaggedChange;
use crate::core::delta;
use crate::core::delta::ProtoNode;
use crate::error::Result;

pub trait ComposeContext: CrossFieldManager {
    /// Compose the changes to one child node, in order.
    fn compose_child(&mut self, index: u32, children: &[TaggedChange<&NodeChangeset>]) -> Result<NodeChangeset>;

    fn generate_id(&mut self, count: u32) -> ChangesetLocalId;

    fn revision_metadata(&self) -> &RevisionMetadata;
}

pub trait InvertContext: CrossFieldManager {
    /// Invert the change to one child node. `input_index` is the node's
    /// position before the change, if it existed then.
    fn invert_child(
        &mut self,
        change: &NodeChangeset,
        input_index: Option<u32>,
        output_index: u32,
    ) -> Result<NodeChangeset>;

    /// Nodes the inverted revision removed from this field.
    fn revive(&self, revision: RevisionTag, index: u32, count: u32) -> Result<Vec<ProtoNode>>;

    fn generate_id(&mut self, count: u32) -> ChangesetLocalId;
}

pub trait RebaseContext: CrossFieldManager {
    /// Rebase the change to one child over the base's change to the same
    /// child. Returns `None` when nothing is left.
    fn rebase_child(
        &mut self,
        index: u32,
        change: Option<&NodeChangeset>,
        base: Option<&NodeChangeset>,
    ) -> Result<Option<NodeChangeset>>;

    fn generate_id(&mut self, count: u32) -> ChangesetLocalId;

    fn revision_metadata(&self) -> &RevisionMetadata;
}

/// Callback turning a child node change into its delta.
pub type DeltaFromChild<'a> = &'a mut dyn FnMut(&NodeChangeset) -> Result<delta::Modify>;

pub trait FieldChangeHandler {
    fn compose(&self, changes: &[TaggedChange<&FieldChangeset>], cx: &mut dyn ComposeContext)
    -> Result<FieldChangeset>;

    /// Redo a composed field whose cross-field inputs changed.
    fn amend_compose(&self, composed: &FieldChangeset, cx: &mut dyn ComposeContext) -> Result<FieldChangeset>;

    fn invert(&self, change: TaggedChange<&FieldChangeset>, cx: &mut dyn InvertContext) -> Result<FieldChangeset>;

    /// Redo an inverted field whose cross-field inputs changed.
    fn amend_invert(
        &self,
        inverted: &FieldChangeset,
        original_revision: Option<RevisionTag>,
        cx: &mut dyn InvertContext,
    ) -> Result<FieldChangeset>;

    fn rebase(
        &self,
        change: &FieldChangeset,
        over: TaggedChange<&FieldChangeset>,
        cx: &mut dyn RebaseContext,
    ) -> Result<FieldChangeset>;

    /// Redo a rebased field. `change` is the already rebased payload.
    fn amend_rebase(
        &self,
        change: &FieldChangeset,
        over: TaggedChange<&FieldChangeset>,
        cx: &mut dyn RebaseContext,
    ) -> Result<FieldChangeset>;

    fn into_delta(&self, change: &FieldChangeset, delta_child: DeltaFromChild<'_>) -> Result<delta::MarkList>;

    fn is_empty(&self, change: &FieldChangeset) -> Result<bool>;

    /// A change that only edits the child at `index`.
    fn build_child_change(&self, index: u32, change: NodeChangeset) -> FieldChangeset;

    /// The change to the child at `index`, if the payload has one.
    fn child<'c>(&self, change: &'c FieldChangeset, index: u32) -> Result<Option<&'c NodeChangeset>>;

    /// `change` with the child at `index` replaced by `child`.
    fn with_child(&self, change: &FieldChangeset, index: u32, child: NodeChangeset) -> Result<FieldChangeset>;
}

/// A registered field kind.
#[derive(Clone)]
pub struct FieldKind {
    pub identifier: FieldKindIdentifier,
    pub handler: Rc<dyn FieldChangeHandler>,
}

impl FieldKind {
    pub fn new(identifier: FieldKindIdentifier, handler: impl FieldChangeHandler + 'static) -> FieldKind {
        return FieldKind { identifier, handler: Rc::new(handler) };
    }
}

impl std::fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return f.debug_tuple("FieldKind").field(&self.identifier).finish();
    }
}
