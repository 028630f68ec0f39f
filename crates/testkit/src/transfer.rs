// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! A field kind whose fields depend on each other.
//!
//! A transfer field can send a number of nodes under an id and receive the
//! nodes some send produced. A receive does not carry its own count: it
//! learns it through the cross-field table from the matching send, which
//! may sit in a field processed later. That is exactly the situation the
//! amend pass exists for.
//!
//! Child nodes are edited in place, the same way the generic kind does it.
//!
//! The restless flavour republishes its sends while amending, invalidating
//! its readers a second time; the family must refuse to amend twice.

use std::rc::Rc;

use trellis::core::RevisionTag;
use trellis::core::TaggedChange;
use trellis::core::delta;
use trellis::core::delta::Mark;
use trellis::error::Result;
use trellis::modular::ChangesetLocalId;
use trellis::modular::ComposeContext;
use trellis::modular::CrossFieldManager;
use trellis::modular::CrossFieldTarget;
use trellis::modular::DeltaFromChild;
use trellis::modular::FieldChangeHandler;
use trellis::modular::FieldChangeset;
use trellis::modular::FieldKind;
use trellis::modular::FieldKindIdentifier;
use trellis::modular::GenericChange;
use trellis::modular::GenericChangeHandler;
use trellis::modular::GenericChangeset;
use trellis::modular::InvertContext;
use trellis::modular::NodeChangeset;
use trellis::modular::RebaseContext;
use trellis::modular::empty_generic;

pub const TRANSFER_FIELD_KIND: FieldKindIdentifier = FieldKindIdentifier("transfer");

/// One end of a transfer. `revision` is `None` for the change's own
/// revision.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferEndpoint {
    pub revision: Option<RevisionTag>,
    pub id: ChangesetLocalId,
    /// Unknown on a receive until the matching send is seen.
    pub count: Option<u32>,
}

impl TransferEndpoint {
    pub fn send(id: u32, count: u32) -> TransferEndpoint {
        return TransferEndpoint { revision: None, id: ChangesetLocalId(id), count: Some(count) };
    }

    pub fn receive(revision: Option<RevisionTag>, id: u32) -> TransferEndpoint {
        return TransferEndpoint { revision, id: ChangesetLocalId(id), count: None };
    }

    fn tagged(&self, revision: Option<RevisionTag>) -> TransferEndpoint {
        return TransferEndpoint { revision: self.revision.or(revision), ..self.clone() };
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransferChangeset {
    /// In-place edits to children, as a generic payload.
    pub nodes: FieldChangeset,
    pub sends: Vec<TransferEndpoint>,
    pub receives: Vec<TransferEndpoint>,
}

impl Default for TransferChangeset {
    fn default() -> TransferChangeset {
        return TransferChangeset { nodes: empty_generic(), sends: Vec::new(), receives: Vec::new() };
    }
}

impl TransferChangeset {
    pub fn sending(id: u32, count: u32) -> TransferChangeset {
        return TransferChangeset { sends: vec![TransferEndpoint::send(id, count)], ..TransferChangeset::default() };
    }

    pub fn receiving(revision: Option<RevisionTag>, id: u32) -> TransferChangeset {
        return TransferChangeset {
            receives: vec![TransferEndpoint::receive(revision, id)],
            ..TransferChangeset::default()
        };
    }

    pub fn editing(children: Vec<GenericChange>) -> TransferChangeset {
        return TransferChangeset {
            nodes: FieldChangeset::new(GenericChangeset(children)),
            ..TransferChangeset::default()
        };
    }

    pub fn children(&self) -> Result<&[GenericChange]> {
        return Ok(&self.nodes.downcast::<GenericChangeset>()?.0);
    }
}

pub fn transfer_field_kind() -> FieldKind {
    return FieldKind::new(TRANSFER_FIELD_KIND, TransferHandler { restless: false });
}

/// Registered under the same identifier as [`transfer_field_kind`].
pub fn restless_transfer_field_kind() -> FieldKind {
    return FieldKind::new(TRANSFER_FIELD_KIND, TransferHandler { restless: true });
}

pub struct TransferHandler {
    restless: bool,
}

fn publish<M: CrossFieldManager + ?Sized>(cx: &mut M, endpoint: &TransferEndpoint, invalidate: bool) {
    let count = endpoint.count.unwrap_or(0);
    cx.get_or_create(CrossFieldTarget::Source, endpoint.revision, endpoint.id, Rc::new(count), invalidate);
}

fn resolve<M: CrossFieldManager + ?Sized>(cx: &mut M, endpoint: &mut TransferEndpoint, add_dependency: bool) {
    if endpoint.count.is_some() {
        return;
    }
    endpoint.count = cx
        .get(CrossFieldTarget::Source, endpoint.revision, endpoint.id, add_dependency)
        .and_then(|value| value.downcast_ref::<u32>().copied());
}

impl FieldChangeHandler for TransferHandler {
    fn compose(
        &self,
        changes: &[TaggedChange<&FieldChangeset>],
        cx: &mut dyn ComposeContext,
    ) -> Result<FieldChangeset> {
        let mut composed = TransferChangeset::default();
        let mut tagged_nodes = Vec::with_capacity(changes.len());
        for tagged in changes {
            let change = tagged.change.downcast::<TransferChangeset>()?;
            composed.sends.extend(change.sends.iter().map(|send| send.tagged(tagged.revision)));
            composed.receives.extend(change.receives.iter().map(|receive| receive.tagged(tagged.revision)));
            tagged_nodes.push(TaggedChange {
                revision: tagged.revision,
                rollback_of: tagged.rollback_of,
                change: &change.nodes,
            });
        }

        for send in &composed.sends {
            publish(&mut *cx, send, true);
        }
        for receive in &mut composed.receives {
            resolve(&mut *cx, receive, true);
        }

        composed.nodes = GenericChangeHandler.compose(&tagged_nodes, cx)?;
        return Ok(FieldChangeset::new(composed));
    }

    fn amend_compose(&self, composed: &FieldChangeset, cx: &mut dyn ComposeContext) -> Result<FieldChangeset> {
        let mut amended = composed.downcast::<TransferChangeset>()?.clone();
        if self.restless {
            for send in &amended.sends {
                publish(&mut *cx, send, true);
            }
        }
        for receive in &mut amended.receives {
            resolve(&mut *cx, receive, false);
        }
        return Ok(FieldChangeset::new(amended));
    }

    /// Sends become receives of the same nodes and the other way round.
    fn invert(&self, change: TaggedChange<&FieldChangeset>, cx: &mut dyn InvertContext) -> Result<FieldChangeset> {
        let original = change.change.downcast::<TransferChangeset>()?;
        let mut inverse = TransferChangeset::default();
        for send in &original.sends {
            let endpoint = send.tagged(change.revision);
            publish(&mut *cx, &endpoint, true);
            inverse.receives.push(endpoint);
        }
        for receive in &original.receives {
            let mut endpoint = receive.tagged(change.revision);
            resolve(&mut *cx, &mut endpoint, true);
            inverse.sends.push(endpoint);
        }

        let tagged =
            TaggedChange { revision: change.revision, rollback_of: change.rollback_of, change: &original.nodes };
        inverse.nodes = GenericChangeHandler.invert(tagged, cx)?;
        return Ok(FieldChangeset::new(inverse));
    }

    fn amend_invert(
        &self,
        inverted: &FieldChangeset,
        _original_revision: Option<RevisionTag>,
        cx: &mut dyn InvertContext,
    ) -> Result<FieldChangeset> {
        let mut amended = inverted.downcast::<TransferChangeset>()?.clone();
        if self.restless {
            for receive in &amended.receives {
                publish(&mut *cx, receive, true);
            }
        }
        for send in &mut amended.sends {
            resolve(&mut *cx, send, false);
        }
        return Ok(FieldChangeset::new(amended));
    }

    fn rebase(
        &self,
        change: &FieldChangeset,
        over: TaggedChange<&FieldChangeset>,
        cx: &mut dyn RebaseContext,
    ) -> Result<FieldChangeset> {
        let base = over.change.downcast::<TransferChangeset>()?;
        for send in &base.sends {
            publish(&mut *cx, &send.tagged(over.revision), true);
        }
        // Reading the base's own receives ties this field to their sends.
        for receive in &base.receives {
            resolve(&mut *cx, &mut receive.tagged(over.revision), true);
        }

        let mut rebased = change.downcast::<TransferChangeset>()?.clone();
        for receive in &mut rebased.receives {
            resolve(&mut *cx, receive, true);
        }

        let tagged = TaggedChange { revision: over.revision, rollback_of: over.rollback_of, change: &base.nodes };
        rebased.nodes = GenericChangeHandler.rebase(&rebased.nodes, tagged, cx)?;
        return Ok(FieldChangeset::new(rebased));
    }

    fn amend_rebase(
        &self,
        change: &FieldChangeset,
        over: TaggedChange<&FieldChangeset>,
        cx: &mut dyn RebaseContext,
    ) -> Result<FieldChangeset> {
        let base = over.change.downcast::<TransferChangeset>()?;
        if self.restless {
            for send in &base.sends {
                publish(&mut *cx, &send.tagged(over.revision), true);
            }
        }

        let mut amended = change.downcast::<TransferChangeset>()?.clone();
        for receive in &mut amended.receives {
            resolve(&mut *cx, receive, false);
        }

        let tagged = TaggedChange { revision: over.revision, rollback_of: over.rollback_of, change: &base.nodes };
        amended.nodes = GenericChangeHandler.amend_rebase(&amended.nodes, tagged, cx)?;
        return Ok(FieldChangeset::new(amended));
    }

    fn into_delta(&self, change: &FieldChangeset, delta_child: DeltaFromChild<'_>) -> Result<delta::MarkList> {
        let change = change.downcast::<TransferChangeset>()?;
        let mut marks = GenericChangeHandler.into_delta(&change.nodes, delta_child)?;
        for send in &change.sends {
            marks.push(Mark::MoveOut { count: send.count.unwrap_or(0), id: send.id.0 });
        }
        for receive in &change.receives {
            marks.push(Mark::MoveIn { count: receive.count.unwrap_or(0), id: receive.id.0 });
        }
        return Ok(marks);
    }

    fn is_empty(&self, change: &FieldChangeset) -> Result<bool> {
        let change = change.downcast::<TransferChangeset>()?;
        let endpoints_empty = change.sends.is_empty() && change.receives.is_empty();
        return Ok(endpoints_empty && GenericChangeHandler.is_empty(&change.nodes)?);
    }

    fn build_child_change(&self, index: u32, change: NodeChangeset) -> FieldChangeset {
        let nodes = GenericChangeHandler.build_child_change(index, change);
        return FieldChangeset::new(TransferChangeset { nodes, ..TransferChangeset::default() });
    }

    fn child<'c>(&self, change: &'c FieldChangeset, index: u32) -> Result<Option<&'c NodeChangeset>> {
        return GenericChangeHandler.child(&change.downcast::<TransferChangeset>()?.nodes, index);
    }

    fn with_child(&self, change: &FieldChangeset, index: u32, child: NodeChangeset) -> Result<FieldChangeset> {
        let mut updated = change.downcast::<TransferChangeset>()?.clone();
        updated.nodes = GenericChangeHandler.with_child(&updated.nodes, index, child)?;
        return Ok(FieldChangeset::new(updated));
    }
}
