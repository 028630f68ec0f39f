// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! The modular change family.
//!
//! Compose, invert and rebase walk the field maps of their inputs and hand
//! each field to the field kind that owns it, recursing into child nodes
//! when the kind asks. Values and value constraints on nodes are handled
//! here; everything inside a field is the kind's business.
//!
//! # Passes
//!
//! Each operation runs a primary pass over every field with a fresh
//! [`CrossFieldTable`]. Fields whose cross-field inputs were written after
//! they read them are then amended in place, once. If amending invalidates
//! anything further the operation fails with [`Error::AmendPassExceeded`].
//!
//! Fields are found again for amending by their location in the output:
//! the (field, child index) steps from the root to the node holding them.
//!
//! # Known gap
//!
//! During compose, a field touched by exactly one input is copied through
//! without consulting its kind, so it never registers cross-field
//! dependencies and is never amended.

use std::collections::BTreeMap;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::debug;

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
use super::cross_field::CrossFieldManager;
use super::cross_field::CrossFieldTable;
use super::cross_field::CrossFieldTarget;
use super::cross_field::CrossFieldValue;
use super::cross_field::FieldQueries;
use super::field_kind::ComposeContext;
use super::field_kind::FieldKind;
use super::field_kind::InvertContext;
use super::field_kind::RebaseContext;
use super::generic::GENERIC_FIELD_KIND;
use super::generic::GenericChangeset;
use super::generic::empty_generic;
use super::generic::generic_field_kind;
use crate::core::ChangeFamily;
use crate::core::ChangeRebaser;
use crate::core::FieldKey;
use crate::core::MissingRepairData;
use crate::core::NoopRepairDataStore;
use crate::core::RepairDataStore;
use crate::core::RevisionInfo;
use crate::core::RevisionMetadata;
use crate::core::RevisionTag;
use crate::core::TaggedChange;
use crate::core::UpPath;
use crate::core::delta;
use crate::core::delta::ProtoNode;
use crate::error::Error;
use crate::error::Result;

/// (field, child index) steps from the root to a node in an output tree.
type Steps = SmallVec<[(FieldKey, u32); 4]>;

/// Where a field sits in an operation's output.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct FieldLocation {
    parents: Steps,
    field: FieldKey,
}

type FieldUpdate<'u> = &'u mut dyn FnMut(Option<&FieldChange>) -> Result<Option<FieldChange>>;

/// Behavior that callers may tune.
#[derive(Clone, Copy, Debug, Default)]
pub struct ModularOptions {
    /// What inversion does when no repair store is supplied and a value or
    /// node has to be restored.
    pub missing_repair_data: MissingRepairData,
}

pub struct ModularChangeFamily {
    field_kinds: FxHashMap<FieldKindIdentifier, FieldKind>,
    generic: FieldKind,
    options: ModularOptions,
}

impl ModularChangeFamily {
    /// A family over `kinds`. The generic kind is always available.
    pub fn new(kinds: impl IntoIterator<Item = FieldKind>, options: ModularOptions) -> ModularChangeFamily {
        let generic = generic_field_kind();
        let mut field_kinds = FxHashMap::default();
        field_kinds.insert(generic.identifier, generic.clone());
        for kind in kinds {
            field_kinds.insert(kind.identifier, kind);
        }
        return ModularChangeFamily { field_kinds, generic, options };
    }

    /// A family that only knows the generic kind.
    pub fn generic_only() -> ModularChangeFamily {
        return ModularChangeFamily::new([], ModularOptions::default());
    }

    pub fn options(&self) -> &ModularOptions {
        return &self.options;
    }

    pub fn field_kind(&self, identifier: FieldKindIdentifier) -> Result<&FieldKind> {
        return self
            .field_kinds
            .get(&identifier)
            .ok_or_else(|| Error::UnknownFieldKind(identifier.0.to_owned()));
    }

    /// Compose `changes`, applied in order, into one changeset.
    ///
    /// Inputs with violated constraints are dropped.
    pub fn compose(&self, changes: &[TaggedChange<&ModularChangeset>]) -> Result<ModularChangeset> {
        let (revisions, max_id) = revisions_from_tagged(changes);
        let meta = RevisionMetadata::new(revisions.clone());
        let mut run = ComposeRun::new(self, &meta, IdAllocator::new(max_id));

        let inputs: Vec<TaggedChange<&FieldChangeMap>> = changes
            .iter()
            .filter(|tagged| tagged.change.violations() == 0)
            .map(|tagged| TaggedChange {
                revision: tagged.revision,
                rollback_of: tagged.rollback_of,
                change: &tagged.change.field_changes,
            })
            .collect();
        let mut composed = run.compose_fields(&inputs)?;

        let invalidated = run.table.take_invalidated();
        if !invalidated.is_empty() {
            debug!(fields = invalidated.len(), "amending composed fields");
            for location in invalidated {
                run.path = location.parents.clone();
                self.update_field(&mut composed, &location.parents, &location.field, &mut |current| {
                    let current = current.ok_or(Error::Invariant("amended field is missing from composition"))?;
                    let kind = self.field_kind(current.kind)?;
                    let mut cx = ComposeFieldContext::new(&mut run, location.field.clone());
                    let change = kind.handler.amend_compose(&current.change, &mut cx)?;
                    return Ok(Some(FieldChange { kind: current.kind, change, revision: current.revision }));
                })?;
            }
            if run.table.has_invalidated() {
                return Err(Error::AmendPassExceeded { operation: "compose" });
            }
        }

        return Ok(make_changeset(composed, run.ids.max(), revisions, 0));
    }

    /// Invert `change`, restoring overwritten values and removed nodes from
    /// `repair`. Without a store, the configured [`MissingRepairData`]
    /// policy decides what restoring yields.
    pub fn invert_with_repair(
        &self,
        change: TaggedChange<&ModularChangeset>,
        is_rollback: bool,
        repair: Option<&dyn RepairDataStore>,
    ) -> Result<ModularChangeset> {
        let fallback = NoopRepairDataStore { policy: self.options.missing_repair_data };
        let repair = repair.unwrap_or(&fallback);
        let mut run = InvertRun {
            family: self,
            ids: IdAllocator::new(change.change.max_id),
            repair,
            table: CrossFieldTable::default(),
            sites: FxHashMap::default(),
            path: Steps::new(),
        };

        let fields = TaggedChange::new(&change.change.field_changes, change.revision);
        let mut inverted = run.invert_fields(fields, None)?;

        let invalidated = run.table.take_invalidated();
        if !invalidated.is_empty() {
            debug!(fields = invalidated.len(), "amending inverted fields");
            for location in invalidated {
                let site = run
                    .sites
                    .get(&location)
                    .cloned()
                    .ok_or(Error::Invariant("amended field was never inverted"))?;
                run.path = location.parents.clone();
                self.update_field(&mut inverted, &location.parents, &location.field, &mut |current| {
                    let current = current.ok_or(Error::Invariant("amended field is missing from inverse"))?;
                    let kind = self.field_kind(current.kind)?;
                    let mut cx = InvertFieldContext {
                        run: &mut run,
                        field: location.field.clone(),
                        input_path: site.input_path.clone(),
                        revision: site.revision,
                        queries: FieldQueries::default(),
                    };
                    let change = kind.handler.amend_invert(&current.change, site.revision, &mut cx)?;
                    return Ok(Some(FieldChange { kind: current.kind, change, revision: current.revision }));
                })?;
            }
            if run.table.has_invalidated() {
                return Err(Error::AmendPassExceeded { operation: "invert" });
            }
        }

        let revisions = change.change.revisions.as_ref().map(|infos| {
            let mut inverted: Vec<RevisionInfo> = if is_rollback {
                infos
                    .iter()
                    .map(|info| RevisionInfo { revision: info.revision, rollback_of: Some(info.revision) })
                    .collect()
            } else {
                infos.clone()
            };
            inverted.reverse();
            inverted
        });
        // An inverse is as violated as the change it undoes.
        let mut result = make_changeset(inverted, run.ids.max(), Vec::new(), change.change.violations());
        result.revisions = revisions;
        return Ok(result);
    }

    /// Rebase `change` so it applies after `over`.
    pub fn rebase(&self, change: &ModularChangeset, over: TaggedChange<&ModularChangeset>) -> Result<ModularChangeset> {
        let (mut revisions, _) = revisions_from_tagged(std::slice::from_ref(&over));
        revisions.extend(change.revisions.iter().flatten().copied());
        let meta = RevisionMetadata::new(revisions);
        let mut run = RebaseRun::new(self, &meta, IdAllocator::new(change.max_id), change.violations());

        let base = TaggedChange {
            revision: over.revision,
            rollback_of: over.rollback_of,
            change: &over.change.field_changes,
        };
        let mut rebased = run.rebase_fields(&change.field_changes, base)?;
        run.base_map_to_rebased.insert(map_address(&over.change.field_changes), Steps::new());

        let (targets, invalidated_empty) = run.fields_to_amend()?;
        if !targets.is_empty() {
            debug!(fields = targets.len(), nested = invalidated_empty.len(), "amending rebased fields");
            let violations = run.violations;
            run.mode = RebaseMode::Amend(invalidated_empty);
            for target in targets {
                run.amend(&mut rebased, target)?;
            }
            if run.table.has_invalidated() {
                return Err(Error::AmendPassExceeded { operation: "rebase" });
            }
            if run.violations != violations {
                return Err(Error::Invariant("amending changed constraint violations"));
            }
        }

        let violations = u32::try_from(run.violations).map_err(|_| Error::Invariant("negative constraint count"))?;
        let mut result = make_changeset(rebased, run.ids.max(), Vec::new(), violations);
        result.revisions = change.revisions.clone();
        return Ok(result);
    }

    /// The concrete effect of `change`.
    pub fn into_delta(&self, change: &ModularChangeset) -> Result<delta::Root> {
        return self.delta_from_fields(&change.field_changes);
    }

    fn delta_from_fields(&self, fields: &FieldChangeMap) -> Result<delta::Root> {
        let mut root = delta::Root::new();
        for (key, field) in fields {
            let kind = self.field_kind(field.kind)?;
            let marks = kind.handler.into_delta(&field.change, &mut |child| self.delta_from_node(child))?;
            if !marks.is_empty() {
                root.insert(key.clone(), marks);
            }
        }
        return Ok(root);
    }

    fn delta_from_node(&self, change: &NodeChangeset) -> Result<delta::Modify> {
        let mut modify = delta::Modify::default();
        if let Some(value_change) = &change.value_change {
            modify.set_value = Some(value_change.value.clone());
        }
        if let Some(fields) = &change.field_changes {
            let nested = self.delta_from_fields(fields)?;
            if !nested.is_empty() {
                modify.fields = Some(nested);
            }
        }
        return Ok(modify);
    }

    /// Bring field changes of mixed kinds to one kind.
    ///
    /// Generic changes convert into any other kind; two different
    /// non-generic kinds cannot be merged.
    fn normalize(
        &self,
        field: &FieldKey,
        changes: &[(FieldKindIdentifier, &FieldChangeset)],
        ids: &mut IdAllocator,
        meta: &RevisionMetadata,
    ) -> Result<(FieldKind, Vec<FieldChangeset>)> {
        let mut target: Option<&FieldKind> = None;
        for (identifier, _) in changes {
            if *identifier == GENERIC_FIELD_KIND {
                continue;
            }
            let kind = self.field_kind(*identifier)?;
            match target {
                None => target = Some(kind),
                Some(existing) if existing.identifier != kind.identifier => {
                    return Err(Error::FieldKindMismatch {
                        first: existing.identifier.0.to_owned(),
                        second: kind.identifier.0.to_owned(),
                    });
                }
                Some(_) => {}
            }
        }

        let Some(target) = target else {
            let same = changes.iter().map(|(_, change)| (*change).clone()).collect();
            return Ok((self.generic.clone(), same));
        };

        let mut normalized = Vec::with_capacity(changes.len());
        for (identifier, change) in changes {
            if *identifier == GENERIC_FIELD_KIND {
                let generic = change.downcast::<GenericChangeset>()?;
                normalized.push(self.convert_generic(field, generic, target, ids, meta)?);
            } else {
                normalized.push((*change).clone());
            }
        }
        return Ok((target.clone(), normalized));
    }

    /// Rebuild a generic change as a change of `target`, one child at a time.
    fn convert_generic(
        &self,
        field: &FieldKey,
        generic: &GenericChangeset,
        target: &FieldKind,
        ids: &mut IdAllocator,
        meta: &RevisionMetadata,
    ) -> Result<FieldChangeset> {
        let per_child: Vec<FieldChangeset> = generic
            .0
            .iter()
            .map(|entry| target.handler.build_child_change(entry.index, entry.node_change.clone()))
            .collect();
        let tagged: Vec<TaggedChange<&FieldChangeset>> = per_child.iter().map(TaggedChange::anonymous).collect();

        let mut run = ComposeRun::new(self, meta, *ids);
        let converted = {
            let mut cx = ComposeFieldContext::new(&mut run, field.clone());
            target.handler.compose(&tagged, &mut cx)?
        };
        *ids = run.ids;
        return Ok(converted);
    }

    /// Replace the field at `parents`/`field` inside `map` with what `update`
    /// returns for it, rebuilding every payload on the way down.
    fn update_field(
        &self,
        map: &mut FieldChangeMap,
        parents: &[(FieldKey, u32)],
        field: &FieldKey,
        update: FieldUpdate<'_>,
    ) -> Result<()> {
        let Some(((key, index), rest)) = parents.split_first() else {
            match update(map.get(field))? {
                Some(change) => map.insert(field.clone(), change),
                None => map.remove(field),
            };
            return Ok(());
        };

        let parent = map.get(key).ok_or(Error::Invariant("amended field has no parent field"))?;
        let (identifier, revision, payload) = (parent.kind, parent.revision, parent.change.clone());
        let kind = self.field_kind(identifier)?;
        let mut node = kind
            .handler
            .child(&payload, *index)?
            .cloned()
            .ok_or(Error::Invariant("amended field has no parent node"))?;

        let mut fields = node.field_changes.take().unwrap_or_default();
        self.update_field(&mut fields, rest, field, update)?;
        node.field_changes = if fields.is_empty() { None } else { Some(fields) };

        let change = kind.handler.with_child(&payload, *index, node)?;
        map.insert(key.clone(), FieldChange { kind: identifier, change, revision });
        return Ok(());
    }
}

impl ChangeRebaser for ModularChangeFamily {
    type Change = ModularChangeset;

    fn compose(&self, changes: &[TaggedChange<&ModularChangeset>]) -> Result<ModularChangeset> {
        return ModularChangeFamily::compose(self, changes);
    }

    fn invert(&self, change: TaggedChange<&ModularChangeset>, is_rollback: bool) -> Result<ModularChangeset> {
        return self.invert_with_repair(change, is_rollback, None);
    }

    fn rebase(&self, change: &ModularChangeset, over: TaggedChange<&ModularChangeset>) -> Result<ModularChangeset> {
        return ModularChangeFamily::rebase(self, change, over);
    }
}

impl ChangeFamily for ModularChangeFamily {
    type Change = ModularChangeset;

    fn rebaser(&self) -> &dyn ChangeRebaser<Change = ModularChangeset> {
        return self;
    }

    fn into_delta(&self, change: &ModularChangeset) -> Result<delta::Root> {
        return ModularChangeFamily::into_delta(self, change);
    }
}

/// Revision catalogue and highest local id across tagged inputs.
fn revisions_from_tagged(changes: &[TaggedChange<&ModularChangeset>]) -> (Vec<RevisionInfo>, Option<ChangesetLocalId>) {
    let mut revisions = Vec::new();
    let mut max_id: Option<ChangesetLocalId> = None;
    for tagged in changes {
        match (&tagged.change.revisions, tagged.revision) {
            (Some(infos), _) => revisions.extend(infos.iter().copied()),
            (None, Some(revision)) => revisions.push(RevisionInfo { revision, rollback_of: tagged.rollback_of }),
            (None, None) => {}
        }
        max_id = max_id.max(tagged.change.max_id);
    }
    return (revisions, max_id);
}

fn make_changeset(
    field_changes: FieldChangeMap,
    max_id: Option<ChangesetLocalId>,
    revisions: Vec<RevisionInfo>,
    violations: u32,
) -> ModularChangeset {
    return ModularChangeset {
        field_changes,
        revisions: if revisions.is_empty() { None } else { Some(revisions) },
        max_id,
        constraint_violation_count: if violations == 0 { None } else { Some(violations) },
    };
}

fn generic_empty_field() -> FieldChange {
    return FieldChange { kind: GENERIC_FIELD_KIND, change: empty_generic(), revision: None };
}

fn map_address(map: &FieldChangeMap) -> usize {
    return map as *const FieldChangeMap as usize;
}

fn field_address(field: &FieldChange) -> usize {
    return field as *const FieldChange as usize;
}

// =============================================================================
// Compose
// =============================================================================

struct ComposeRun<'a> {
    family: &'a ModularChangeFamily,
    meta: &'a RevisionMetadata,
    ids: IdAllocator,
    table: CrossFieldTable<FieldLocation>,
    path: Steps,
}

impl<'a> ComposeRun<'a> {
    fn new(family: &'a ModularChangeFamily, meta: &'a RevisionMetadata, ids: IdAllocator) -> ComposeRun<'a> {
        return ComposeRun { family, meta, ids, table: CrossFieldTable::default(), path: Steps::new() };
    }

    fn compose_fields(&mut self, changes: &[TaggedChange<&FieldChangeMap>]) -> Result<FieldChangeMap> {
        let mut by_field: BTreeMap<&FieldKey, Vec<(FieldKindIdentifier, TaggedChange<&FieldChangeset>)>> =
            BTreeMap::new();
        for tagged in changes {
            for (key, field) in tagged.change {
                let contribution = TaggedChange {
                    revision: field.revision.or(tagged.revision),
                    rollback_of: tagged.rollback_of,
                    change: &field.change,
                };
                by_field.entry(key).or_default().push((field.kind, contribution));
            }
        }

        let mut composed = FieldChangeMap::new();
        for (key, contributions) in by_field {
            if let [(kind, only)] = contributions.as_slice() {
                let field = FieldChange { kind: *kind, change: only.change.clone(), revision: only.revision };
                composed.insert(key.clone(), field);
                continue;
            }

            let parts: Vec<(FieldKindIdentifier, &FieldChangeset)> =
                contributions.iter().map(|(kind, tagged)| (*kind, tagged.change)).collect();
            let (kind, normalized) = self.family.normalize(key, &parts, &mut self.ids, self.meta)?;
            let tagged: Vec<TaggedChange<&FieldChangeset>> = contributions
                .iter()
                .zip(&normalized)
                .map(|((_, original), change)| TaggedChange {
                    revision: original.revision,
                    rollback_of: original.rollback_of,
                    change,
                })
                .collect();

            let (change, queries) = {
                let mut cx = ComposeFieldContext::new(self, key.clone());
                let change = kind.handler.compose(&tagged, &mut cx)?;
                (change, cx.queries)
            };
            let location = FieldLocation { parents: self.path.clone(), field: key.clone() };
            self.table.add_field_data(queries, location);
            composed.insert(key.clone(), FieldChange { kind: kind.identifier, change, revision: None });
        }
        return Ok(composed);
    }

    fn compose_nodes(&mut self, changes: &[TaggedChange<&NodeChangeset>]) -> Result<NodeChangeset> {
        let mut value_change: Option<ValueChange> = None;
        let mut value_constraint: Option<ValueConstraint> = None;
        let mut field_changes: Vec<TaggedChange<&FieldChangeMap>> = Vec::new();

        for tagged in changes {
            // Constraints after a value change can never be violated.
            if let Some(constraint) = &tagged.change.value_constraint {
                if value_constraint.is_none() && value_change.is_none() {
                    value_constraint = Some(constraint.clone());
                }
            }
            if let Some(change) = &tagged.change.value_change {
                let mut change = change.clone();
                if change.revision.is_none() {
                    change.revision = tagged.revision;
                }
                value_change = Some(change);
            }
            if let Some(fields) = &tagged.change.field_changes {
                field_changes.push(TaggedChange {
                    revision: tagged.revision,
                    rollback_of: tagged.rollback_of,
                    change: fields,
                });
            }
        }

        let mut composed = NodeChangeset { value_change, field_changes: None, value_constraint };
        if !field_changes.is_empty() {
            let fields = self.compose_fields(&field_changes)?;
            if !fields.is_empty() {
                composed.field_changes = Some(fields);
            }
        }
        return Ok(composed);
    }
}

struct ComposeFieldContext<'r, 'a> {
    run: &'r mut ComposeRun<'a>,
    field: FieldKey,
    queries: FieldQueries,
}

impl<'r, 'a> ComposeFieldContext<'r, 'a> {
    fn new(run: &'r mut ComposeRun<'a>, field: FieldKey) -> ComposeFieldContext<'r, 'a> {
        return ComposeFieldContext { run, field, queries: FieldQueries::default() };
    }
}

impl CrossFieldManager for ComposeFieldContext<'_, '_> {
    fn get(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        add_dependency: bool,
    ) -> Option<CrossFieldValue> {
        return self.run.table.get(&mut self.queries, target, revision, id, add_dependency);
    }

    fn get_or_create(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        new_value: CrossFieldValue,
        invalidate_dependents: bool,
    ) -> CrossFieldValue {
        return self.run.table.get_or_create(&mut self.queries, target, revision, id, new_value, invalidate_dependents);
    }
}

impl ComposeContext for ComposeFieldContext<'_, '_> {
    fn compose_child(&mut self, index: u32, children: &[TaggedChange<&NodeChangeset>]) -> Result<NodeChangeset> {
        self.run.path.push((self.field.clone(), index));
        let composed = self.run.compose_nodes(children);
        self.run.path.pop();
        return composed;
    }

    fn generate_id(&mut self, count: u32) -> ChangesetLocalId {
        return self.run.ids.allocate(count);
    }

    fn revision_metadata(&self) -> &RevisionMetadata {
        return self.run.meta;
    }
}

// =============================================================================
// Invert
// =============================================================================

/// What amending an inverted field needs to know about its input.
#[derive(Clone)]
struct InvertSite {
    input_path: Option<Rc<UpPath>>,
    revision: Option<RevisionTag>,
}

struct InvertRun<'a> {
    family: &'a ModularChangeFamily,
    ids: IdAllocator,
    repair: &'a dyn RepairDataStore,
    table: CrossFieldTable<FieldLocation>,
    sites: FxHashMap<FieldLocation, InvertSite>,
    path: Steps,
}

impl InvertRun<'_> {
    fn invert_fields(
        &mut self,
        changes: TaggedChange<&FieldChangeMap>,
        input_path: Option<Rc<UpPath>>,
    ) -> Result<FieldChangeMap> {
        let mut inverted = FieldChangeMap::new();
        for (key, field) in changes.change {
            let revision = field.revision.or(changes.revision);
            let kind = self.family.field_kind(field.kind)?;
            let (change, queries) = {
                let mut cx = InvertFieldContext {
                    run: self,
                    field: key.clone(),
                    input_path: input_path.clone(),
                    revision,
                    queries: FieldQueries::default(),
                };
                let change = kind.handler.invert(TaggedChange::new(&field.change, revision), &mut cx)?;
                (change, cx.queries)
            };

            let location = FieldLocation { parents: self.path.clone(), field: key.clone() };
            self.table.add_field_data(queries, location.clone());
            self.sites.insert(location, InvertSite { input_path: input_path.clone(), revision });
            inverted.insert(key.clone(), FieldChange { kind: field.kind, change, revision: field.revision });
        }
        return Ok(inverted);
    }

    fn invert_node(&mut self, change: TaggedChange<&NodeChangeset>, path: Option<Rc<UpPath>>) -> Result<NodeChangeset> {
        let mut inverse = NodeChangeset::default();
        if let Some(value_change) = &change.change.value_change {
            if value_change.revert.is_some() {
                return Err(Error::DoubleInversion);
            }
            let revision = value_change.revision.or(change.revision).ok_or(Error::MissingRevision)?;
            let node = path.as_deref().ok_or(Error::MissingPath)?;
            let value = self.repair.get_value(revision, node)?;
            inverse.value_change = Some(ValueChange { value, revision: None, revert: Some(revision) });
        }
        if let Some(fields) = &change.change.field_changes {
            let tagged = TaggedChange::new(fields, change.revision);
            let fields = self.invert_fields(tagged, path)?;
            if !fields.is_empty() {
                inverse.field_changes = Some(fields);
            }
        }
        return Ok(inverse);
    }
}

struct InvertFieldContext<'r, 'a> {
    run: &'r mut InvertRun<'a>,
    field: FieldKey,
    /// Path of the node holding `field`, in the input context.
    input_path: Option<Rc<UpPath>>,
    revision: Option<RevisionTag>,
    queries: FieldQueries,
}

impl CrossFieldManager for InvertFieldContext<'_, '_> {
    fn get(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        add_dependency: bool,
    ) -> Option<CrossFieldValue> {
        return self.run.table.get(&mut self.queries, target, revision, id, add_dependency);
    }

    fn get_or_create(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        new_value: CrossFieldValue,
        invalidate_dependents: bool,
    ) -> CrossFieldValue {
        return self.run.table.get_or_create(&mut self.queries, target, revision, id, new_value, invalidate_dependents);
    }
}

impl InvertContext for InvertFieldContext<'_, '_> {
    fn invert_child(
        &mut self,
        change: &NodeChangeset,
        input_index: Option<u32>,
        output_index: u32,
    ) -> Result<NodeChangeset> {
        let child_path = input_index.map(|index| {
            return Rc::new(UpPath {
                parent: self.input_path.clone(),
                parent_field: self.field.clone(),
                parent_index: index,
            });
        });
        self.run.path.push((self.field.clone(), output_index));
        let inverted = self.run.invert_node(TaggedChange::new(change, self.revision), child_path);
        self.run.path.pop();
        return inverted;
    }

    fn revive(&self, revision: RevisionTag, index: u32, count: u32) -> Result<Vec<ProtoNode>> {
        return self.run.repair.get_nodes(revision, self.input_path.as_deref(), &self.field, index, count);
    }

    fn generate_id(&mut self, count: u32) -> ChangesetLocalId {
        return self.run.ids.allocate(count);
    }
}

// =============================================================================
// Rebase
// =============================================================================

/// Identifies a processed field for the cross-field table.
#[derive(Clone, Debug, PartialEq)]
enum RebaseData {
    /// A field of the base changeset, by address.
    Base(usize),
    /// A field only the rebased change touches, by output location.
    Rebased(FieldLocation),
}

/// Where a base field sits.
#[derive(Clone)]
struct BaseFieldContext {
    /// Address of the base map holding the field.
    map: usize,
    field: FieldKey,
    revision: Option<RevisionTag>,
    change: FieldChange,
}

enum RebaseMode {
    Primary,
    /// Only descend into base fields in this set whose node has no rebased
    /// counterpart; copy everything else through.
    Amend(FxHashSet<usize>),
}

struct RebaseRun<'a> {
    family: &'a ModularChangeFamily,
    meta: &'a RevisionMetadata,
    ids: IdAllocator,
    table: CrossFieldTable<RebaseData>,
    violations: i64,
    path: Steps,
    mode: RebaseMode,
    /// Base map address -> output location of the node rebased over it.
    base_map_to_rebased: FxHashMap<usize, Steps>,
    base_field_context: FxHashMap<usize, BaseFieldContext>,
    /// Base map address -> address of the base field holding its node.
    base_map_to_parent_field: FxHashMap<usize, usize>,
    /// Converted base payloads, kept so nested addresses stay stable.
    normalized_base: FxHashMap<(usize, FieldKindIdentifier), FieldChangeset>,
}

impl<'a> RebaseRun<'a> {
    fn new(
        family: &'a ModularChangeFamily,
        meta: &'a RevisionMetadata,
        ids: IdAllocator,
        violations: u32,
    ) -> RebaseRun<'a> {
        return RebaseRun {
            family,
            meta,
            ids,
            table: CrossFieldTable::default(),
            violations: i64::from(violations),
            path: Steps::new(),
            mode: RebaseMode::Primary,
            base_map_to_rebased: FxHashMap::default(),
            base_field_context: FxHashMap::default(),
            base_map_to_parent_field: FxHashMap::default(),
            normalized_base: FxHashMap::default(),
        };
    }

    /// Normalize a change field and a base field to one kind. `base_address`
    /// identifies a real base field whose conversion should be reused.
    fn normalize_pair(
        &mut self,
        key: &FieldKey,
        change: &FieldChange,
        base: &FieldChange,
        base_address: Option<usize>,
    ) -> Result<(FieldKind, FieldChangeset, FieldChangeset)> {
        let parts = [(change.kind, &change.change), (base.kind, &base.change)];
        let (kind, mut normalized) = self.family.normalize(key, &parts, &mut self.ids, self.meta)?;
        let mut base_change = normalized.pop().ok_or(Error::Invariant("normalize dropped a change"))?;
        let change_change = normalized.pop().ok_or(Error::Invariant("normalize dropped a change"))?;

        if let Some(address) = base_address.filter(|_| base.kind != kind.identifier) {
            base_change = self
                .normalized_base
                .entry((address, kind.identifier))
                .or_insert(base_change)
                .clone();
        }
        return Ok((kind, change_change, base_change));
    }

    fn rebase_fields(
        &mut self,
        change: &FieldChangeMap,
        over: TaggedChange<&FieldChangeMap>,
    ) -> Result<FieldChangeMap> {
        let mut rebased = FieldChangeMap::new();
        let over_map = map_address(over.change);
        let placeholder = generic_empty_field();

        for (key, base) in over.change {
            let base_address = field_address(base);
            let new_change = change.get(key);
            if let RebaseMode::Amend(invalidated_empty) = &self.mode {
                if let Some(existing) = new_change {
                    rebased.insert(key.clone(), existing.clone());
                    continue;
                }
                if !invalidated_empty.contains(&base_address) {
                    continue;
                }
            }

            let field_change = new_change.unwrap_or(&placeholder);
            let (kind, change_payload, base_payload) =
                self.normalize_pair(key, field_change, base, Some(base_address))?;
            let base_revision = base.revision.or(over.revision);

            let (result, queries) = {
                let mut cx = RebaseFieldContext::new(self, key.clone(), Some(base_address), base_revision);
                let tagged_base = TaggedChange::new(&base_payload, base_revision);
                let result = kind.handler.rebase(&change_payload, tagged_base, &mut cx)?;
                (result, cx.queries)
            };
            self.table.add_field_data(queries, RebaseData::Base(base_address));
            self.base_field_context.insert(
                base_address,
                BaseFieldContext { map: over_map, field: key.clone(), revision: over.revision, change: base.clone() },
            );

            if !kind.handler.is_empty(&result)? {
                let revision = field_change.revision;
                rebased.insert(key.clone(), FieldChange { kind: kind.identifier, change: result, revision });
            }
        }

        for (key, field_change) in change {
            if over.change.contains_key(key) {
                continue;
            }
            if let RebaseMode::Amend(_) = self.mode {
                rebased.insert(key.clone(), field_change.clone());
                continue;
            }
            let (kind, change_payload, base_payload) = self.normalize_pair(key, field_change, &placeholder, None)?;
            let (result, queries) = {
                let mut cx = RebaseFieldContext::new(self, key.clone(), None, None);
                let result = kind.handler.rebase(&change_payload, TaggedChange::anonymous(&base_payload), &mut cx)?;
                (result, cx.queries)
            };
            let location = FieldLocation { parents: self.path.clone(), field: key.clone() };
            self.table.add_field_data(queries, RebaseData::Rebased(location));
            let revision = field_change.revision;
            rebased.insert(key.clone(), FieldChange { kind: kind.identifier, change: result, revision });
        }
        return Ok(rebased);
    }

    fn rebase_node(
        &mut self,
        change: Option<&NodeChangeset>,
        over: Option<TaggedChange<&NodeChangeset>>,
        parent_field: Option<usize>,
    ) -> Result<Option<NodeChangeset>> {
        let empty = FieldChangeMap::new();
        let change_fields = change.and_then(|c| c.field_changes.as_ref()).unwrap_or(&empty);
        let base_fields = over.as_ref().and_then(|o| o.change.field_changes.as_ref());
        let base = TaggedChange {
            revision: over.as_ref().and_then(|o| o.revision),
            rollback_of: over.as_ref().and_then(|o| o.rollback_of),
            change: base_fields.unwrap_or(&empty),
        };
        let fields = self.rebase_fields(change_fields, base)?;

        if let (Some(map), Some(parent)) = (base_fields, parent_field) {
            self.base_map_to_parent_field.insert(map_address(map), parent);
        }

        let mut rebased = NodeChangeset {
            value_change: change.and_then(|c| c.value_change.clone()),
            field_changes: if fields.is_empty() { None } else { Some(fields) },
            value_constraint: change.and_then(|c| c.value_constraint.clone()),
        };

        if let (Some(constraint), Some(over)) = (rebased.value_constraint.as_mut(), over.as_ref()) {
            if let Some(value_change) = &over.change.value_change {
                let violated = value_change.value != constraint.value;
                if violated != constraint.violated {
                    constraint.violated = violated;
                    self.violations += if violated { 1 } else { -1 };
                }
            }
        }

        if rebased.is_empty() {
            return Ok(None);
        }
        if let Some(map) = base_fields {
            self.base_map_to_rebased.insert(map_address(map), self.path.clone());
        }
        return Ok(Some(rebased));
    }

    /// Resolve invalidated fields to the fields that must be amended.
    ///
    /// A base field whose node has no rebased counterpart cannot be amended
    /// where it is, so the walk climbs to the closest ancestor field whose
    /// node does, remembering the fields it passed on the way.
    fn fields_to_amend(&mut self) -> Result<(Vec<RebaseData>, FxHashSet<usize>)> {
        let mut targets: Vec<RebaseData> = Vec::new();
        let mut invalidated_empty = FxHashSet::default();
        for data in self.table.take_invalidated() {
            let target = match data {
                RebaseData::Rebased(location) => RebaseData::Rebased(location),
                RebaseData::Base(mut address) => {
                    loop {
                        let context = self
                            .base_field_context
                            .get(&address)
                            .ok_or(Error::Invariant("invalidated base field was never visited"))?;
                        if self.base_map_to_rebased.contains_key(&context.map) {
                            break;
                        }
                        invalidated_empty.insert(address);
                        address = *self
                            .base_map_to_parent_field
                            .get(&context.map)
                            .ok_or(Error::Invariant("invalidated base field has no parent field"))?;
                    }
                    RebaseData::Base(address)
                }
            };
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        return Ok((targets, invalidated_empty));
    }

    fn amend(&mut self, rebased: &mut FieldChangeMap, target: RebaseData) -> Result<()> {
        let family = self.family;
        match target {
            RebaseData::Base(address) => {
                let context = self
                    .base_field_context
                    .get(&address)
                    .cloned()
                    .ok_or(Error::Invariant("amended base field was never visited"))?;
                let node = self
                    .base_map_to_rebased
                    .get(&context.map)
                    .cloned()
                    .ok_or(Error::Invariant("amended base field has no rebased node"))?;
                let base_revision = context.change.revision.or(context.revision);
                self.path = node.clone();

                return family.update_field(rebased, &node, &context.field, &mut |current| {
                    let placeholder = generic_empty_field();
                    let field_change = current.unwrap_or(&placeholder);
                    let (kind, change_payload, base_payload) =
                        self.normalize_pair(&context.field, field_change, &context.change, Some(address))?;
                    let mut cx = RebaseFieldContext::new(self, context.field.clone(), Some(address), base_revision);
                    let over = TaggedChange::new(&base_payload, base_revision);
                    let amended = kind.handler.amend_rebase(&change_payload, over, &mut cx)?;
                    if kind.handler.is_empty(&amended)? {
                        return Ok(None);
                    }
                    let revision = field_change.revision;
                    return Ok(Some(FieldChange { kind: kind.identifier, change: amended, revision }));
                });
            }
            RebaseData::Rebased(location) => {
                self.path = location.parents.clone();
                return family.update_field(rebased, &location.parents, &location.field, &mut |current| {
                    let current = current.ok_or(Error::Invariant("amended field is missing from rebase"))?;
                    let placeholder = generic_empty_field();
                    let (kind, change_payload, base_payload) =
                        self.normalize_pair(&location.field, current, &placeholder, None)?;
                    let mut cx = RebaseFieldContext::new(self, location.field.clone(), None, None);
                    let over = TaggedChange::anonymous(&base_payload);
                    let amended = kind.handler.amend_rebase(&change_payload, over, &mut cx)?;
                    return Ok(Some(FieldChange { kind: kind.identifier, change: amended, revision: current.revision }));
                });
            }
        }
    }
}

struct RebaseFieldContext<'r, 'a> {
    run: &'r mut RebaseRun<'a>,
    field: FieldKey,
    /// Address of the base field, if the base touches this field.
    parent_field: Option<usize>,
    base_revision: Option<RevisionTag>,
    queries: FieldQueries,
}

impl<'r, 'a> RebaseFieldContext<'r, 'a> {
    fn new(
        run: &'r mut RebaseRun<'a>,
        field: FieldKey,
        parent_field: Option<usize>,
        base_revision: Option<RevisionTag>,
    ) -> RebaseFieldContext<'r, 'a> {
        return RebaseFieldContext { run, field, parent_field, base_revision, queries: FieldQueries::default() };
    }
}

impl CrossFieldManager for RebaseFieldContext<'_, '_> {
    fn get(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        add_dependency: bool,
    ) -> Option<CrossFieldValue> {
        return self.run.table.get(&mut self.queries, target, revision, id, add_dependency);
    }

    fn get_or_create(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        new_value: CrossFieldValue,
        invalidate_dependents: bool,
    ) -> CrossFieldValue {
        return self.run.table.get_or_create(&mut self.queries, target, revision, id, new_value, invalidate_dependents);
    }
}

impl RebaseContext for RebaseFieldContext<'_, '_> {
    fn rebase_child(
        &mut self,
        index: u32,
        change: Option<&NodeChangeset>,
        base: Option<&NodeChangeset>,
    ) -> Result<Option<NodeChangeset>> {
        if self.parent_field.is_none() && base.is_some() {
            return Err(Error::Invariant("base child change without a base field"));
        }
        self.run.path.push((self.field.clone(), index));
        let over = base.map(|base| TaggedChange::new(base, self.base_revision));
        let rebased = self.run.rebase_node(change, over, self.parent_field);
        self.run.path.pop();
        return rebased;
    }

    fn generate_id(&mut self, count: u32) -> ChangesetLocalId {
        return self.run.ids.allocate(count);
    }

    fn revision_metadata(&self) -> &RevisionMetadata {
        return self.run.meta;
    }
}
