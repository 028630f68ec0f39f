// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Bookkeeping for effects that span two fields.
//!
//! A move detaches nodes in one field and attaches them in another. When
//! the family processes the destination it may need what the source
//! produced, and the source may not have been processed yet. Field kinds
//! share such data through a [`CrossFieldTable`], keyed by the revision and
//! local id of the effect and by which end of it they describe.
//!
//! Reading a key records a dependency. Writing a key with
//! `invalidate_dependents` marks every field that already read it as
//! invalidated, and the family reprocesses those fields in one amend pass
//! once every field has been seen. A table lives for one operation.

use std::any::Any;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

use super::changeset::ChangesetLocalId;
use crate::core::RevisionTag;

/// Which end of a cross-field effect a key describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CrossFieldTarget {
    Source,
    Destination,
}

/// Data a field kind shares with other fields. Kinds downcast it back.
pub type CrossFieldValue = Rc<dyn Any>;

pub type CrossFieldKey = (Option<RevisionTag>, ChangesetLocalId);

/// The view of the table a field kind gets while processing one field.
pub trait CrossFieldManager {
    /// Read the value stored under a key. With `add_dependency`, the
    /// current field is reprocessed if the key is written later.
    fn get(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        add_dependency: bool,
    ) -> Option<CrossFieldValue>;

    /// Return the value under a key, storing `new_value` if there is none.
    /// With `invalidate_dependents`, fields that already read the key are
    /// scheduled for amending.
    fn get_or_create(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        new_value: CrossFieldValue,
        invalidate_dependents: bool,
    ) -> CrossFieldValue;
}

/// The keys one field read while being processed.
#[derive(Debug, Default)]
pub(crate) struct FieldQueries {
    src: FxHashSet<CrossFieldKey>,
    dst: FxHashSet<CrossFieldKey>,
    /// The field wrote a key it had itself read.
    invalidated: bool,
}

impl FieldQueries {
    fn keys(&mut self, target: CrossFieldTarget) -> &mut FxHashSet<CrossFieldKey> {
        return match target {
            CrossFieldTarget::Source => &mut self.src,
            CrossFieldTarget::Destination => &mut self.dst,
        };
    }
}

type NestedMap<V> = FxHashMap<Option<RevisionTag>, FxHashMap<ChangesetLocalId, V>>;

/// Shared cross-field state for one operation.
///
/// `T` identifies a processed field in the operation's output, so that
/// invalidated fields can be found again for amending.
pub(crate) struct CrossFieldTable<T> {
    src: NestedMap<CrossFieldValue>,
    dst: NestedMap<CrossFieldValue>,
    src_dependents: FxHashMap<CrossFieldKey, Vec<T>>,
    dst_dependents: FxHashMap<CrossFieldKey, Vec<T>>,
    invalidated: Vec<T>,
}

impl<T> Default for CrossFieldTable<T> {
    fn default() -> CrossFieldTable<T> {
        return CrossFieldTable {
            src: NestedMap::default(),
            dst: NestedMap::default(),
            src_dependents: FxHashMap::default(),
            dst_dependents: FxHashMap::default(),
            invalidated: Vec::new(),
        };
    }
}

impl<T: Clone + PartialEq> CrossFieldTable<T> {
    pub fn get(
        &self,
        queries: &mut FieldQueries,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        add_dependency: bool,
    ) -> Option<CrossFieldValue> {
        if add_dependency {
            queries.keys(target).insert((revision, id));
        }
        let values = match target {
            CrossFieldTarget::Source => &self.src,
            CrossFieldTarget::Destination => &self.dst,
        };
        return values.get(&revision).and_then(|ids| ids.get(&id)).cloned();
    }

    pub fn get_or_create(
        &mut self,
        queries: &mut FieldQueries,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        new_value: CrossFieldValue,
        invalidate_dependents: bool,
    ) -> CrossFieldValue {
        let key = (revision, id);
        if invalidate_dependents {
            let dependents = match target {
                CrossFieldTarget::Source => self.src_dependents.get(&key),
                CrossFieldTarget::Destination => self.dst_dependents.get(&key),
            };
            for dependent in dependents.into_iter().flatten() {
                if !self.invalidated.contains(dependent) {
                    self.invalidated.push(dependent.clone());
                }
            }
            if queries.keys(target).contains(&key) {
                queries.invalidated = true;
            }
        }
        let values = match target {
            CrossFieldTarget::Source => &mut self.src,
            CrossFieldTarget::Destination => &mut self.dst,
        };
        return values.entry(revision).or_default().entry(id).or_insert(new_value).clone();
    }

    /// Record that the field identified by `data` made `queries`.
    pub fn add_field_data(&mut self, queries: FieldQueries, data: T) {
        for key in queries.src {
            self.src_dependents.entry(key).or_default().push(data.clone());
        }
        for key in queries.dst {
            self.dst_dependents.entry(key).or_default().push(data.clone());
        }
        if queries.invalidated && !self.invalidated.contains(&data) {
            self.invalidated.push(data);
        }
    }

    /// Fields invalidated so far, in the order they were invalidated.
    pub fn take_invalidated(&mut self) -> Vec<T> {
        return std::mem::take(&mut self.invalidated);
    }

    pub fn has_invalidated(&self) -> bool {
        return !self.invalidated.is_empty();
    }
}
