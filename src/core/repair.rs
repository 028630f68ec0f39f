// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Collaborators that live outside the rebaser: repair data and anchors.
//!
//! Inverting a change that overwrote a value or removed nodes needs the
//! content that was there before. A [`RepairDataStore`] remembers that
//! content per revision; a [`RepairDataStoreProvider`] builds stores and is
//! fed every delta the trunk applies. An [`AnchorSet`] tracks positions in
//! the tree and is told about every delta that moves them.

use super::delta;
use super::delta::ProtoNode;
use super::revision::RevisionTag;
use super::tree::FieldKey;
use super::tree::UpPath;
use super::tree::Value;
use crate::error::Error;
use crate::error::Result;

/// Prior content, indexed by the revision that replaced it.
pub trait RepairDataStore {
    /// Nodes removed by `revision` from `field` under `parent`.
    fn get_nodes(
        &self,
        revision: RevisionTag,
        parent: Option<&UpPath>,
        field: &FieldKey,
        index: u32,
        count: u32,
    ) -> Result<Vec<ProtoNode>>;

    /// The value `revision` overwrote on the node at `path`.
    fn get_value(&self, revision: RevisionTag, path: &UpPath) -> Result<Value>;
}

pub trait RepairDataStoreProvider {
    /// Stop recording; later deltas are ignored until cloned.
    fn freeze(&mut self);

    /// Record the content a delta is about to replace.
    fn apply_delta(&mut self, change: &delta::Root);

    fn create_repair_data(&mut self) -> Box<dyn RepairDataStore>;

    fn clone_provider(&self) -> Box<dyn RepairDataStoreProvider>;
}

/// What a store without data does when asked for content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingRepairData {
    /// Fail with [`Error::MissingRepairData`].
    #[default]
    Fail,
    /// Answer with no nodes and no value.
    Empty,
}

/// A store with no data, used when inversion has nothing better.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRepairDataStore {
    pub policy: MissingRepairData,
}

impl RepairDataStore for NoopRepairDataStore {
    fn get_nodes(
        &self,
        revision: RevisionTag,
        _parent: Option<&UpPath>,
        _field: &FieldKey,
        _index: u32,
        _count: u32,
    ) -> Result<Vec<ProtoNode>> {
        return match self.policy {
            MissingRepairData::Fail => Err(Error::MissingRepairData(revision)),
            MissingRepairData::Empty => Ok(Vec::new()),
        };
    }

    fn get_value(&self, revision: RevisionTag, _path: &UpPath) -> Result<Value> {
        return match self.policy {
            MissingRepairData::Fail => Err(Error::MissingRepairData(revision)),
            MissingRepairData::Empty => Ok(None),
        };
    }
}

/// A provider that records nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRepairDataStoreProvider;

impl RepairDataStoreProvider for NoopRepairDataStoreProvider {
    fn freeze(&mut self) {}

    fn apply_delta(&mut self, _change: &delta::Root) {}

    fn create_repair_data(&mut self) -> Box<dyn RepairDataStore> {
        return Box::new(NoopRepairDataStore::default());
    }

    fn clone_provider(&self) -> Box<dyn RepairDataStoreProvider> {
        return Box::new(NoopRepairDataStoreProvider);
    }
}

/// Positions in the tree that follow edits.
pub trait AnchorSet {
    fn apply_delta(&mut self, change: &delta::Root);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_store_policy() {
        let path = UpPath::root_child("a", 0);
        let revision = RevisionTag::from_u128(3);

        let failing = NoopRepairDataStore::default();
        assert!(matches!(failing.get_value(revision, &path), Err(Error::MissingRepairData(_))));

        let empty = NoopRepairDataStore { policy: MissingRepairData::Empty };
        assert_eq!(empty.get_value(revision, &path).unwrap(), None);
        let nodes = empty.get_nodes(revision, None, &FieldKey::new("a"), 0, 2).unwrap();
        assert!(nodes.is_empty());
    }
}
