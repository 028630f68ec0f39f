// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Branches: movable heads over the commit graph.
//!
//! A branch owns nothing but its head pointer; commits are shared with the
//! trunk and with every other branch built on them. Observers subscribe to
//! a branch to hear about every append and rebase, synchronously, in the
//! order they happen.
//!
//! Forks of a branch that belongs to an edit manager are registered with
//! the manager's [`BranchRegistry`], keyed by the trunk commit they are
//! based on, so that trunk eviction never cuts a commit a live branch still
//! needs. Dropping a fork untracks it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use tracing::trace;

use crate::core::AnchorSet;
use crate::core::ChangeFamily;
use crate::core::Commit;
use crate::core::GraphCommit;
use crate::core::RevisionTag;
use crate::core::SeqNumber;
use crate::core::SessionId;
use crate::core::find_ancestor;
use crate::core::mint_commit;
use crate::core::rebase_branch;
use crate::error::Result;
use crate::modular::ChangeReceiver;
use crate::modular::ModularChangeFamily;
use crate::modular::ModularChangeset;

/// Identifies a registered branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BranchId(u64);

/// Identifies a change listener on one branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchChangeKind {
    Append,
    Rebase,
}

/// What a listener hears when the head moves.
#[derive(Clone, Debug, PartialEq)]
pub struct BranchChange<C> {
    pub kind: BranchChangeKind,
    /// The net change from the old head to the new one, if any.
    pub change: Option<C>,
}

/// Registered branches by the sequence number of their trunk base.
#[derive(Debug, Default)]
pub struct BranchRegistry {
    next_id: u64,
    bases: BTreeMap<SeqNumber, FxHashSet<BranchId>>,
    by_branch: FxHashMap<BranchId, SeqNumber>,
    /// Set when the oldest base moved up, so more of the trunk may go.
    released: bool,
}

impl BranchRegistry {
    pub fn track(&mut self, base: SeqNumber) -> BranchId {
        let id = BranchId(self.next_id);
        self.next_id += 1;
        self.bases.entry(base).or_default().insert(id);
        self.by_branch.insert(id, base);
        return id;
    }

    pub fn retrack(&mut self, id: BranchId, base: SeqNumber) {
        if self.by_branch.get(&id) == Some(&base) {
            return;
        }
        self.untrack(id);
        self.bases.entry(base).or_default().insert(id);
        self.by_branch.insert(id, base);
    }

    pub fn untrack(&mut self, id: BranchId) {
        let Some(base) = self.by_branch.remove(&id) else {
            return;
        };
        let oldest = self.min_base() == Some(base);
        if let Some(branches) = self.bases.get_mut(&base) {
            branches.remove(&id);
            if branches.is_empty() {
                self.bases.remove(&base);
                self.released |= oldest;
            }
        }
    }

    /// Whether the oldest base moved up since the last call.
    pub fn take_released(&mut self) -> bool {
        return std::mem::take(&mut self.released);
    }

    /// The oldest base of any registered branch.
    pub fn min_base(&self) -> Option<SeqNumber> {
        return self.bases.keys().next().copied();
    }

    pub fn len(&self) -> usize {
        return self.by_branch.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.by_branch.is_empty();
    }
}

/// Sequence number of the trunk commit `head` is built on.
fn trunk_base<C>(head: &Rc<GraphCommit<C>>) -> SeqNumber {
    return find_ancestor(head, |commit| commit.sequence_number().is_some())
        .and_then(|(base, _)| base.sequence_number())
        .unwrap_or(SeqNumber::MIN);
}

type Listener<C> = Box<dyn FnMut(&BranchChange<C>)>;

pub struct Branch<F: ChangeFamily> {
    head: Rc<GraphCommit<F::Change>>,
    family: Rc<F>,
    session_id: SessionId,
    anchors: Option<Rc<RefCell<dyn AnchorSet>>>,
    listeners: Vec<(ListenerId, Listener<F::Change>)>,
    next_listener: u64,
    registry: Option<Rc<RefCell<BranchRegistry>>>,
    /// Set when this branch is itself registered.
    id: Option<BranchId>,
}

impl<F: ChangeFamily> Branch<F> {
    pub fn new(
        head: Rc<GraphCommit<F::Change>>,
        family: Rc<F>,
        session_id: SessionId,
        anchors: Option<Rc<RefCell<dyn AnchorSet>>>,
    ) -> Branch<F> {
        return Branch {
            head,
            family,
            session_id,
            anchors,
            listeners: Vec::new(),
            next_listener: 0,
            registry: None,
            id: None,
        };
    }

    /// Register every future fork of this branch with `registry`.
    pub(crate) fn attach_registry(&mut self, registry: Rc<RefCell<BranchRegistry>>) {
        self.registry = Some(registry);
    }

    pub fn head(&self) -> &Rc<GraphCommit<F::Change>> {
        return &self.head;
    }

    pub fn session_id(&self) -> &SessionId {
        return &self.session_id;
    }

    pub fn family(&self) -> &Rc<F> {
        return &self.family;
    }

    /// Commit `change` on top of the head.
    pub fn apply(&mut self, change: F::Change, revision: RevisionTag) -> Result<()> {
        if let Some(anchors) = &self.anchors {
            self.family.rebase_anchors(&mut *anchors.borrow_mut(), &change)?;
        }
        let commit = Commit { revision, session_id: self.session_id.clone(), change: change.clone() };
        self.head = mint_commit(&self.head, commit);
        self.emit(BranchChange { kind: BranchChangeKind::Append, change: Some(change) });
        return Ok(());
    }

    /// Move the commits made on this branch onto `target`.
    ///
    /// Returns the net change seen by a reader of the old head.
    pub fn rebase_onto(&mut self, target: &Rc<GraphCommit<F::Change>>) -> Result<Option<F::Change>> {
        let rebased = rebase_branch(self.family.rebaser(), &self.head, target, target)?;
        trace!(session = %self.session_id, changed = rebased.change.is_some(), "rebased branch");
        self.head = rebased.head;
        if let (Some(change), Some(anchors)) = (&rebased.change, &self.anchors) {
            self.family.rebase_anchors(&mut *anchors.borrow_mut(), change)?;
        }
        self.emit(BranchChange { kind: BranchChangeKind::Rebase, change: rebased.change.clone() });
        self.retrack();
        return Ok(rebased.change);
    }

    /// Rebase onto the head of `other`.
    pub fn rebase_onto_branch(&mut self, other: &Branch<F>) -> Result<Option<F::Change>> {
        return self.rebase_onto(&other.head.clone());
    }

    /// Point the head at `head` without telling listeners or anchors.
    pub fn set_head(&mut self, head: Rc<GraphCommit<F::Change>>) {
        self.head = head;
        self.retrack();
    }

    /// A new branch at the same head, without listeners or anchors.
    pub fn fork(&self) -> Branch<F> {
        let mut fork = Branch::new(self.head.clone(), self.family.clone(), self.session_id.clone(), None);
        if let Some(registry) = &self.registry {
            fork.id = Some(registry.borrow_mut().track(trunk_base(&self.head)));
            fork.registry = Some(registry.clone());
        }
        return fork;
    }

    pub fn on_change(&mut self, listener: impl FnMut(&BranchChange<F::Change>) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        return id;
    }

    /// Returns whether the listener was subscribed.
    pub fn off_change(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        return self.listeners.len() != before;
    }

    fn emit(&mut self, change: BranchChange<F::Change>) {
        for (_, listener) in &mut self.listeners {
            listener(&change);
        }
    }

    fn retrack(&self) {
        if let (Some(registry), Some(id)) = (&self.registry, self.id) {
            registry.borrow_mut().retrack(id, trunk_base(&self.head));
        }
    }
}

impl<F: ChangeFamily> Drop for Branch<F> {
    fn drop(&mut self) {
        if let (Some(registry), Some(id)) = (&self.registry, self.id) {
            registry.borrow_mut().untrack(id);
        }
    }
}

/// Edits built on a branch are committed under fresh revisions.
impl ChangeReceiver for Branch<ModularChangeFamily> {
    fn receive(&mut self, change: ModularChangeset) -> Result<()> {
        return self.apply(change, RevisionTag::mint());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tracks_oldest_base() {
        let mut registry = BranchRegistry::default();
        let a = registry.track(SeqNumber(4));
        let b = registry.track(SeqNumber(2));
        assert_eq!(registry.min_base(), Some(SeqNumber(2)));

        registry.retrack(b, SeqNumber(7));
        assert_eq!(registry.min_base(), Some(SeqNumber(4)));

        registry.untrack(a);
        registry.untrack(b);
        assert!(registry.is_empty());
        assert_eq!(registry.min_base(), None);
    }

    #[test]
    fn untracking_the_oldest_base_releases() {
        let mut registry = BranchRegistry::default();
        let old = registry.track(SeqNumber(2));
        let shared = registry.track(SeqNumber(2));
        let young = registry.track(SeqNumber(5));
        assert!(!registry.take_released());

        registry.untrack(young);
        assert!(!registry.take_released());

        // Another branch still holds the same base.
        registry.untrack(old);
        assert!(!registry.take_released());

        registry.untrack(shared);
        assert!(registry.take_released());
        assert!(!registry.take_released());
    }
}
