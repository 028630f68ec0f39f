// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! The edit manager runs the sequencing protocol for one client.
//!
//! It keeps three views of history:
//!
//! - The trunk: every sequenced commit, in sequence order, on top of a
//!   sentinel base commit.
//! - One branch per peer session, holding that peer's local history as of
//!   its latest sequenced commit.
//! - The local branch: this client's unsequenced commits, always kept on
//!   top of the trunk head.
//!
//! Sequenced commits from peers are rebased onto the trunk before they are
//! appended to it; the local branch is then rebased onto the new head, so
//! a reader of the local branch sees its own pending edits undone, the peer
//! edit applied and the pending edits redone. Acknowledgements of local
//! commits move the oldest pending commit to the trunk unchanged.
//!
//! # Eviction
//!
//! Trunk commits older than both the minimum sequence number and the base
//! of every registered fork are cut from the trunk by repointing the oldest
//! retained commit at the sentinel.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::debug;

use super::branch::Branch;
use super::branch::BranchRegistry;
use super::summary::SequencedCommit;
use super::summary::SummaryData;
use super::summary::SummarySessionBranch;
use crate::core::AnchorSet;
use crate::core::ChangeFamily;
use crate::core::Commit;
use crate::core::GraphCommit;
use crate::core::RepairDataStoreProvider;
use crate::core::RevisionTag;
use crate::core::SeqNumber;
use crate::core::SessionId;
use crate::core::delta;
use crate::core::find_ancestor;
use crate::core::find_common_ancestor;
use crate::core::mint_chain;
use crate::core::mint_commit;
use crate::core::mint_sequenced;
use crate::core::rebase_branch;
use crate::core::rebase_change;
use crate::error::Error;
use crate::error::Result;

type TrunkHeadListener<C> = Box<dyn FnMut(&Rc<GraphCommit<C>>)>;

pub struct EditManager<F: ChangeFamily> {
    family: Rc<F>,
    local_session_id: SessionId,
    trunk_base: Rc<GraphCommit<F::Change>>,
    trunk: Rc<GraphCommit<F::Change>>,
    sequence_map: BTreeMap<SeqNumber, Rc<GraphCommit<F::Change>>>,
    last_sequence_number: Option<SeqNumber>,
    /// Each peer's local history as of its latest sequenced commit.
    peer_local_branches: BTreeMap<SessionId, Rc<GraphCommit<F::Change>>>,
    local_branch: Branch<F>,
    registry: Rc<RefCell<BranchRegistry>>,
    minimum_sequence_number: SeqNumber,
    repair_provider: Box<dyn RepairDataStoreProvider>,
    trunk_head_listeners: Vec<TrunkHeadListener<F::Change>>,
}

impl<F> EditManager<F>
where
    F: ChangeFamily,
    F::Change: Default,
{
    /// `anchors`, if given, follow every change to the local branch.
    pub fn new(
        family: Rc<F>,
        local_session_id: SessionId,
        repair_provider: Box<dyn RepairDataStoreProvider>,
        anchors: Option<Rc<RefCell<dyn AnchorSet>>>,
    ) -> EditManager<F> {
        let trunk_base = GraphCommit::root(
            RevisionTag::NULL,
            SessionId::from(""),
            F::Change::default(),
            Some(SeqNumber::MIN),
        );
        let registry = Rc::new(RefCell::new(BranchRegistry::default()));
        let mut local_branch = Branch::new(trunk_base.clone(), family.clone(), local_session_id.clone(), anchors);
        // Only forks are registered: the local branch always sits on the
        // trunk head, which eviction never cuts.
        local_branch.attach_registry(registry.clone());

        return EditManager {
            family,
            local_session_id,
            trunk: trunk_base.clone(),
            trunk_base,
            sequence_map: BTreeMap::new(),
            last_sequence_number: None,
            peer_local_branches: BTreeMap::new(),
            local_branch,
            registry,
            minimum_sequence_number: SeqNumber(-1),
            repair_provider,
            trunk_head_listeners: Vec::new(),
        };
    }
}

impl<F: ChangeFamily> EditManager<F> {
    pub fn family(&self) -> &Rc<F> {
        return &self.family;
    }

    pub fn local_session_id(&self) -> &SessionId {
        return &self.local_session_id;
    }

    pub fn local_branch(&self) -> &Branch<F> {
        return &self.local_branch;
    }

    pub fn local_branch_mut(&mut self) -> &mut Branch<F> {
        self.trim_released();
        return &mut self.local_branch;
    }

    pub fn trunk_head(&self) -> &Rc<GraphCommit<F::Change>> {
        return &self.trunk;
    }

    pub fn minimum_sequence_number(&self) -> SeqNumber {
        return self.minimum_sequence_number;
    }

    /// Call `listener` with the new head whenever a commit joins the trunk.
    pub fn on_new_trunk_head(&mut self, listener: impl FnMut(&Rc<GraphCommit<F::Change>>) + 'static) {
        self.trunk_head_listeners.push(Box::new(listener));
    }

    /// Trunk commits after the sentinel, oldest first.
    pub fn get_trunk(&self) -> Vec<Rc<GraphCommit<F::Change>>> {
        return path_from_base(&self.trunk, &self.trunk_base);
    }

    /// Pending local commits, oldest first.
    pub fn get_local_commits(&self) -> Vec<Rc<GraphCommit<F::Change>>> {
        return path_from_base(self.local_branch.head(), &self.trunk);
    }

    pub fn get_local_changes(&self) -> Vec<F::Change> {
        return self.get_local_commits().iter().map(|commit| commit.change.clone()).collect();
    }

    /// The local commit with `revision` and the commits after it.
    pub fn find_local_commit(
        &self,
        revision: RevisionTag,
    ) -> Result<(Rc<GraphCommit<F::Change>>, Vec<Rc<GraphCommit<F::Change>>>)> {
        return find_ancestor(self.local_branch.head(), |commit| commit.revision == revision)
            .ok_or(Error::UnknownRevision(revision));
    }

    pub fn is_empty(&self) -> bool {
        return Rc::ptr_eq(&self.trunk, &self.trunk_base)
            && self.peer_local_branches.is_empty()
            && Rc::ptr_eq(self.local_branch.head(), &self.trunk)
            && self.minimum_sequence_number == SeqNumber(-1);
    }

    /// Add a commit the sequencing service ordered at `sequence_number`.
    ///
    /// `reference_sequence_number` is the last sequenced commit its author
    /// had seen. Returns the delta the local branch went through.
    pub fn add_sequenced_change(
        &mut self,
        commit: Commit<F::Change>,
        sequence_number: SeqNumber,
        reference_sequence_number: SeqNumber,
    ) -> Result<delta::Root> {
        self.trim_released();
        if let Some(last) = self.last_sequence_number {
            if sequence_number <= last {
                return Err(Error::SequenceOutOfOrder { last, got: sequence_number });
            }
        }

        if commit.session_id == self.local_session_id {
            debug!(seq = %sequence_number, revision = %commit.revision, "acknowledging local commit");
            let mut pending = self.get_local_commits();
            if pending.is_empty() {
                return Err(Error::NoLocalCommits);
            }
            let oldest = pending.remove(0);
            if oldest.revision != commit.revision {
                return Err(Error::UnexpectedAcknowledgement { expected: oldest.revision, got: commit.revision });
            }
            // Local commits already sit on the trunk head.
            self.push_to_trunk(sequence_number, oldest.to_commit())?;
            let head = mint_chain(&self.trunk, &pending);
            self.local_branch.set_head(head);
            return Ok(delta::empty());
        }

        debug!(
            seq = %sequence_number,
            reference = %reference_sequence_number,
            session = %commit.session_id,
            "adding peer commit"
        );
        let base_in_trunk = self
            .sequence_map
            .range(..=reference_sequence_number)
            .next_back()
            .map(|(_, commit)| commit.clone())
            .unwrap_or_else(|| self.trunk_base.clone());

        let peer_head = self
            .peer_local_branches
            .get(&commit.session_id)
            .cloned()
            .unwrap_or_else(|| base_in_trunk.clone());
        let rebased = rebase_branch(self.family.rebaser(), &peer_head, &base_in_trunk, &self.trunk)?;

        let session_id = commit.session_id.clone();
        if Rc::ptr_eq(&rebased.head, &self.trunk) {
            self.push_to_trunk(sequence_number, commit)?;
            self.peer_local_branches.insert(session_id, self.trunk.clone());
        } else {
            let change = rebase_change(self.family.rebaser(), &commit.change, &rebased.head, &self.trunk)?;
            let trunk_commit = Commit { revision: commit.revision, session_id: session_id.clone(), change };
            self.peer_local_branches.insert(session_id, mint_commit(&rebased.head, commit));
            self.push_to_trunk(sequence_number, trunk_commit)?;
        }

        let trunk = self.trunk.clone();
        return match self.local_branch.rebase_onto(&trunk)? {
            Some(change) => self.family.into_delta(&change),
            None => Ok(delta::empty()),
        };
    }

    /// Raise the minimum sequence number and evict what no one needs.
    pub fn advance_minimum_sequence_number(&mut self, minimum_sequence_number: SeqNumber) -> Result<()> {
        self.trim_released();
        if minimum_sequence_number == self.minimum_sequence_number {
            return Ok(());
        }
        if minimum_sequence_number < self.minimum_sequence_number {
            return Err(Error::MinimumSequenceRegressed {
                current: self.minimum_sequence_number,
                got: minimum_sequence_number,
            });
        }
        self.minimum_sequence_number = minimum_sequence_number;
        self.trim_trunk();
        return Ok(());
    }

    /// Trim again if a dropped fork was holding back eviction.
    fn trim_released(&mut self) {
        let released = self.registry.borrow_mut().take_released();
        if released && self.minimum_sequence_number > SeqNumber(-1) {
            let evicted = self.trim_trunk();
            debug!(evicted, "trimmed after a fork was dropped");
        }
    }

    /// Evict trunk commits below the retention point; returns how many.
    fn trim_trunk(&mut self) -> usize {
        let mut search_key = self.minimum_sequence_number;
        if let Some(base) = self.registry.borrow().min_base() {
            search_key = search_key.min(base);
        }

        let found = self.sequence_map.range(search_key..).next().map(|(seq, commit)| (*seq, commit.clone()));
        let Some((tail_sequence, tail)) = found else {
            let evicted = self.sequence_map.len();
            let pending = self.get_local_commits();
            debug!(evicted, peers = self.peer_local_branches.len(), "collapsing trunk");
            self.trunk = self.trunk_base.clone();
            self.sequence_map.clear();
            self.peer_local_branches.clear();
            let head = mint_chain(&self.trunk, &pending);
            self.local_branch.set_head(head);
            return evicted;
        };

        let already_tail = tail.parent().is_some_and(|parent| Rc::ptr_eq(&parent, &self.trunk_base));
        if already_tail {
            return 0;
        }
        tail.reparent(Some(self.trunk_base.clone()));

        let retained = self.sequence_map.split_off(&tail_sequence);
        let evicted = self.sequence_map.len();
        self.sequence_map = retained;

        // A peer based below the new tail has fallen behind the minimum
        // sequence number, so it will send nothing more on that base.
        let before = self.peer_local_branches.len();
        self.peer_local_branches.retain(|_, head| {
            return find_ancestor(head, |commit| commit.sequence_number().is_some())
                .and_then(|(base, _)| base.sequence_number())
                .is_some_and(|base| base >= tail_sequence);
        });
        debug!(
            evicted,
            tail = %tail_sequence,
            abandoned = before - self.peer_local_branches.len(),
            "trimmed trunk"
        );
        return evicted;
    }

    /// Snapshot the trunk and peer branches.
    ///
    /// Fails while local commits are pending.
    pub fn get_summary_data(&self) -> Result<SummaryData<F::Change>> {
        if !Rc::ptr_eq(self.local_branch.head(), &self.trunk) {
            return Err(Error::LocalChangesPending);
        }

        let mut trunk = Vec::with_capacity(self.sequence_map.len());
        for commit in self.get_trunk() {
            let sequence_number =
                commit.sequence_number().ok_or(Error::Invariant("trunk commit without a sequence number"))?;
            trunk.push(SequencedCommit {
                revision: commit.revision,
                session_id: commit.session_id.clone(),
                change: commit.change.clone(),
                sequence_number,
            });
        }

        let mut branches = BTreeMap::new();
        for (session_id, head) in &self.peer_local_branches {
            let found = find_common_ancestor(head, &self.trunk).ok_or(Error::MissingAncestor)?;
            let commits = found
                .path_a
                .iter()
                .map(|commit| Commit { session_id: session_id.clone(), ..commit.to_commit() })
                .collect();
            branches.insert(session_id.clone(), SummarySessionBranch { base: found.ancestor.revision, commits });
        }
        return Ok(SummaryData { trunk, branches });
    }

    /// Restore a snapshot into a manager that has seen nothing yet.
    pub fn load_summary_data(&mut self, data: &SummaryData<F::Change>) -> Result<()> {
        if !self.is_empty() {
            return Err(Error::NotEmpty);
        }
        for pair in data.trunk.windows(2) {
            if pair[1].sequence_number <= pair[0].sequence_number {
                return Err(Error::SequenceOutOfOrder { last: pair[0].sequence_number, got: pair[1].sequence_number });
            }
        }

        for commit in &data.trunk {
            let next = Commit {
                revision: commit.revision,
                session_id: commit.session_id.clone(),
                change: commit.change.clone(),
            };
            self.trunk = mint_sequenced(&self.trunk, next, commit.sequence_number);
            self.repair_provider.apply_delta(&self.family.into_delta(&self.trunk.change)?);
            self.sequence_map.insert(commit.sequence_number, self.trunk.clone());
            self.last_sequence_number = Some(commit.sequence_number);
        }
        self.local_branch.set_head(self.trunk.clone());

        for (session_id, branch) in &data.branches {
            let (base, _) = find_ancestor(&self.trunk, |commit| commit.revision == branch.base)
                .ok_or(Error::SummaryBaseNotFound(branch.base))?;
            let mut head = base;
            for commit in &branch.commits {
                head = mint_commit(&head, commit.clone());
            }
            self.peer_local_branches.insert(session_id.clone(), head);
        }
        debug!(trunk = data.trunk.len(), peers = data.branches.len(), "loaded summary");
        return Ok(());
    }

    fn push_to_trunk(&mut self, sequence_number: SeqNumber, commit: Commit<F::Change>) -> Result<()> {
        let delta = self.family.into_delta(&commit.change)?;
        self.trunk = mint_sequenced(&self.trunk, commit, sequence_number);
        self.repair_provider.apply_delta(&delta);
        self.sequence_map.insert(sequence_number, self.trunk.clone());
        self.last_sequence_number = Some(sequence_number);
        for listener in &mut self.trunk_head_listeners {
            listener(&self.trunk);
        }
        return Ok(());
    }
}

/// Commits after `base` up to `head`, oldest first.
fn path_from_base<C>(head: &Rc<GraphCommit<C>>, base: &Rc<GraphCommit<C>>) -> Vec<Rc<GraphCommit<C>>> {
    return find_ancestor(head, |commit| std::ptr::eq(commit, Rc::as_ptr(base)))
        .map(|(_, path)| path)
        .unwrap_or_default();
}
