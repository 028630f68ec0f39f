// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! The rebaser contract and the branch-level rebasing algorithms.
//!
//! A change family supplies three operations over its changes: compose,
//! invert and rebase. Everything the edit manager does to keep branches on
//! top of the trunk is built from those three, in the two functions here.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashSet;
use tracing::trace;

use super::delta;
use super::graph::Commit;
use super::graph::GraphCommit;
use super::graph::find_common_ancestor;
use super::graph::mint_chain;
use super::graph::mint_commit;
use super::repair::AnchorSet;
use super::revision::RevisionTag;
use super::revision::TaggedChange;
use crate::error::Error;
use crate::error::Result;

/// The algebra every change family provides.
///
/// For changes `a` and `b` authored against the same state,
/// `compose([a, rebase(b, a)])` and `compose([b, rebase(a, b)])` have the
/// same effect, and `compose([a, invert(a)])` has no effect.
pub trait ChangeRebaser {
    type Change;

    /// Fold `changes`, applied in order, into one change.
    fn compose(&self, changes: &[TaggedChange<&Self::Change>]) -> Result<Self::Change>;

    /// The change that undoes `change`. Rollbacks undo changes that were
    /// never sequenced and may skip work a user-facing undo would need.
    fn invert(&self, change: TaggedChange<&Self::Change>, is_rollback: bool) -> Result<Self::Change>;

    /// Re-derive `change` so it applies after `over`.
    fn rebase(&self, change: &Self::Change, over: TaggedChange<&Self::Change>) -> Result<Self::Change>;
}

/// A kind of change the edit manager can sequence.
pub trait ChangeFamily {
    type Change: Clone + fmt::Debug;

    fn rebaser(&self) -> &dyn ChangeRebaser<Change = Self::Change>;

    /// The concrete effect of `change` on a tree.
    fn into_delta(&self, change: &Self::Change) -> Result<delta::Root>;

    /// Move `anchors` so they follow `over`.
    fn rebase_anchors(&self, anchors: &mut dyn AnchorSet, over: &Self::Change) -> Result<()> {
        let change = self.into_delta(over)?;
        anchors.apply_delta(&change);
        return Ok(());
    }
}

/// Result of moving a branch onto a new base.
pub struct BranchRebase<C> {
    pub head: Rc<GraphCommit<C>>,
    /// The change that takes a viewer of the old head to the new head, or
    /// `None` when the new head has the same content as the old one.
    pub change: Option<C>,
}

/// Rebase the commits of the branch at `source_head` onto `target_commit`,
/// which must lie on the chain of `target_head`.
///
/// Source commits whose revisions already appear on the target path are
/// not carried over: they have been sequenced, so the target already holds
/// their rebased versions. If the source branch already contains
/// `target_commit`, it is returned unchanged.
pub fn rebase_branch<C: Clone>(
    rebaser: &dyn ChangeRebaser<Change = C>,
    source_head: &Rc<GraphCommit<C>>,
    target_commit: &Rc<GraphCommit<C>>,
    target_head: &Rc<GraphCommit<C>>,
) -> Result<BranchRebase<C>> {
    let found = find_common_ancestor(source_head, target_head).ok_or(Error::MissingAncestor)?;
    let Some(target_index) = found.path_b.iter().position(|c| Rc::ptr_eq(c, target_commit)) else {
        return Ok(BranchRebase { head: source_head.clone(), change: None });
    };

    let mut source_path = &found.path_a[..];
    let mut target_path = &found.path_b[..=target_index];
    let mut new_base = found.ancestor.clone();

    // Commits both sides share by revision need no rebasing at all.
    while let (Some(source), Some(target)) = (source_path.first(), target_path.first()) {
        if source.revision != target.revision {
            break;
        }
        new_base = target.clone();
        source_path = &source_path[1..];
        target_path = &target_path[1..];
    }

    if target_path.is_empty() {
        return Ok(BranchRebase { head: mint_chain(&new_base, source_path), change: None });
    }

    let target_revisions: FxHashSet<RevisionTag> = target_path.iter().map(|c| c.revision).collect();
    let sequenced = source_path
        .iter()
        .take_while(|c| target_revisions.contains(&c.revision))
        .count();
    let (sequenced, pending) = source_path.split_at(sequenced);
    trace!(
        sequenced = sequenced.len(),
        pending = pending.len(),
        over = target_path.len(),
        "rebasing branch"
    );

    // Inverses of the source commits, newest first.
    let mut inverses: VecDeque<TaggedChange<C>> = VecDeque::with_capacity(source_path.len());
    for commit in sequenced {
        inverses.push_front(rollback(rebaser, commit)?);
    }

    let target_changes: Vec<TaggedChange<&C>> = target_path.iter().map(|c| c.tagged()).collect();
    let mut rebased: Vec<TaggedChange<C>> = Vec::with_capacity(pending.len());
    let mut head = target_commit.clone();
    for commit in pending {
        let mut change = commit.change.clone();
        for over in &inverses {
            change = rebaser.rebase(&change, over.as_ref())?;
        }
        for over in &target_changes {
            change = rebaser.rebase(&change, over.clone())?;
        }
        for over in &rebased {
            change = rebaser.rebase(&change, over.as_ref())?;
        }

        inverses.push_front(rollback(rebaser, commit)?);
        head = mint_commit(
            &head,
            Commit { revision: commit.revision, session_id: commit.session_id.clone(), change: change.clone() },
        );
        rebased.push(TaggedChange::new(change, Some(commit.revision)));
    }

    let mut net: Vec<TaggedChange<&C>> = inverses.iter().map(TaggedChange::as_ref).collect();
    net.extend(target_changes.iter().cloned());
    net.extend(rebased.iter().map(TaggedChange::as_ref));
    let change = rebaser.compose(&net)?;
    return Ok(BranchRebase { head, change: Some(change) });
}

/// Rebase a single `change`, authored on `source_head`, onto `target_head`.
///
/// The change is first rebased back over the inverses of the source commits
/// since the common ancestor, then forward over the target commits.
pub fn rebase_change<C: Clone>(
    rebaser: &dyn ChangeRebaser<Change = C>,
    change: &C,
    source_head: &Rc<GraphCommit<C>>,
    target_head: &Rc<GraphCommit<C>>,
) -> Result<C> {
    let found = find_common_ancestor(source_head, target_head).ok_or(Error::MissingAncestor)?;
    let mut result = change.clone();
    for commit in found.path_a.iter().rev() {
        let inverse = rollback(rebaser, commit)?;
        result = rebaser.rebase(&result, inverse.as_ref())?;
    }
    for commit in &found.path_b {
        result = rebaser.rebase(&result, commit.tagged())?;
    }
    return Ok(result);
}

fn rollback<C>(rebaser: &dyn ChangeRebaser<Change = C>, commit: &GraphCommit<C>) -> Result<TaggedChange<C>> {
    let inverse = rebaser.invert(commit.tagged(), true)?;
    return Ok(TaggedChange::rollback(inverse, Some(RevisionTag::mint()), commit.revision));
}
