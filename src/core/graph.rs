// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! The commit graph.
//!
//! Commits point at their parent and are shared by reference between the
//! trunk and every branch built on it. A commit never changes after it is
//! minted, with one exception: trunk eviction cuts the graph by pointing the
//! oldest retained trunk commit at the sentinel. The edit manager only does
//! that once no registered branch can still reach the commits it cuts off.
//!
//! # Traversal
//!
//! - [`find_ancestor`] walks parents until a predicate matches.
//! - [`find_common_ancestor`] walks two chains in lockstep until they meet.
//!
//! Both return the walked paths oldest-first, excluding the ancestor.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::Serialize;

use super::revision::RevisionTag;
use super::revision::SeqNumber;
use super::revision::SessionId;
use super::revision::TaggedChange;

/// A commit as it travels between replicas, without its place in the graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commit<C> {
    pub revision: RevisionTag,
    pub session_id: SessionId,
    pub change: C,
}

/// A commit linked into the graph.
pub struct GraphCommit<C> {
    pub revision: RevisionTag,
    pub session_id: SessionId,
    pub change: C,
    /// Set only on trunk commits.
    sequence_number: Option<SeqNumber>,
    parent: RefCell<Option<Rc<GraphCommit<C>>>>,
}

impl<C> GraphCommit<C> {
    /// A parentless commit, such as the trunk sentinel.
    pub fn root(
        revision: RevisionTag,
        session_id: SessionId,
        change: C,
        sequence_number: Option<SeqNumber>,
    ) -> Rc<GraphCommit<C>> {
        return Rc::new(GraphCommit {
            revision,
            session_id,
            change,
            sequence_number,
            parent: RefCell::new(None),
        });
    }

    pub fn parent(&self) -> Option<Rc<GraphCommit<C>>> {
        return self.parent.borrow().clone();
    }

    pub fn sequence_number(&self) -> Option<SeqNumber> {
        return self.sequence_number;
    }

    /// The commit's change tagged with its revision.
    pub fn tagged(&self) -> TaggedChange<&C> {
        return TaggedChange::new(&self.change, Some(self.revision));
    }

    /// Repoint this commit's parent. Only trunk eviction may call this.
    pub(crate) fn reparent(&self, parent: Option<Rc<GraphCommit<C>>>) {
        *self.parent.borrow_mut() = parent;
    }
}

impl<C: Clone> GraphCommit<C> {
    pub fn to_commit(&self) -> Commit<C> {
        return Commit {
            revision: self.revision,
            session_id: self.session_id.clone(),
            change: self.change.clone(),
        };
    }
}

impl<C> Drop for GraphCommit<C> {
    fn drop(&mut self) {
        // Unlink long chains iteratively so dropping them cannot overflow the stack.
        let mut next = self.parent.get_mut().take();
        while let Some(commit) = next {
            match Rc::try_unwrap(commit) {
                Ok(mut owned) => next = owned.parent.get_mut().take(),
                Err(_) => break,
            }
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for GraphCommit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f
            .debug_struct("GraphCommit")
            .field("revision", &self.revision)
            .field("session_id", &self.session_id)
            .field("sequence_number", &self.sequence_number)
            .field("change", &self.change)
            .finish();
    }
}

/// Mint a branch commit on top of `parent`.
pub fn mint_commit<C>(parent: &Rc<GraphCommit<C>>, commit: Commit<C>) -> Rc<GraphCommit<C>> {
    return Rc::new(GraphCommit {
        revision: commit.revision,
        session_id: commit.session_id,
        change: commit.change,
        sequence_number: None,
        parent: RefCell::new(Some(parent.clone())),
    });
}

/// Mint a trunk commit on top of `parent`.
pub fn mint_sequenced<C>(
    parent: &Rc<GraphCommit<C>>,
    commit: Commit<C>,
    sequence_number: SeqNumber,
) -> Rc<GraphCommit<C>> {
    return Rc::new(GraphCommit {
        revision: commit.revision,
        session_id: commit.session_id,
        change: commit.change,
        sequence_number: Some(sequence_number),
        parent: RefCell::new(Some(parent.clone())),
    });
}

/// Re-mint `commits` (oldest first) as a chain on top of `base`.
pub fn mint_chain<C: Clone>(base: &Rc<GraphCommit<C>>, commits: &[Rc<GraphCommit<C>>]) -> Rc<GraphCommit<C>> {
    let mut head = base.clone();
    for commit in commits {
        head = mint_commit(&head, commit.to_commit());
    }
    return head;
}

/// Walk from `head` towards the root until `predicate` matches.
///
/// Returns the matching commit and the commits after it up to and including
/// `head`, oldest first.
pub fn find_ancestor<C>(
    head: &Rc<GraphCommit<C>>,
    mut predicate: impl FnMut(&GraphCommit<C>) -> bool,
) -> Option<(Rc<GraphCommit<C>>, Vec<Rc<GraphCommit<C>>>)> {
    let mut path = Vec::new();
    let mut commit = head.clone();
    loop {
        if predicate(&commit) {
            path.reverse();
            return Some((commit, path));
        }
        let parent = commit.parent()?;
        path.push(commit);
        commit = parent;
    }
}

/// The meeting point of two chains.
pub struct CommonAncestor<C> {
    pub ancestor: Rc<GraphCommit<C>>,
    /// Commits after the ancestor up to the first head, oldest first.
    pub path_a: Vec<Rc<GraphCommit<C>>>,
    /// Commits after the ancestor up to the second head, oldest first.
    pub path_b: Vec<Rc<GraphCommit<C>>>,
}

/// Find the most recent commit shared by the chains of `a` and `b`.
///
/// Returns `None` when the chains end at different roots.
pub fn find_common_ancestor<C>(
    a: &Rc<GraphCommit<C>>,
    b: &Rc<GraphCommit<C>>,
) -> Option<CommonAncestor<C>> {
    if Rc::ptr_eq(a, b) {
        return Some(CommonAncestor { ancestor: a.clone(), path_a: Vec::new(), path_b: Vec::new() });
    }

    // Commit address -> position in the matching path.
    let mut reached_a: FxHashMap<*const GraphCommit<C>, usize> = FxHashMap::default();
    let mut reached_b: FxHashMap<*const GraphCommit<C>, usize> = FxHashMap::default();
    let mut path_a = Vec::new();
    let mut path_b = Vec::new();
    let mut cursor_a = Some(a.clone());
    let mut cursor_b = Some(b.clone());

    while cursor_a.is_some() || cursor_b.is_some() {
        if let Some(commit) = cursor_a.take() {
            if let Some(&index) = reached_b.get(&Rc::as_ptr(&commit)) {
                path_b.truncate(index);
                return Some(meet(commit, path_a, path_b));
            }
            reached_a.insert(Rc::as_ptr(&commit), path_a.len());
            cursor_a = commit.parent();
            path_a.push(commit);
        }
        if let Some(commit) = cursor_b.take() {
            if let Some(&index) = reached_a.get(&Rc::as_ptr(&commit)) {
                path_a.truncate(index);
                return Some(meet(commit, path_a, path_b));
            }
            reached_b.insert(Rc::as_ptr(&commit), path_b.len());
            cursor_b = commit.parent();
            path_b.push(commit);
        }
    }
    return None;
}

fn meet<C>(
    ancestor: Rc<GraphCommit<C>>,
    mut path_a: Vec<Rc<GraphCommit<C>>>,
    mut path_b: Vec<Rc<GraphCommit<C>>>,
) -> CommonAncestor<C> {
    path_a.reverse();
    path_b.reverse();
    return CommonAncestor { ancestor, path_a, path_b };
}
