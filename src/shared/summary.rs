// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! The state an edit manager persists in summaries.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::Commit;
use crate::core::RevisionTag;
use crate::core::SeqNumber;
use crate::core::SessionId;

/// A trunk commit without its parent link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequencedCommit<C> {
    pub revision: RevisionTag,
    pub session_id: SessionId,
    pub change: C,
    pub sequence_number: SeqNumber,
}

/// A peer's unsequenced commits and the trunk revision they are based on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummarySessionBranch<C> {
    pub base: RevisionTag,
    pub commits: Vec<Commit<C>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryData<C> {
    /// Trunk commits in ascending sequence order.
    pub trunk: Vec<SequencedCommit<C>>,
    pub branches: BTreeMap<SessionId, SummarySessionBranch<C>>,
}
