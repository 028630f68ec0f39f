// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Building blocks shared by every change family.

pub mod delta;
pub mod graph;
pub mod rebase;
pub mod repair;
pub mod revision;
pub mod tree;

pub use graph::{Commit, CommonAncestor, GraphCommit, find_ancestor, find_common_ancestor};
pub use graph::{mint_chain, mint_commit, mint_sequenced};
pub use rebase::{BranchRebase, ChangeFamily, ChangeRebaser, rebase_branch, rebase_change};
pub use repair::{AnchorSet, MissingRepairData, NoopRepairDataStore, NoopRepairDataStoreProvider};
pub use repair::{RepairDataStore, RepairDataStoreProvider};
pub use revision::{RevisionInfo, RevisionMetadata, RevisionTag, SeqNumber, SessionId, TaggedChange};
pub use tree::{FieldKey, FieldUpPath, UpPath, Value};
