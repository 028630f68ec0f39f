// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Branches and the edit manager.

pub mod branch;
pub mod edit_manager;
pub mod summary;

pub use branch::{Branch, BranchChange, BranchChangeKind, BranchId, BranchRegistry, ListenerId};
pub use edit_manager::EditManager;
pub use summary::{SequencedCommit, SummaryData, SummarySessionBranch};
