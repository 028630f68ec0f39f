// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Test change families and fakes for trellis.
//!
//! The edit manager and the rebasing algorithms are generic over the change
//! family, so most of their behaviour can be checked with a family whose
//! changes are nothing but lists of integers. Each change remembers the
//! context it was made in, which lets a test assert that every change was
//! rebased onto exactly the history its author could not have seen.
//!
//! # Contents
//!
//! - [`TestChange`] and [`TestChangeFamily`]: intention lists with context
//!   checking, plus rebasers that refuse or constrain rebasing.
//! - [`TestAnchorSet`]: records every delta an anchor set is rebased over.
//! - [`MockRepairDataStoreProvider`]: logs the deltas a provider is fed.
//! - [`transfer`]: a modular field kind whose fields talk to each other
//!   through the cross-field table, for exercising amend passes.

pub mod repair;
pub mod test_change;
pub mod transfer;

pub use repair::MockRepairDataStoreProvider;
pub use test_change::{ConstrainedTestChangeRebaser, TestChangeRebaser, UnrebasableTestChangeRebaser};
pub use test_change::{TestAnchorSet, TestChange, TestChangeFamily, as_delta, check_change_list, compose_intentions};
