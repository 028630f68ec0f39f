// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Trellis - converging shared tree edits through sequenced rebasing.
//!
//! Peers exchange edits to a tree-shaped document. A sequencing service puts
//! every edit in a total order; each client keeps that order as its trunk and
//! rebases its own unsequenced edits on top of it, so every replica ends up
//! applying the same history.
//!
//! # Layers
//!
//! - [`core`]: revisions, paths, deltas, the commit graph and the generic
//!   rebasing algorithms that work for any change family.
//! - [`modular`]: the modular changeset family, where each field of the tree
//!   carries a change owned by a pluggable field kind.
//! - [`shared`]: branches and the [`shared::EditManager`] that runs the
//!   sequencing protocol.
//!
//! # Quick Start
//!
//! ```
//! use std::rc::Rc;
//! use trellis::core::{NoopRepairDataStoreProvider, RevisionTag, SessionId, UpPath};
//! use trellis::modular::{ModularChangeFamily, ModularChangeset, ModularEditBuilder};
//! use trellis::shared::EditManager;
//!
//! let family = Rc::new(ModularChangeFamily::generic_only());
//! let mut manager = EditManager::new(
//!     family.clone(),
//!     SessionId::from("alice"),
//!     Box::new(NoopRepairDataStoreProvider),
//!     None,
//! );
//!
//! // Build a local edit and apply it to the local branch.
//! let mut edits: Vec<ModularChangeset> = Vec::new();
//! let mut builder = ModularEditBuilder::new(&family, &mut edits);
//! let path = UpPath::root_child("title", 0);
//! builder.set_value(&path, Some("Hello".into())).unwrap();
//! drop(builder);
//!
//! let revision = RevisionTag::mint();
//! manager.local_branch_mut().apply(edits.remove(0), revision).unwrap();
//! assert_eq!(manager.get_local_changes().len(), 1);
//! ```

pub mod core;
pub mod error;
pub mod modular;
pub mod shared;

pub use error::{Error, Result};
