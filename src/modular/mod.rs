// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! The modular change family: per-field changes dispatched to field kinds.

pub mod builder;
pub mod changeset;
pub mod cross_field;
pub mod family;
pub mod field_kind;
pub mod generic;

pub use builder::{ChangeReceiver, EditDescription, ModularEditBuilder, build_change_map};
pub use changeset::{ChangesetLocalId, FieldChange, FieldChangeMap, FieldChangeset, FieldKindIdentifier};
pub use changeset::{FieldPayload, IdAllocator, ModularChangeset, NodeChangeset, ValueChange, ValueConstraint};
pub use cross_field::{CrossFieldKey, CrossFieldManager, CrossFieldTarget, CrossFieldValue};
pub use family::{ModularChangeFamily, ModularOptions};
pub use field_kind::{ComposeContext, DeltaFromChild, FieldChangeHandler, FieldKind, InvertContext, RebaseContext};
pub use generic::{GENERIC_FIELD_KIND, GenericChange, GenericChangeHandler, GenericChangeset};
pub use generic::{empty_generic, generic_field_kind};
