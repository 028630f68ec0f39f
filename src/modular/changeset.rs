// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! The modular changeset data model.
//!
//! A [`ModularChangeset`] maps field keys to [`FieldChange`]s. Each field
//! change names the field kind that owns it and carries that kind's payload,
//! which the family never looks inside. Payloads reach nested nodes through
//! [`NodeChangeset`]s, which may in turn carry field changes of their own.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::core::FieldKey;
use crate::core::RevisionInfo;
use crate::core::RevisionTag;
use crate::core::Value;
use crate::error::Error;
use crate::error::Result;

/// An id local to one changeset, used to pair up cross-field effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangesetLocalId(pub u32);

/// The stable name a field kind is registered under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldKindIdentifier(pub &'static str);

impl fmt::Display for FieldKindIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.0);
    }
}

/// A field kind's change payload, erased for storage in the tree.
pub trait FieldPayload: Any + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn eq_payload(&self, other: &dyn FieldPayload) -> bool;
}

impl<T: Any + fmt::Debug + PartialEq> FieldPayload for T {
    fn as_any(&self) -> &dyn Any {
        return self;
    }

    fn eq_payload(&self, other: &dyn FieldPayload) -> bool {
        return other.as_any().downcast_ref::<T>().is_some_and(|other| other == self);
    }
}

/// A shared, immutable field payload.
#[derive(Clone)]
pub struct FieldChangeset(Rc<dyn FieldPayload>);

impl FieldChangeset {
    pub fn new<T: FieldPayload>(payload: T) -> FieldChangeset {
        return FieldChangeset(Rc::new(payload));
    }

    /// Borrow the payload as the kind's concrete type.
    pub fn downcast<T: Any>(&self) -> Result<&T> {
        return (*self.0)
            .as_any()
            .downcast_ref::<T>()
            .ok_or(Error::PayloadMismatch { expected: std::any::type_name::<T>() });
    }

    /// Whether both handles share one payload allocation.
    pub fn same_payload(&self, other: &FieldChangeset) -> bool {
        return std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0));
    }
}

impl PartialEq for FieldChangeset {
    fn eq(&self, other: &FieldChangeset) -> bool {
        return self.same_payload(other) || (*self.0).eq_payload(&*other.0);
    }
}

impl fmt::Debug for FieldChangeset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return fmt::Debug::fmt(&*self.0, f);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldChange {
    pub kind: FieldKindIdentifier,
    pub change: FieldChangeset,
    pub revision: Option<RevisionTag>,
}

pub type FieldChangeMap = BTreeMap<FieldKey, FieldChange>;

/// A change to a node's value.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueChange {
    /// The new value; `None` clears it.
    pub value: Value,
    pub revision: Option<RevisionTag>,
    /// Set on inverses: the revision whose value change this undoes.
    pub revert: Option<RevisionTag>,
}

impl ValueChange {
    pub fn set(value: Value) -> ValueChange {
        return ValueChange { value, revision: None, revert: None };
    }
}

/// Requires the node to hold `value` when the change is applied.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueConstraint {
    pub value: Value,
    pub violated: bool,
}

/// Changes to one node: its value and its fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeChangeset {
    pub value_change: Option<ValueChange>,
    pub field_changes: Option<FieldChangeMap>,
    pub value_constraint: Option<ValueConstraint>,
}

impl NodeChangeset {
    pub fn is_empty(&self) -> bool {
        return self.value_change.is_none() && self.field_changes.is_none() && self.value_constraint.is_none();
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModularChangeset {
    pub field_changes: FieldChangeMap,
    /// Revisions composed into this changeset, in application order.
    pub revisions: Option<Vec<RevisionInfo>>,
    pub max_id: Option<ChangesetLocalId>,
    /// Violated value constraints anywhere in the changeset.
    pub constraint_violation_count: Option<u32>,
}

impl ModularChangeset {
    pub fn empty() -> ModularChangeset {
        return ModularChangeset::default();
    }

    pub fn from_fields(field_changes: FieldChangeMap) -> ModularChangeset {
        return ModularChangeset { field_changes, ..ModularChangeset::default() };
    }

    pub fn is_empty(&self) -> bool {
        return self.field_changes.is_empty();
    }

    pub fn violations(&self) -> u32 {
        return self.constraint_violation_count.unwrap_or(0);
    }
}

/// Hands out changeset-local ids above the highest one already in use.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdAllocator {
    max: Option<ChangesetLocalId>,
}

impl IdAllocator {
    pub fn new(max: Option<ChangesetLocalId>) -> IdAllocator {
        return IdAllocator { max };
    }

    /// Reserve `count` consecutive ids and return the first.
    pub fn allocate(&mut self, count: u32) -> ChangesetLocalId {
        let first = self.max.map_or(0, |max| max.0 + 1);
        if count > 0 {
            self.max = Some(ChangesetLocalId(first + count - 1));
        }
        return ChangesetLocalId(first);
    }

    pub fn max(&self) -> Option<ChangesetLocalId> {
        return self.max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter(u32);

    #[test]
    fn payloads_compare_by_value() {
        let a = FieldChangeset::new(Counter(1));
        let b = FieldChangeset::new(Counter(1));
        let c = FieldChangeset::new(Counter(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.same_payload(&b));
        assert!(a.same_payload(&a.clone()));
    }

    #[test]
    fn downcast_checks_the_payload_type() {
        let payload = FieldChangeset::new(Counter(4));
        assert_eq!(payload.downcast::<Counter>().unwrap().0, 4);
        assert!(matches!(payload.downcast::<String>(), Err(Error::PayloadMismatch { .. })));
    }

    #[test]
    fn id_allocator_continues_after_max() {
        let mut fresh = IdAllocator::default();
        assert_eq!(fresh.allocate(2), ChangesetLocalId(0));
        assert_eq!(fresh.allocate(1), ChangesetLocalId(2));
        assert_eq!(fresh.max(), Some(ChangesetLocalId(2)));

        let mut seeded = IdAllocator::new(Some(ChangesetLocalId(7)));
        assert_eq!(seeded.allocate(0), ChangesetLocalId(8));
        assert_eq!(seeded.allocate(3), ChangesetLocalId(8));
        assert_eq!(seeded.max(), Some(ChangesetLocalId(10)));
    }
}
