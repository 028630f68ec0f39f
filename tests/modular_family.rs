// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Cross-field effects in the modular family.
//!
//! These tests use the transfer kind from the testkit: a receive learns its
//! count from a send that may live in a field processed after it, so every
//! operation has to go back and amend the receiving field exactly once.

use trellis::Error;
use trellis::core::FieldKey;
use trellis::core::FieldUpPath;
use trellis::core::RevisionTag;
use trellis::core::TaggedChange;
use trellis::core::delta::Mark;
use trellis::modular::ChangesetLocalId;
use trellis::modular::FieldChange;
use trellis::modular::FieldChangeMap;
use trellis::modular::FieldChangeset;
use trellis::modular::GenericChange;
use trellis::modular::ModularChangeFamily;
use trellis::modular::ModularChangeset;
use trellis::modular::ModularEditBuilder;
use trellis::modular::ModularOptions;
use trellis::modular::NodeChangeset;
use trellis::modular::ValueChange;
use trellis_testkit::transfer::TRANSFER_FIELD_KIND;
use trellis_testkit::transfer::TransferChangeset;
use trellis_testkit::transfer::TransferEndpoint;
use trellis_testkit::transfer::restless_transfer_field_kind;
use trellis_testkit::transfer::transfer_field_kind;

fn family() -> ModularChangeFamily {
    return ModularChangeFamily::new([transfer_field_kind()], ModularOptions::default());
}

fn restless_family() -> ModularChangeFamily {
    return ModularChangeFamily::new([restless_transfer_field_kind()], ModularOptions::default());
}

fn r(n: u128) -> RevisionTag {
    return RevisionTag::from_u128(n);
}

fn transfer(change: TransferChangeset) -> FieldChange {
    return FieldChange { kind: TRANSFER_FIELD_KIND, change: FieldChangeset::new(change), revision: None };
}

fn fields(entries: Vec<(&str, FieldChange)>) -> FieldChangeMap {
    return entries.into_iter().map(|(key, field)| (FieldKey::new(key), field)).collect();
}

fn changeset(entries: Vec<(&str, FieldChange)>) -> ModularChangeset {
    return ModularChangeset::from_fields(fields(entries));
}

fn node_with(entries: Vec<(&str, FieldChange)>) -> NodeChangeset {
    return NodeChangeset { field_changes: Some(fields(entries)), ..NodeChangeset::default() };
}

/// A transfer field that only edits children in place.
fn parent(children: Vec<(u32, NodeChangeset)>) -> FieldChange {
    let nodes = children.into_iter().map(|(index, node_change)| GenericChange { index, node_change }).collect();
    return transfer(TransferChangeset::editing(nodes));
}

fn payload<'c>(fields: &'c FieldChangeMap, key: &str) -> &'c TransferChangeset {
    return fields[&FieldKey::new(key)].change.downcast::<TransferChangeset>().unwrap();
}

fn child_fields<'c>(fields: &'c FieldChangeMap, key: &str, index: u32) -> &'c FieldChangeMap {
    let nodes = payload(fields, key).children().unwrap();
    let entry = nodes.iter().find(|entry| entry.index == index).unwrap();
    return entry.node_change.field_changes.as_ref().unwrap();
}

// =============================================================================
// Compose
// =============================================================================

/// Field `a` receives what field `b` sends, in the same composition.
fn send_after_receive() -> (ModularChangeset, ModularChangeset) {
    let first = changeset(vec![
        ("a", transfer(TransferChangeset::receiving(Some(r(1)), 0))),
        ("b", transfer(TransferChangeset::default())),
    ]);
    let second = changeset(vec![
        ("a", transfer(TransferChangeset::default())),
        ("b", transfer(TransferChangeset::sending(0, 3))),
    ]);
    return (first, second);
}

#[test]
fn compose_amends_a_receive_from_a_later_field() {
    let (first, second) = send_after_receive();
    let composed = family()
        .compose(&[TaggedChange::new(&first, Some(r(0))), TaggedChange::new(&second, Some(r(1)))])
        .unwrap();

    let a = payload(&composed.field_changes, "a");
    let expected = TransferEndpoint { revision: Some(r(1)), id: ChangesetLocalId(0), count: Some(3) };
    assert_eq!(a.receives, vec![expected]);
    let b = payload(&composed.field_changes, "b");
    assert_eq!(b.sends[0].revision, Some(r(1)));
}

#[test]
fn compose_allows_only_one_amend_pass() {
    // `a` sends 1 that `b` reads; `b` sends 0 that `a` reads first.
    let first = changeset(vec![
        (
            "a",
            transfer(TransferChangeset {
                sends: vec![TransferEndpoint::send(1, 1)],
                receives: vec![TransferEndpoint::receive(Some(r(1)), 0)],
                ..TransferChangeset::default()
            }),
        ),
        ("b", transfer(TransferChangeset::default())),
    ]);
    let second = changeset(vec![
        ("a", transfer(TransferChangeset::default())),
        (
            "b",
            transfer(TransferChangeset {
                sends: vec![TransferEndpoint::send(0, 3)],
                receives: vec![TransferEndpoint::receive(Some(r(0)), 1)],
                ..TransferChangeset::default()
            }),
        ),
    ]);
    let inputs = [TaggedChange::new(&first, Some(r(0))), TaggedChange::new(&second, Some(r(1)))];

    let composed = family().compose(&inputs).unwrap();
    assert_eq!(payload(&composed.field_changes, "a").receives[0].count, Some(3));
    assert_eq!(payload(&composed.field_changes, "b").receives[0].count, Some(1));

    let result = restless_family().compose(&inputs);
    assert!(matches!(result, Err(Error::AmendPassExceeded { operation: "compose" })));
}

// =============================================================================
// Invert
// =============================================================================

#[test]
fn invert_amends_a_send_from_a_later_field() {
    let change = changeset(vec![
        ("a", transfer(TransferChangeset::receiving(None, 0))),
        ("b", transfer(TransferChangeset::sending(0, 5))),
    ]);
    let inverse = family().invert_with_repair(TaggedChange::new(&change, Some(r(1))), false, None).unwrap();

    let a = payload(&inverse.field_changes, "a");
    assert_eq!(a.sends.len(), 1);
    assert_eq!(a.sends[0].count, Some(5));
    assert!(a.receives.is_empty());
    let b = payload(&inverse.field_changes, "b");
    assert_eq!(b.receives[0].count, Some(5));
}

// =============================================================================
// Rebase
// =============================================================================

#[test]
fn rebase_amends_a_top_level_field() {
    let change = changeset(vec![("a", transfer(TransferChangeset::receiving(Some(r(1)), 0)))]);
    let over = changeset(vec![
        ("a", transfer(TransferChangeset::default())),
        ("b", transfer(TransferChangeset::sending(0, 2))),
    ]);
    let rebased = family().rebase(&change, TaggedChange::new(&over, Some(r(1)))).unwrap();

    assert_eq!(rebased.field_changes.len(), 1);
    assert_eq!(payload(&rebased.field_changes, "a").receives[0].count, Some(2));
}

#[test]
fn rebase_amends_a_nested_field_at_its_rebased_location() {
    let change = changeset(vec![(
        "root",
        parent(vec![(0, node_with(vec![("a", transfer(TransferChangeset::receiving(Some(r(1)), 0)))]))]),
    )]);
    let over = changeset(vec![
        ("root", parent(vec![(0, node_with(vec![("a", transfer(TransferChangeset::default()))]))])),
        ("z", transfer(TransferChangeset::sending(0, 2))),
    ]);
    let rebased = family().rebase(&change, TaggedChange::new(&over, Some(r(1)))).unwrap();

    let nested = child_fields(&rebased.field_changes, "root", 0);
    assert_eq!(payload(nested, "a").receives[0].count, Some(2));
    assert!(!rebased.field_changes.contains_key(&FieldKey::new("z")));
}

#[test]
fn rebase_revisits_base_fields_the_change_never_touched() {
    let edited = NodeChangeset {
        value_change: Some(ValueChange::set(Some("x".into()))),
        ..NodeChangeset::default()
    };
    let change = changeset(vec![("root", parent(vec![(1, edited.clone())]))]);
    let over = changeset(vec![
        (
            "root",
            parent(vec![(0, node_with(vec![("a", transfer(TransferChangeset::receiving(Some(r(1)), 0)))]))]),
        ),
        ("z", transfer(TransferChangeset::sending(0, 2))),
    ]);
    let rebased = family().rebase(&change, TaggedChange::new(&over, Some(r(1)))).unwrap();

    assert_eq!(rebased.field_changes.len(), 1);
    let children = payload(&rebased.field_changes, "root").children().unwrap();
    assert_eq!(children, &[GenericChange { index: 1, node_change: edited }]);
}

#[test]
fn rebase_allows_only_one_amend_pass() {
    let change = changeset(vec![("a", transfer(TransferChangeset::receiving(Some(r(1)), 0)))]);
    let over = changeset(vec![
        ("a", transfer(TransferChangeset::sending(1, 1))),
        (
            "z",
            transfer(TransferChangeset {
                sends: vec![TransferEndpoint::send(0, 2)],
                receives: vec![TransferEndpoint::receive(Some(r(1)), 1)],
                ..TransferChangeset::default()
            }),
        ),
    ]);

    let rebased = family().rebase(&change, TaggedChange::new(&over, Some(r(1)))).unwrap();
    assert_eq!(payload(&rebased.field_changes, "a").receives[0].count, Some(2));

    let result = restless_family().rebase(&change, TaggedChange::new(&over, Some(r(1))));
    assert!(matches!(result, Err(Error::AmendPassExceeded { operation: "rebase" })));
}

// =============================================================================
// Deltas and Editing
// =============================================================================

#[test]
fn transfers_become_moves_in_the_delta() {
    let change = changeset(vec![
        ("a", transfer(TransferChangeset::sending(4, 2))),
        (
            "b",
            transfer(TransferChangeset {
                receives: vec![TransferEndpoint { count: Some(2), ..TransferEndpoint::receive(None, 4) }],
                ..TransferChangeset::default()
            }),
        ),
    ]);
    let delta = family().into_delta(&change).unwrap();
    assert_eq!(delta[&FieldKey::new("a")], vec![Mark::MoveOut { count: 2, id: 4 }]);
    assert_eq!(delta[&FieldKey::new("b")], vec![Mark::MoveIn { count: 2, id: 4 }]);
}

#[test]
fn builder_wraps_a_transfer_edit_in_its_ancestors() {
    let family = family();
    let mut edits: Vec<ModularChangeset> = Vec::new();
    let mut builder = ModularEditBuilder::new(&family, &mut edits);
    let parent_path = std::rc::Rc::new(trellis::core::UpPath::root_child("doc", 2));
    let field = FieldUpPath::new(Some(parent_path), "items");
    let id = builder.generate_id(1);
    builder
        .submit_change(&field, TRANSFER_FIELD_KIND, FieldChangeset::new(TransferChangeset::sending(id.0, 1)))
        .unwrap();
    drop(builder);

    let edit = &edits[0];
    assert_eq!(edit.max_id, Some(id));
    let delta = family.into_delta(edit).unwrap();
    let marks = &delta[&FieldKey::new("doc")];
    assert_eq!(marks[0], Mark::Skip(2));
    let Mark::Modify(modify) = &marks[1] else {
        panic!("expected a modify, got {marks:?}");
    };
    let nested = modify.fields.as_ref().unwrap();
    assert_eq!(nested[&FieldKey::new("items")], vec![Mark::MoveOut { count: 1, id: id.0 }]);
}
