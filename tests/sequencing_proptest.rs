// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Property-based tests for sequencing.
//!
//! A handful of clients edit concurrently while a sequencer orders their
//! edits and broadcasts each one to everybody. Whatever the interleaving,
//! every client must end up with the same trunk, and each client's local
//! branch must show the trunk followed by its own unsequenced edits.

use std::collections::VecDeque;
use std::rc::Rc;

use proptest::prelude::*;
use trellis::core::Commit;
use trellis::core::NoopRepairDataStoreProvider;
use trellis::core::RevisionTag;
use trellis::core::SeqNumber;
use trellis::core::SessionId;
use trellis::core::TaggedChange;
use trellis::shared::EditManager;
use trellis_testkit::TestChange;
use trellis_testkit::TestChangeFamily;
use trellis_testkit::check_change_list;

const CLIENTS: usize = 3;

// =============================================================================
// Test helpers
// =============================================================================

#[derive(Clone, Debug)]
enum Op {
    /// A client makes a local edit and sends it to the sequencer.
    Edit { client: usize },
    /// The sequencer orders the oldest edit in flight and broadcasts it.
    Deliver,
    /// Every client learns the newest minimum sequence number.
    Advance,
}

fn arbitrary_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..CLIENTS).prop_map(|client| Op::Edit { client }),
        4 => Just(Op::Deliver),
        1 => Just(Op::Advance),
    ]
}

struct InFlight {
    client: usize,
    intention: i64,
    change: TestChange,
    reference: i64,
}

struct Client {
    manager: EditManager<TestChangeFamily>,
    session: SessionId,
    /// Intentions of this client's edits not yet delivered, oldest first.
    pending: VecDeque<i64>,
    /// Reference of the oldest edit in the current run of pending edits.
    /// Later edits in the run build on every edit before them, so peers
    /// need the trunk from here on until the run is fully delivered.
    run_reference: i64,
}

struct Network {
    clients: Vec<Client>,
    in_flight: VecDeque<InFlight>,
    trunk: Vec<i64>,
    next_intention: i64,
    evicted: bool,
}

fn revision(intention: i64) -> RevisionTag {
    return RevisionTag::from_u128(intention as u128 + 1);
}

impl Network {
    fn new() -> Network {
        let family = Rc::new(TestChangeFamily::default());
        let clients = (0..CLIENTS)
            .map(|index| {
                let session = SessionId(format!("client-{index}"));
                let manager =
                    EditManager::new(family.clone(), session.clone(), Box::new(NoopRepairDataStoreProvider), None);
                Client { manager, session, pending: VecDeque::new(), run_reference: 0 }
            })
            .collect();
        return Network { clients, in_flight: VecDeque::new(), trunk: Vec::new(), next_intention: 1, evicted: false };
    }

    fn known_to(&self, client: usize) -> Vec<i64> {
        let mut known = self.trunk.clone();
        known.extend(self.clients[client].pending.iter().copied());
        return known;
    }

    fn run(&mut self, op: &Op) -> trellis::Result<()> {
        match op {
            Op::Edit { client } => {
                let intention = self.next_intention;
                self.next_intention += 1;
                let change = TestChange::mint(&self.known_to(*client), &[intention]);
                let reference = self.trunk.len() as i64;
                let owner = &mut self.clients[*client];
                owner.manager.local_branch_mut().apply(change.clone(), revision(intention))?;
                if owner.pending.is_empty() {
                    owner.run_reference = reference;
                }
                owner.pending.push_back(intention);
                self.in_flight.push_back(InFlight { client: *client, intention, change, reference });
            }
            Op::Deliver => {
                let Some(edit) = self.in_flight.pop_front() else {
                    return Ok(());
                };
                let seq = SeqNumber(self.trunk.len() as i64 + 1);
                let commit = Commit {
                    revision: revision(edit.intention),
                    session_id: self.clients[edit.client].session.clone(),
                    change: edit.change,
                };
                for (index, client) in self.clients.iter_mut().enumerate() {
                    let delta = client.manager.add_sequenced_change(commit.clone(), seq, SeqNumber(edit.reference))?;
                    if index == edit.client {
                        assert_eq!(client.pending.pop_front(), Some(edit.intention));
                        assert!(delta.is_empty());
                    }
                }
                self.trunk.push(edit.intention);
            }
            Op::Advance => {
                let oldest_run = self
                    .clients
                    .iter()
                    .filter(|client| !client.pending.is_empty())
                    .map(|client| client.run_reference)
                    .min();
                let minimum = oldest_run.unwrap_or(self.trunk.len() as i64);
                if minimum <= 0 {
                    return Ok(());
                }
                for client in &mut self.clients {
                    client.manager.advance_minimum_sequence_number(SeqNumber(minimum))?;
                }
                self.evicted = true;
            }
        }
        self.check();
        return Ok(());
    }

    fn check(&self) {
        let first: Vec<TestChange> =
            self.clients[0].manager.get_trunk().iter().map(|commit| commit.change.clone()).collect();
        for (index, client) in self.clients.iter().enumerate() {
            let trunk: Vec<TestChange> =
                client.manager.get_trunk().iter().map(|commit| commit.change.clone()).collect();
            assert_eq!(trunk, first, "client {index} disagrees on the trunk");

            let local = client.manager.get_local_changes();
            assert_eq!(local.len(), client.pending.len());

            let known = self.known_to(index);
            if self.evicted {
                // Only the head is guaranteed to survive eviction.
                let head = &client.manager.local_branch().head().change;
                let view = match head {
                    TestChange::Empty => Vec::new(),
                    TestChange::Change { output_context, .. } => output_context.clone(),
                };
                assert_eq!(view, known, "client {index} sees the wrong document");
            } else {
                let mut all = trunk;
                all.extend(local);
                check_change_list(&all, &known);
            }
        }
    }
}

// =============================================================================
// Convergence
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn clients_converge(ops in prop::collection::vec(arbitrary_op(), 1..40)) {
        let mut network = Network::new();
        for op in &ops {
            network.run(op).unwrap();
        }
        while !network.in_flight.is_empty() {
            network.run(&Op::Deliver).unwrap();
        }
        for client in &network.clients {
            prop_assert!(client.manager.get_local_changes().is_empty());
        }
    }
}

// =============================================================================
// Change Laws
// =============================================================================

fn arbitrary_intentions() -> impl Strategy<Value = Vec<i64>> {
    return prop::collection::vec(1..50i64, 0..6);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Rebasing over a change and then over its inverse gets back to the start.
    #[test]
    fn rebase_over_inverse_round_trips(
        context in arbitrary_intentions(),
        ours in arbitrary_intentions(),
        theirs in arbitrary_intentions()
    ) {
        let change = TestChange::mint(&context, &ours);
        let over = TestChange::mint(&context, &theirs);
        let there = change.rebase(&over).unwrap();
        let back = there.rebase(&over.invert()).unwrap();
        prop_assert_eq!(back.intentions(), change.intentions());
    }

    /// Composing a change with its inverse has no net effect.
    #[test]
    fn compose_with_inverse_cancels(context in arbitrary_intentions(), ours in arbitrary_intentions()) {
        let change = TestChange::mint(&context, &ours);
        let inverse = change.invert();
        let inputs = [TaggedChange::anonymous(&change), TaggedChange::anonymous(&inverse)];
        let composed = TestChange::compose(&inputs).unwrap();
        prop_assert!(composed.intentions().is_empty());
    }
}
