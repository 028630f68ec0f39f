// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! A change family made of integer intentions.
//!
//! A [`TestChange`] carries the intentions its author had, plus the input
//! context (every intention already applied when it was made) and the
//! output context (the input with its own intentions applied). Composing
//! checks that each change starts where the previous one ended, and
//! rebasing checks that both changes were made in the same context, so a
//! test that drives an edit manager with these changes fails loudly the
//! moment any change is applied out of place.
//!
//! Inverting negates and reverses the intentions; composing an intention
//! with its own negation cancels both.

use serde::Deserialize;
use serde::Serialize;
use trellis::core::AnchorSet;
use trellis::core::ChangeFamily;
use trellis::core::ChangeRebaser;
use trellis::core::FieldKey;
use trellis::core::TaggedChange;
use trellis::core::delta;
use trellis::core::delta::Mark;
use trellis::error::Error;
use trellis::error::Result;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestChange {
    #[default]
    Empty,
    Change {
        input_context: Vec<i64>,
        intentions: Vec<i64>,
        output_context: Vec<i64>,
    },
}

/// Append `intentions` to `base`, cancelling each intention that directly
/// follows its own negation.
pub fn compose_intentions(base: &[i64], intentions: &[i64]) -> Vec<i64> {
    let mut composed = base.to_vec();
    for &intention in intentions {
        if composed.last() == Some(&-intention) {
            composed.pop();
        } else {
            composed.push(intention);
        }
    }
    return composed;
}

impl TestChange {
    /// A change made by someone who had seen `input_context`.
    pub fn mint(input_context: &[i64], intentions: &[i64]) -> TestChange {
        return TestChange::Change {
            input_context: input_context.to_vec(),
            intentions: intentions.to_vec(),
            output_context: compose_intentions(input_context, intentions),
        };
    }

    pub fn intentions(&self) -> &[i64] {
        return match self {
            TestChange::Empty => &[],
            TestChange::Change { intentions, .. } => intentions,
        };
    }

    pub fn is_empty(&self) -> bool {
        return matches!(self, TestChange::Empty);
    }

    pub fn compose(changes: &[TaggedChange<&TestChange>]) -> Result<TestChange> {
        let mut input: Option<&Vec<i64>> = None;
        let mut output: Option<&Vec<i64>> = None;
        let mut intentions = Vec::new();
        for tagged in changes {
            let TestChange::Change { input_context, intentions: added, output_context } = tagged.change else {
                continue;
            };
            if let Some(previous) = output {
                if previous != input_context {
                    return Err(Error::RebaseRejected(format!(
                        "composed change made in {input_context:?} after {previous:?}"
                    )));
                }
            }
            input.get_or_insert(input_context);
            intentions = compose_intentions(&intentions, added);
            output = Some(output_context);
        }

        let (Some(input), Some(output)) = (input, output) else {
            return Ok(TestChange::Empty);
        };
        return Ok(TestChange::Change {
            input_context: input.clone(),
            intentions,
            output_context: output.clone(),
        });
    }

    pub fn invert(&self) -> TestChange {
        return match self {
            TestChange::Empty => TestChange::Empty,
            TestChange::Change { input_context, intentions, output_context } => TestChange::Change {
                input_context: output_context.clone(),
                intentions: intentions.iter().rev().map(|intention| -intention).collect(),
                output_context: input_context.clone(),
            },
        };
    }

    pub fn rebase(&self, over: &TestChange) -> Result<TestChange> {
        let TestChange::Change { input_context, intentions, .. } = self else {
            return Ok(TestChange::Empty);
        };
        let TestChange::Change { input_context: over_input, output_context: over_output, .. } = over else {
            return Ok(self.clone());
        };
        if input_context != over_input {
            return Err(Error::RebaseRejected(format!(
                "rebasing a change made in {input_context:?} over one made in {over_input:?}"
            )));
        }
        return Ok(TestChange::Change {
            input_context: over_output.clone(),
            intentions: intentions.clone(),
            output_context: compose_intentions(over_output, intentions),
        });
    }
}

/// The delta for a change with these intentions: the root value is set to
/// the list, or nothing happens if it is empty.
pub fn as_delta(intentions: &[i64]) -> delta::Root {
    let mut root = delta::empty();
    if intentions.is_empty() {
        return root;
    }
    let modify = delta::Modify {
        set_value: Some(Some(serde_json::Value::from(intentions.to_vec()))),
        fields: None,
    };
    root.insert(FieldKey::new("root"), vec![Mark::Modify(modify)]);
    return root;
}

fn intentions_from_delta(change: &delta::Root) -> Vec<i64> {
    let Some(marks) = change.get(&FieldKey::new("root")) else {
        return Vec::new();
    };
    for mark in marks {
        if let Mark::Modify(delta::Modify { set_value: Some(Some(value)), .. }) = mark {
            return serde_json::from_value(value.clone()).unwrap_or_default();
        }
    }
    return Vec::new();
}

/// Assert that `changes` chain context to context and add up to
/// `intentions`.
pub fn check_change_list(changes: &[TestChange], intentions: &[i64]) {
    let mut seen = Vec::new();
    let mut previous: Option<&Vec<i64>> = None;
    for change in changes {
        let TestChange::Change { input_context, intentions: added, output_context } = change else {
            continue;
        };
        if let Some(previous) = previous {
            assert_eq!(previous, input_context, "change list is not contiguous");
        }
        seen = compose_intentions(&seen, added);
        previous = Some(output_context);
    }
    assert_eq!(seen, intentions);
}

// ============================================================================
// Rebasers
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct TestChangeRebaser;

impl ChangeRebaser for TestChangeRebaser {
    type Change = TestChange;

    fn compose(&self, changes: &[TaggedChange<&TestChange>]) -> Result<TestChange> {
        return TestChange::compose(changes);
    }

    fn invert(&self, change: TaggedChange<&TestChange>, _is_rollback: bool) -> Result<TestChange> {
        return Ok(change.change.invert());
    }

    fn rebase(&self, change: &TestChange, over: TaggedChange<&TestChange>) -> Result<TestChange> {
        return change.rebase(over.change);
    }
}

/// Fails every rebase. Sessions that never need one are unaffected.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnrebasableTestChangeRebaser;

impl ChangeRebaser for UnrebasableTestChangeRebaser {
    type Change = TestChange;

    fn compose(&self, changes: &[TaggedChange<&TestChange>]) -> Result<TestChange> {
        return TestChange::compose(changes);
    }

    fn invert(&self, change: TaggedChange<&TestChange>, _is_rollback: bool) -> Result<TestChange> {
        return Ok(change.change.invert());
    }

    fn rebase(&self, _change: &TestChange, _over: TaggedChange<&TestChange>) -> Result<TestChange> {
        return Err(Error::RebaseRejected("this rebaser never rebases".to_owned()));
    }
}

type RebaseConstraint = Box<dyn Fn(&TestChange, &TaggedChange<&TestChange>) -> bool>;

/// Fails any rebase the constraint rejects.
pub struct ConstrainedTestChangeRebaser {
    constraint: RebaseConstraint,
}

impl ConstrainedTestChangeRebaser {
    pub fn new(constraint: impl Fn(&TestChange, &TaggedChange<&TestChange>) -> bool + 'static) -> Self {
        return ConstrainedTestChangeRebaser { constraint: Box::new(constraint) };
    }
}

impl ChangeRebaser for ConstrainedTestChangeRebaser {
    type Change = TestChange;

    fn compose(&self, changes: &[TaggedChange<&TestChange>]) -> Result<TestChange> {
        return TestChange::compose(changes);
    }

    fn invert(&self, change: TaggedChange<&TestChange>, _is_rollback: bool) -> Result<TestChange> {
        return Ok(change.change.invert());
    }

    fn rebase(&self, change: &TestChange, over: TaggedChange<&TestChange>) -> Result<TestChange> {
        if !(self.constraint)(change, &over) {
            return Err(Error::RebaseRejected(format!("constraint rejected {change:?} over {:?}", over.change)));
        }
        return change.rebase(over.change);
    }
}

// ============================================================================
// Family and anchors
// ============================================================================

pub struct TestChangeFamily {
    rebaser: Box<dyn ChangeRebaser<Change = TestChange>>,
}

impl TestChangeFamily {
    pub fn new(rebaser: impl ChangeRebaser<Change = TestChange> + 'static) -> TestChangeFamily {
        return TestChangeFamily { rebaser: Box::new(rebaser) };
    }
}

impl Default for TestChangeFamily {
    fn default() -> TestChangeFamily {
        return TestChangeFamily::new(TestChangeRebaser);
    }
}

impl ChangeFamily for TestChangeFamily {
    type Change = TestChange;

    fn rebaser(&self) -> &dyn ChangeRebaser<Change = TestChange> {
        return &*self.rebaser;
    }

    fn into_delta(&self, change: &TestChange) -> Result<delta::Root> {
        return Ok(as_delta(change.intentions()));
    }
}

/// An anchor set that remembers what it was moved over.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestAnchorSet {
    /// Every intention the anchors have followed, composed.
    pub intentions: Vec<i64>,
    /// The intentions of each delta, one entry per rebase.
    pub rebases: Vec<Vec<i64>>,
}

impl AnchorSet for TestAnchorSet {
    fn apply_delta(&mut self, change: &delta::Root) {
        let intentions = intentions_from_delta(change);
        self.intentions = compose_intentions(&self.intentions, &intentions);
        self.rebases.push(intentions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intentions_cancel_their_negation() {
        assert_eq!(compose_intentions(&[1, 2], &[-2, -1, 3]), vec![3]);
        assert_eq!(compose_intentions(&[1, 2], &[-1]), vec![1, 2, -1]);
    }

    #[test]
    fn compose_checks_contexts() {
        let a = TestChange::mint(&[], &[1]);
        let b = TestChange::mint(&[1], &[2]);
        let stray = TestChange::mint(&[], &[3]);

        let composed = TestChange::compose(&[TaggedChange::anonymous(&a), TaggedChange::anonymous(&b)]).unwrap();
        assert_eq!(composed, TestChange::mint(&[], &[1, 2]));

        let err = TestChange::compose(&[TaggedChange::anonymous(&a), TaggedChange::anonymous(&stray)]);
        assert!(matches!(err, Err(Error::RebaseRejected(_))));
    }

    #[test]
    fn compose_skips_empty_changes() {
        let a = TestChange::mint(&[], &[1]);
        let empty = TestChange::Empty;
        let composed = TestChange::compose(&[TaggedChange::anonymous(&empty), TaggedChange::anonymous(&a)]).unwrap();
        assert_eq!(composed, a);
        assert_eq!(TestChange::compose(&[]).unwrap(), TestChange::Empty);
    }

    #[test]
    fn invert_then_compose_cancels() {
        let a = TestChange::mint(&[7], &[1, 2]);
        let inverse = a.invert();
        assert_eq!(inverse.intentions(), &[-2, -1]);

        let composed = TestChange::compose(&[TaggedChange::anonymous(&a), TaggedChange::anonymous(&inverse)]).unwrap();
        assert_eq!(composed.intentions(), &[] as &[i64]);
    }

    #[test]
    fn rebase_moves_the_context() {
        let a = TestChange::mint(&[], &[1]);
        let b = TestChange::mint(&[], &[2]);
        let rebased = b.rebase(&a).unwrap();
        assert_eq!(rebased, TestChange::mint(&[1], &[2]));

        let late = TestChange::mint(&[1], &[3]);
        assert!(late.rebase(&b).is_err());
    }

    #[test]
    fn anchors_decode_deltas() {
        let mut anchors = TestAnchorSet::default();
        anchors.apply_delta(&as_delta(&[1, 2]));
        anchors.apply_delta(&as_delta(&[]));
        anchors.apply_delta(&as_delta(&[-2]));
        assert_eq!(anchors.intentions, vec![1]);
        assert_eq!(anchors.rebases, vec![vec![1, 2], vec![], vec![-2]]);
    }
}
