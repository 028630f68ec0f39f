// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Errors raised by the rebaser and the edit manager.
//!
//! Every variant is a contract violation: the caller broke an ordering
//! precondition, a field kind misbehaved, or replicas disagree about history.
//! None of them are retryable, and continuing after one would let the
//! document diverge.

use thiserror::Error;

use crate::core::{RevisionTag, SeqNumber};

#[derive(Debug, Error)]
pub enum Error {
    #[error("sequenced change {got} arrived after {last}")]
    SequenceOutOfOrder { last: SeqNumber, got: SeqNumber },

    #[error("minimum sequence number moved backwards from {current} to {got}")]
    MinimumSequenceRegressed { current: SeqNumber, got: SeqNumber },

    #[error("{operation} needed more than one amend pass")]
    AmendPassExceeded { operation: &'static str },

    #[error("cannot invert a change that is itself an inverse")]
    DoubleInversion,

    #[error("commits do not share an ancestor")]
    MissingAncestor,

    #[error("unknown field kind `{0}`")]
    UnknownFieldKind(String),

    #[error("field changes of kinds `{first}` and `{second}` cannot be merged")]
    FieldKindMismatch { first: String, second: String },

    #[error("summary branch base {0} is not on the trunk")]
    SummaryBaseNotFound(RevisionTag),

    #[error("no local commit is waiting for acknowledgement")]
    NoLocalCommits,

    #[error("acknowledged {got} but the oldest local commit is {expected}")]
    UnexpectedAcknowledgement { expected: RevisionTag, got: RevisionTag },

    #[error("cannot summarize while local changes are pending")]
    LocalChangesPending,

    #[error("summary can only be loaded into an empty edit manager")]
    NotEmpty,

    #[error("revision {0} is not known to this operation")]
    UnknownRevision(RevisionTag),

    #[error("change has no revision to invert against")]
    MissingRevision,

    #[error("no repair data for revision {0}")]
    MissingRepairData(RevisionTag),

    #[error("value can only be restored on an existing node")]
    MissingPath,

    #[error("field change payload is not a `{expected}`")]
    PayloadMismatch { expected: &'static str },

    #[error("rebase rejected: {0}")]
    RebaseRejected(String),

    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
