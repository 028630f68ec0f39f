// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! Revision identity, sequencing numbers and revision metadata.
//!
//! A [`RevisionTag`] names one edit across every replica. Sequenced edits
//! also receive a [`SeqNumber`] from the sequencing service, and every edit
//! remembers the [`SessionId`] that authored it.

use std::fmt;

use rand_core::OsRng;
use rand_core::RngCore;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

/// A globally unique edit identifier, 128 random bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionTag(pub [u8; 16]);

impl RevisionTag {
    /// The revision of the trunk sentinel. Never minted.
    pub const NULL: RevisionTag = RevisionTag([0; 16]);

    /// Mint a fresh random revision.
    pub fn mint() -> RevisionTag {
        let mut bytes = [0u8; 16];
        loop {
            OsRng.fill_bytes(&mut bytes);
            if bytes != [0; 16] {
                return RevisionTag(bytes);
            }
        }
    }

    /// A deterministic revision, handy for tests and fixtures.
    pub fn from_u128(value: u128) -> RevisionTag {
        return RevisionTag(value.to_be_bytes());
    }
}

impl fmt::Display for RevisionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        return Ok(());
    }
}

impl fmt::Debug for RevisionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight hex digits are enough to tell revisions apart in logs.
        let full = self.to_string();
        return write!(f, "r{}", &full[24..]);
    }
}

/// A position in the total order assigned by the sequencing service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeqNumber(pub i64);

impl SeqNumber {
    /// Sequence number of the trunk sentinel, below every real commit.
    pub const MIN: SeqNumber = SeqNumber(i64::MIN);
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}", self.0);
    }
}

/// Identifies the session (client connection) that authored a commit.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl From<&str> for SessionId {
    fn from(value: &str) -> SessionId {
        return SessionId(value.to_owned());
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(&self.0);
    }
}

/// A change paired with the revision that produced it.
///
/// Anonymous changes have no revision. A rollback is the inverse of the
/// revision named by `rollback_of`.
#[derive(Clone, Debug, PartialEq)]
pub struct TaggedChange<T> {
    pub revision: Option<RevisionTag>,
    pub rollback_of: Option<RevisionTag>,
    pub change: T,
}

impl<T> TaggedChange<T> {
    pub fn new(change: T, revision: Option<RevisionTag>) -> TaggedChange<T> {
        return TaggedChange { revision, rollback_of: None, change };
    }

    /// A change with no revision.
    pub fn anonymous(change: T) -> TaggedChange<T> {
        return TaggedChange { revision: None, rollback_of: None, change };
    }

    /// The inverse of `of`, tagged with its own revision.
    pub fn rollback(change: T, revision: Option<RevisionTag>, of: RevisionTag) -> TaggedChange<T> {
        return TaggedChange { revision, rollback_of: Some(of), change };
    }

    pub fn as_ref(&self) -> TaggedChange<&T> {
        return TaggedChange {
            revision: self.revision,
            rollback_of: self.rollback_of,
            change: &self.change,
        };
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaggedChange<U> {
        return TaggedChange {
            revision: self.revision,
            rollback_of: self.rollback_of,
            change: f(self.change),
        };
    }
}

/// One entry in a changeset's revision catalogue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RevisionInfo {
    pub revision: RevisionTag,
    pub rollback_of: Option<RevisionTag>,
}

/// Ordered lookup over the revisions taking part in one operation.
///
/// The index of a revision is its position in the composition order, which
/// field kinds use to decide which of two revisions happened first.
#[derive(Clone, Debug, Default)]
pub struct RevisionMetadata {
    infos: Vec<RevisionInfo>,
}

impl RevisionMetadata {
    pub fn new(infos: Vec<RevisionInfo>) -> RevisionMetadata {
        return RevisionMetadata { infos };
    }

    /// Position of `revision` in the catalogue.
    pub fn get_index(&self, revision: RevisionTag) -> Result<usize> {
        return self
            .infos
            .iter()
            .position(|info| info.revision == revision)
            .ok_or(Error::UnknownRevision(revision));
    }

    pub fn get_info(&self, revision: RevisionTag) -> Result<&RevisionInfo> {
        return self
            .infos
            .iter()
            .find(|info| info.revision == revision)
            .ok_or(Error::UnknownRevision(revision));
    }

    pub fn infos(&self) -> &[RevisionInfo] {
        return &self.infos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_orders_revisions() {
        let a = RevisionTag::from_u128(1);
        let b = RevisionTag::from_u128(2);
        let meta = RevisionMetadata::new(vec![
            RevisionInfo { revision: a, rollback_of: None },
            RevisionInfo { revision: b, rollback_of: Some(a) },
        ]);

        assert_eq!(meta.get_index(a).unwrap(), 0);
        assert_eq!(meta.get_index(b).unwrap(), 1);
        assert_eq!(meta.get_info(b).unwrap().rollback_of, Some(a));
    }

    #[test]
    fn metadata_rejects_unknown_revision() {
        let meta = RevisionMetadata::default();
        let missing = RevisionTag::from_u128(9);
        assert!(matches!(meta.get_index(missing), Err(Error::UnknownRevision(r)) if r == missing));
    }

    #[test]
    fn minted_revisions_are_distinct() {
        let a = RevisionTag::mint();
        let b = RevisionTag::mint();
        assert_ne!(a, b);
        assert_ne!(a, RevisionTag::NULL);
    }

    #[test]
    fn revision_display_is_hex() {
        let tag = RevisionTag::from_u128(0xab);
        assert_eq!(tag.to_string(), format!("{:032x}", 0xab));
        assert_eq!(format!("{:?}", tag), "r000000ab");
    }
}
