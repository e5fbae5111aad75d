//! Tombstones for deleted ids.
//!
//! Deletion never rewrites stored data: ids are marked here and filtered
//! out by search and rerank. Ids are stored as their `u64` bit pattern so
//! negative ids round-trip.

use roaring::RoaringTreemap;
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::Label;

/// Set of deleted ids. Not synchronized; lives inside the index lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagChecker {
    deleted: RoaringTreemap,
}

#[inline]
fn key(id: Label) -> u64 {
    id as u64
}

impl TagChecker {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks every id in `ids` as deleted. Marking twice is a no-op.
    pub fn set(&mut self, ids: &[Label]) {
        for &id in ids {
            self.deleted.insert(key(id));
        }
    }

    /// Returns true if `id` is deleted.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: Label) -> bool {
        self.deleted.contains(key(id))
    }

    /// Number of deleted ids.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.deleted.len()
    }

    /// Returns true if nothing is deleted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
    }

    /// Writes the set in the roaring portable format.
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        self.deleted.serialize_into(writer)?;
        Ok(())
    }

    /// Reads a set written by [`write_to`](Self::write_to).
    ///
    /// # Errors
    ///
    /// Returns `CorruptedArtifact` if the bytes are not a valid set.
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        RoaringTreemap::deserialize_from(reader)
            .map(|deleted| Self { deleted })
            .map_err(|e| Error::CorruptedArtifact(format!("deletion set: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_negative_ids_are_distinct() {
        let mut tags = TagChecker::new();
        tags.set(&[-5, 5]);
        assert!(tags.contains(-5));
        assert!(tags.contains(5));
        assert!(!tags.contains(-1));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_roaring_roundtrip() {
        let mut tags = TagChecker::new();
        tags.set(&[1, 1 << 40, -3]);

        let mut buf = Vec::new();
        tags.write_to(&mut buf).expect("write");
        let back = TagChecker::read_from(buf.as_slice()).expect("read");

        assert_eq!(back, tags);
    }

    #[test]
    fn test_read_rejects_garbage() {
        let garbage = [0xff_u8; 3];
        assert!(matches!(
            TagChecker::read_from(&garbage[..]),
            Err(Error::CorruptedArtifact(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_set_is_idempotent(ids in prop::collection::vec(any::<i64>(), 0..64)) {
            let mut once = TagChecker::new();
            once.set(&ids);
            let mut twice = once.clone();
            twice.set(&ids);

            prop_assert_eq!(&once, &twice);
            for id in &ids {
                prop_assert!(once.contains(*id));
            }
        }
    }
}
