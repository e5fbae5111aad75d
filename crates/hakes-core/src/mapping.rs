//! Bidirectional map between external ids and internal positions.
//!
//! Positions are dense and assigned by the approximate index in insertion
//! order, so the reverse direction is a plain vector. The map always holds
//! exactly one entry per stored vector.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ivf::Position;
use crate::Label;

/// External id ↔ internal position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdMap {
    id_to_pos: FxHashMap<Label, Position>,
    pos_to_id: Vec<Label>,
}

impl IdMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mapped vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pos_to_id.len()
    }

    /// Returns true if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos_to_id.is_empty()
    }

    /// Checks that every id is new and appears once in `ids`.
    ///
    /// Never mutates the map.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` with the first offending id.
    pub fn check_new(&self, ids: &[Label]) -> Result<()> {
        let mut seen = FxHashSet::default();
        seen.reserve(ids.len());
        for &id in ids {
            if self.id_to_pos.contains_key(&id) || !seen.insert(id) {
                return Err(Error::DuplicateId(id));
            }
        }
        Ok(())
    }

    /// Records `ids` at consecutive positions starting at `first`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if `first` is not the next dense position, which
    /// would mean the map and the approximate index diverged.
    pub fn extend(&mut self, first: Position, ids: &[Label]) -> Result<()> {
        if first != self.pos_to_id.len() as u64 {
            return Err(Error::Internal(format!(
                "id map holds {} entries but the next position is {first}",
                self.pos_to_id.len()
            )));
        }
        for (i, &id) in ids.iter().enumerate() {
            self.id_to_pos.insert(id, first + i as u64);
        }
        self.pos_to_id.extend_from_slice(ids);
        Ok(())
    }

    /// Id stored at `position`.
    #[must_use]
    pub fn label(&self, position: Position) -> Option<Label> {
        usize::try_from(position)
            .ok()
            .and_then(|p| self.pos_to_id.get(p).copied())
    }

    /// Position of `id`.
    #[must_use]
    pub fn position(&self, id: Label) -> Option<Position> {
        self.id_to_pos.get(&id).copied()
    }

    /// Ids in position order.
    #[must_use]
    pub fn labels(&self) -> &[Label] {
        &self.pos_to_id
    }

    /// Structural check after deserialization.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedArtifact` if the two directions disagree.
    pub fn validate(&self) -> Result<()> {
        let consistent = self.id_to_pos.len() == self.pos_to_id.len()
            && self
                .pos_to_id
                .iter()
                .enumerate()
                .all(|(pos, id)| self.id_to_pos.get(id) == Some(&(pos as u64)));
        if consistent {
            Ok(())
        } else {
            Err(Error::CorruptedArtifact(format!(
                "id map directions disagree ({} ids, {} positions)",
                self.id_to_pos.len(),
                self.pos_to_id.len()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_and_lookup() {
        let mut map = IdMap::new();
        map.extend(0, &[7, 3, 11]).expect("extend");

        assert_eq!(map.len(), 3);
        assert_eq!(map.label(1), Some(3));
        assert_eq!(map.position(11), Some(2));
        assert_eq!(map.label(3), None);
        map.validate().expect("consistent");
    }

    #[test]
    fn test_check_new_rejects_existing_and_repeated_ids() {
        // Arrange
        let mut map = IdMap::new();
        map.extend(0, &[1, 2]).expect("extend");

        // Act & Assert
        assert!(matches!(map.check_new(&[3, 2]), Err(Error::DuplicateId(2))));
        assert!(matches!(map.check_new(&[4, 5, 4]), Err(Error::DuplicateId(4))));
        assert!(map.check_new(&[3, 4]).is_ok());
        assert_eq!(map.len(), 2, "check_new must not mutate");
    }

    #[test]
    fn test_extend_rejects_gap() {
        let mut map = IdMap::new();
        assert!(matches!(map.extend(5, &[1]), Err(Error::Internal(_))));
        assert!(map.is_empty());
    }
}
