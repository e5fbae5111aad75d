//! Vector store keyed by external id, used for exact rerank.
//!
//! Holds vectors in the original input space (before any transform). By
//! default they are kept at full precision; an index can instead keep
//! them as SQ8 codes, trading a small rerank error for a quarter of the
//! memory. Writing an id that already exists overwrites its vector in
//! place.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::distance::{DistanceMetric, TopK};
use crate::error::{Error, Result};
use crate::quantizer::ScalarQuantizer;
use crate::Label;

/// Row-major vector block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Storage {
    Full(Vec<f32>),
    Sq8 {
        quantizer: ScalarQuantizer,
        codes: Vec<u8>,
    },
}

impl Default for Storage {
    fn default() -> Self {
        Self::Full(Vec::new())
    }
}

/// Flat refine store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatRefineIndex {
    dim: usize,
    ids: Vec<Label>,
    storage: Storage,
    slots: FxHashMap<Label, usize>,
}

impl FlatRefineIndex {
    /// Creates an empty full-precision store for `dim`-dimensional vectors.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ..Self::default()
        }
    }

    /// Creates an empty store that keeps vectors as SQ8 codes of
    /// `quantizer`.
    #[must_use]
    pub fn with_sq8(quantizer: ScalarQuantizer) -> Self {
        Self {
            dim: quantizer.dimension(),
            storage: Storage::Sq8 {
                quantizer,
                codes: Vec::new(),
            },
            ..Self::default()
        }
    }

    /// Vector dimension.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns true if vectors are kept as SQ8 codes.
    #[must_use]
    pub fn is_quantized(&self) -> bool {
        matches!(self.storage, Storage::Sq8 { .. })
    }

    /// Inserts or overwrites `n` vectors.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBatch` if the slices disagree with `n` and `dim`.
    pub fn upsert(&mut self, n: usize, x: &[f32], ids: &[Label]) -> Result<()> {
        if x.len() != n * self.dim || ids.len() != n {
            return Err(Error::InvalidBatch(format!(
                "refine upsert got {} floats and {} ids for {n} vectors of dimension {}",
                x.len(),
                ids.len(),
                self.dim
            )));
        }
        let dim = self.dim;
        for (&id, v) in ids.iter().zip(x.chunks_exact(dim)) {
            let slot = match self.slots.get(&id) {
                Some(&slot) => Some(slot),
                None => {
                    self.slots.insert(id, self.ids.len());
                    self.ids.push(id);
                    None
                }
            };
            match (&mut self.storage, slot) {
                (Storage::Full(vectors), Some(slot)) => {
                    vectors[slot * dim..(slot + 1) * dim].copy_from_slice(v);
                }
                (Storage::Full(vectors), None) => vectors.extend_from_slice(v),
                (Storage::Sq8 { quantizer, codes }, Some(slot)) => {
                    codes[slot * dim..(slot + 1) * dim].copy_from_slice(&quantizer.encode(v));
                }
                (Storage::Sq8 { quantizer, codes }, None) => {
                    codes.extend_from_slice(&quantizer.encode(v));
                }
            }
        }
        Ok(())
    }

    /// Vector stored under `id`, decoded if the store is quantized.
    #[must_use]
    pub fn reconstruct(&self, id: Label) -> Option<Vec<f32>> {
        let &slot = self.slots.get(&id)?;
        let range = slot * self.dim..(slot + 1) * self.dim;
        Some(match &self.storage {
            Storage::Full(vectors) => vectors[range].to_vec(),
            Storage::Sq8 { quantizer, codes } => quantizer.decode(&codes[range]),
        })
    }

    /// Returns true if `id` is stored.
    #[must_use]
    pub fn contains(&self, id: Label) -> bool {
        self.slots.contains_key(&id)
    }

    fn score(&self, query: &[f32], slot: usize, metric: DistanceMetric) -> f32 {
        let range = slot * self.dim..(slot + 1) * self.dim;
        match &self.storage {
            Storage::Full(vectors) => metric.calculate(query, &vectors[range]),
            Storage::Sq8 { quantizer, codes } => match metric {
                DistanceMetric::L2 => quantizer.l2_asymmetric(query, &codes[range]),
                DistanceMetric::InnerProduct => quantizer.ip_asymmetric(query, &codes[range]),
            },
        }
    }

    /// Score between `query` and the stored vector of `id`.
    ///
    /// Exact for a full-precision store; against the decoded codes for an
    /// SQ8 store.
    #[must_use]
    pub fn distance(&self, query: &[f32], id: Label, metric: DistanceMetric) -> Option<f32> {
        self.slots
            .get(&id)
            .map(|&slot| self.score(query, slot, metric))
    }

    /// Exhaustive best-`k` search over ids accepted by `keep`.
    pub fn search<F>(&self, query: &[f32], k: usize, metric: DistanceMetric, keep: F) -> Vec<(Label, f32)>
    where
        F: Fn(Label) -> bool,
    {
        let mut top = TopK::new(k, metric);
        for (slot, &id) in self.ids.iter().enumerate() {
            if keep(id) {
                top.push(id, self.score(query, slot, metric));
            }
        }
        top.into_sorted()
    }

    /// Structural check after deserialization.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedArtifact` if the id table and vector block disagree.
    pub fn validate(&self) -> Result<()> {
        let (stored, block_ok) = match &self.storage {
            Storage::Full(vectors) => (vectors.len(), true),
            Storage::Sq8 { quantizer, codes } => (codes.len(), quantizer.dimension() == self.dim),
        };
        let consistent = block_ok
            && stored == self.ids.len() * self.dim
            && self.slots.len() == self.ids.len()
            && self
                .ids
                .iter()
                .enumerate()
                .all(|(slot, id)| self.slots.get(id) == Some(&slot));
        if consistent {
            Ok(())
        } else {
            Err(Error::CorruptedArtifact(format!(
                "refine index holds {} ids, {} slots and {stored} values of dimension {}",
                self.ids.len(),
                self.slots.len(),
                self.dim
            )))
        }
    }
}
