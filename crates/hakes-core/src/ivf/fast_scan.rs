//! IVF-PQ index with packed codes.
//!
//! Every stored vector gets a dense internal position in insertion order.
//! A vector lives in exactly one inverted list; the list stores its
//! position and its PQ code of the residual against the list centroid.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::distance::{DistanceMetric, TopK};
use crate::error::{Error, Result};
use crate::quantizer::{CoarseQuantizer, DistanceTable, FlatCentroids, PqCodebook};

/// Internal position of a stored vector.
pub type Position = u64;

/// One inverted list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct InvertedList {
    positions: Vec<Position>,
    codes: Vec<u8>,
}

/// Approximate index: coarse centroids, PQ codebook and inverted lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfPqFastScan {
    centroids: FlatCentroids,
    codebook: PqCodebook,
    lists: Vec<InvertedList>,
    ntotal: u64,
}

impl IvfPqFastScan {
    /// Creates an empty index.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if centroids and codebook disagree on `dim`.
    pub fn new(centroids: FlatCentroids, codebook: PqCodebook) -> Result<Self> {
        if centroids.dim() != codebook.dim() {
            return Err(Error::InvalidParams(format!(
                "centroids are {}-d but codebook is {}-d",
                centroids.dim(),
                codebook.dim()
            )));
        }
        let lists = vec![InvertedList::default(); centroids.nlist()];
        Ok(Self {
            centroids,
            codebook,
            lists,
            ntotal: 0,
        })
    }

    /// Vector dimension.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.centroids.dim()
    }

    /// Number of inverted lists.
    #[must_use]
    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn ntotal(&self) -> u64 {
        self.ntotal
    }

    /// Coarse centroids.
    #[must_use]
    pub fn centroids(&self) -> &FlatCentroids {
        &self.centroids
    }

    /// PQ codebook.
    #[must_use]
    pub fn codebook(&self) -> &PqCodebook {
        &self.codebook
    }

    /// Size of one inverted list.
    #[must_use]
    pub fn list_len(&self, list: usize) -> usize {
        self.lists.get(list).map_or(0, |l| l.positions.len())
    }

    /// Appends `n` vectors whose lists were already chosen.
    ///
    /// Returns the position of the first appended vector; the rest follow
    /// consecutively.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBatch` if the slices disagree with `n` or an
    /// assignment is out of range. Nothing is appended on error.
    pub fn add_preassigned(&mut self, n: usize, x: &[f32], assign: &[usize]) -> Result<Position> {
        let dim = self.dim();
        if x.len() != n * dim || assign.len() != n {
            return Err(Error::InvalidBatch(format!(
                "add_preassigned got {} floats and {} assignments for {n} vectors of dimension {dim}",
                x.len(),
                assign.len()
            )));
        }
        if let Some(&bad) = assign.iter().find(|&&a| a >= self.nlist()) {
            return Err(Error::InvalidBatch(format!(
                "assignment {bad} is out of range for {} lists",
                self.nlist()
            )));
        }

        let packer = self.codebook.packer();
        let codes: Vec<Vec<u8>> = x
            .par_chunks(dim)
            .zip(assign.par_iter())
            .map(|(v, &list)| {
                let residual = self.centroids.residual(v, list);
                packer.pack(&self.codebook.encode(&residual))
            })
            .collect();

        let first = self.ntotal;
        for (i, (code, &list)) in codes.iter().zip(assign).enumerate() {
            let l = &mut self.lists[list];
            l.positions.push(first + i as u64);
            l.codes.extend_from_slice(code);
        }
        self.ntotal += n as u64;
        Ok(first)
    }

    /// Scans the probed lists with ADC and returns up to `k` positions,
    /// best first, ties broken by position.
    ///
    /// `centroids` and `codebook` are the quantizers the lookup tables are
    /// built from: the index's own, or a compatible query-side pair. Only
    /// positions accepted by `keep` are ranked.
    #[allow(clippy::too_many_arguments)]
    pub fn scan<F>(
        &self,
        query: &[f32],
        probes: &[(usize, f32)],
        centroids: &FlatCentroids,
        codebook: &PqCodebook,
        metric: DistanceMetric,
        k: usize,
        keep: F,
    ) -> Vec<(Position, f32)>
    where
        F: Fn(Position) -> bool,
    {
        let code_size = self.codebook.packer().code_size();
        let mut top = TopK::new(k, metric);

        for &(list, _) in probes {
            let Some(inv) = self.lists.get(list) else {
                continue;
            };
            if inv.positions.is_empty() {
                continue;
            }
            let table = DistanceTable::build(codebook, query, centroids.centroid(list), metric);
            for (&pos, code) in inv.positions.iter().zip(inv.codes.chunks_exact(code_size)) {
                if keep(pos) {
                    top.push(pos, table.distance(code));
                }
            }
        }

        top.into_sorted()
    }

    /// List holding `position`, if stored.
    #[must_use]
    pub fn list_of(&self, position: Position) -> Option<usize> {
        self.lists
            .iter()
            .position(|l| l.positions.binary_search(&position).is_ok())
    }

    /// List of every stored position, indexed by position.
    #[must_use]
    pub fn assignments(&self) -> Vec<usize> {
        let mut out = vec![0; usize::try_from(self.ntotal).unwrap_or(usize::MAX)];
        for (list, inv) in self.lists.iter().enumerate() {
            for &pos in &inv.positions {
                if let Some(slot) = usize::try_from(pos).ok().and_then(|p| out.get_mut(p)) {
                    *slot = list;
                }
            }
        }
        out
    }

    /// Structural check after deserialization.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedArtifact` describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        if self.lists.len() != self.centroids.nlist() || self.centroids.dim() != self.codebook.dim()
        {
            return Err(Error::CorruptedArtifact(
                "approximate index quantizer shapes disagree".to_string(),
            ));
        }
        let code_size = self.codebook.packer().code_size();
        let mut count = 0_u64;
        for (i, l) in self.lists.iter().enumerate() {
            if l.codes.len() != l.positions.len() * code_size {
                return Err(Error::CorruptedArtifact(format!(
                    "inverted list {i} has {} code bytes for {} vectors",
                    l.codes.len(),
                    l.positions.len()
                )));
            }
            if l.positions.iter().any(|&p| p >= self.ntotal) {
                return Err(Error::CorruptedArtifact(format!(
                    "inverted list {i} references a position beyond {}",
                    self.ntotal
                )));
            }
            count += l.positions.len() as u64;
        }
        if count != self.ntotal {
            return Err(Error::CorruptedArtifact(format!(
                "inverted lists hold {count} vectors, header says {}",
                self.ntotal
            )));
        }
        Ok(())
    }
}
