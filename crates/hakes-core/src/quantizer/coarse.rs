//! Coarse quantizers: map a vector to one of `nlist` inverted lists.
//!
//! Assignment always uses squared L2 so that residuals are as small as
//! possible. Probing ranks lists under the search metric.

use serde::{Deserialize, Serialize};

use super::scalar::ScalarQuantizer;
use crate::distance::{DistanceMetric, TopK};
use crate::error::{Error, Result};
use crate::kmeans;

/// First-level partitioning of the transformed space.
pub trait CoarseQuantizer: Send + Sync {
    /// Dimension of the vectors this quantizer partitions.
    fn dim(&self) -> usize;

    /// Number of inverted lists.
    fn nlist(&self) -> usize;

    /// Scores `x` against centroid `list` under `metric`.
    fn score(&self, x: &[f32], list: usize, metric: DistanceMetric) -> f32;

    /// List a vector is inserted into.
    fn assign(&self, x: &[f32]) -> usize {
        self.probe(x, 1, DistanceMetric::L2)
            .first()
            .map_or(0, |&(list, _)| list)
    }

    /// The `nprobe` best lists for `x`, best first, ties on list id.
    fn probe(&self, x: &[f32], nprobe: usize, metric: DistanceMetric) -> Vec<(usize, f32)> {
        let mut top = TopK::new(nprobe.min(self.nlist()), metric);
        for list in 0..self.nlist() {
            top.push(list, self.score(x, list, metric));
        }
        top.into_sorted()
    }
}

/// Full-precision centroid table (`nlist × dim`, row-major).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatCentroids {
    dim: usize,
    nlist: usize,
    centroids: Vec<f32>,
}

impl FlatCentroids {
    /// Wraps an existing centroid table.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if the table is empty or not `nlist × dim`.
    pub fn new(dim: usize, nlist: usize, centroids: Vec<f32>) -> Result<Self> {
        if dim == 0 || nlist == 0 || centroids.len() != dim * nlist {
            return Err(Error::InvalidParams(format!(
                "centroid table has {} floats, expected {nlist} x {dim}",
                centroids.len()
            )));
        }
        Ok(Self {
            dim,
            nlist,
            centroids,
        })
    }

    /// Trains `nlist` centroids with seeded k-means.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBatch` if `data` is empty or ragged.
    pub fn train(dim: usize, nlist: usize, data: &[f32], iters: usize, seed: u64) -> Result<Self> {
        if dim == 0 || data.is_empty() || data.len() % dim != 0 {
            return Err(Error::InvalidBatch(format!(
                "cannot train {nlist} centroids on {} floats of dimension {dim}",
                data.len()
            )));
        }
        Self::new(dim, nlist, kmeans::train(data, dim, nlist, iters, seed))
    }

    /// Centroid of `list`.
    #[must_use]
    pub fn centroid(&self, list: usize) -> &[f32] {
        &self.centroids[list * self.dim..(list + 1) * self.dim]
    }

    /// The whole table, row-major.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.centroids
    }

    /// `x - centroid(list)`.
    #[must_use]
    pub fn residual(&self, x: &[f32], list: usize) -> Vec<f32> {
        x.iter().zip(self.centroid(list)).map(|(a, c)| a - c).collect()
    }
}

impl CoarseQuantizer for FlatCentroids {
    fn dim(&self) -> usize {
        self.dim
    }

    fn nlist(&self) -> usize {
        self.nlist
    }

    #[inline]
    fn score(&self, x: &[f32], list: usize, metric: DistanceMetric) -> f32 {
        metric.calculate(x, self.centroid(list))
    }

    fn assign(&self, x: &[f32]) -> usize {
        kmeans::nearest(&self.centroids, self.dim, x)
    }
}

/// Centroid table held as 8-bit scalar codes (IVF-SQ assignment).
///
/// Residuals are still computed against the full-precision centroids of the
/// approximate index; this table only decides which list a vector goes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sq8Centroids {
    nlist: usize,
    sq: ScalarQuantizer,
    codes: Vec<u8>,
}

impl Sq8Centroids {
    /// Quantizes a float centroid table.
    ///
    /// # Errors
    ///
    /// Propagates scalar-quantizer training failures.
    pub fn from_flat(flat: &FlatCentroids) -> Result<Self> {
        let sq = ScalarQuantizer::train(flat.dim, &flat.centroids)?;
        let codes = flat
            .centroids
            .chunks_exact(flat.dim)
            .flat_map(|c| sq.encode(c))
            .collect();
        Ok(Self {
            nlist: flat.nlist,
            sq,
            codes,
        })
    }

    fn codes_of(&self, list: usize) -> &[u8] {
        let dim = self.sq.dimension();
        &self.codes[list * dim..(list + 1) * dim]
    }

    /// Checks internal shape after deserialization.
    pub(crate) fn is_consistent(&self) -> bool {
        self.codes.len() == self.nlist * self.sq.dimension()
    }
}

impl CoarseQuantizer for Sq8Centroids {
    fn dim(&self) -> usize {
        self.sq.dimension()
    }

    fn nlist(&self) -> usize {
        self.nlist
    }

    #[inline]
    fn score(&self, x: &[f32], list: usize, metric: DistanceMetric) -> f32 {
        match metric {
            DistanceMetric::L2 => self.sq.l2_asymmetric(x, self.codes_of(list)),
            DistanceMetric::InnerProduct => self.sq.ip_asymmetric(x, self.codes_of(list)),
        }
    }
}
