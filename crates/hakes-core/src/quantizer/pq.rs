//! Product quantization of residual vectors.
//!
//! The `dim`-dimensional space is split into `m` contiguous subspaces of
//! `dim / m` dimensions; each subspace has its own codebook of `2^nbits`
//! codewords. With `nbits = 4` two codes share a byte (the fast-scan
//! layout); with `nbits = 8` each code is one byte.
//!
//! Distances are computed asymmetrically (ADC): the query stays in float,
//! a per-query [`DistanceTable`] holds the partial score of every codeword,
//! and a candidate's score is a sum of `m` table lookups.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::distance::{inner_product, l2_squared, DistanceMetric};
use crate::error::{Error, Result};
use crate::kmeans;

/// Learned PQ codebook: `m` subspaces × `2^nbits` codewords × `dim / m`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PqCodebook {
    dim: usize,
    m: usize,
    nbits: usize,
    centroids: Vec<f32>,
}

impl PqCodebook {
    /// Wraps an existing codebook table, validating its shape.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if `nbits` is not 4 or 8, `dim` is not
    /// divisible by `m`, or the table has the wrong size.
    pub fn new(dim: usize, m: usize, nbits: usize, centroids: Vec<f32>) -> Result<Self> {
        if !matches!(nbits, 4 | 8) {
            return Err(Error::InvalidParams(format!(
                "pq nbits must be 4 or 8, got {nbits}"
            )));
        }
        if m == 0 || dim == 0 || dim % m != 0 {
            return Err(Error::InvalidParams(format!(
                "dimension {dim} is not divisible into {m} subspaces"
            )));
        }
        let expected = (1 << nbits) * dim;
        if centroids.len() != expected {
            return Err(Error::InvalidParams(format!(
                "pq codebook has {} floats, expected {expected}",
                centroids.len()
            )));
        }
        Ok(Self {
            dim,
            m,
            nbits,
            centroids,
        })
    }

    /// Trains one k-means codebook per subspace on row-major `data`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBatch` for empty or ragged data and `InvalidParams`
    /// for an impossible shape.
    pub fn train(
        dim: usize,
        m: usize,
        nbits: usize,
        data: &[f32],
        iters: usize,
        seed: u64,
    ) -> Result<Self> {
        if dim == 0 || data.is_empty() || data.len() % dim != 0 {
            return Err(Error::InvalidBatch(format!(
                "cannot train a pq codebook on {} floats of dimension {dim}",
                data.len()
            )));
        }
        if m == 0 || dim % m != 0 {
            return Err(Error::InvalidParams(format!(
                "dimension {dim} is not divisible into {m} subspaces"
            )));
        }
        let dsub = dim / m;
        let ksub = 1_usize << nbits;

        let per_subspace: Vec<Vec<f32>> = (0..m)
            .into_par_iter()
            .map(|j| {
                let sub: Vec<f32> = data
                    .chunks_exact(dim)
                    .flat_map(|v| v[j * dsub..(j + 1) * dsub].iter().copied())
                    .collect();
                kmeans::train(&sub, dsub, ksub, iters, seed.wrapping_add(j as u64))
            })
            .collect();

        Self::new(dim, m, nbits, per_subspace.concat())
    }

    /// Vector dimension.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of subspaces.
    #[must_use]
    pub fn m(&self) -> usize {
        self.m
    }

    /// Bits per code.
    #[must_use]
    pub fn nbits(&self) -> usize {
        self.nbits
    }

    /// Codewords per subspace.
    #[must_use]
    pub fn ksub(&self) -> usize {
        1 << self.nbits
    }

    /// Dimensions per subspace.
    #[must_use]
    pub fn dsub(&self) -> usize {
        self.dim / self.m
    }

    /// Raw codebook table.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.centroids
    }

    /// True when two codebooks can read each other's codes.
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.dim == other.dim && self.m == other.m && self.nbits == other.nbits
    }

    /// Packer for this codebook's code layout.
    #[must_use]
    pub fn packer(&self) -> CodePacker {
        CodePacker::new(self.m, self.nbits)
    }

    #[inline]
    fn codeword(&self, j: usize, c: usize) -> &[f32] {
        let dsub = self.dsub();
        let start = (j * self.ksub() + c) * dsub;
        &self.centroids[start..start + dsub]
    }

    /// Encodes a vector as `m` unpacked codes.
    #[must_use]
    pub fn encode(&self, x: &[f32]) -> Vec<u8> {
        debug_assert_eq!(x.len(), self.dim);
        let dsub = self.dsub();
        let ksub = self.ksub();
        (0..self.m)
            .map(|j| {
                let table = &self.centroids[j * ksub * dsub..(j + 1) * ksub * dsub];
                kmeans::nearest(table, dsub, &x[j * dsub..(j + 1) * dsub]) as u8
            })
            .collect()
    }

    /// Reconstructs a vector from `m` unpacked codes.
    #[must_use]
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        debug_assert_eq!(codes.len(), self.m);
        codes
            .iter()
            .enumerate()
            .flat_map(|(j, &c)| self.codeword(j, usize::from(c)).iter().copied())
            .collect()
    }
}

/// Packs and unpacks `m` codes of `nbits` each.
///
/// With 4 bits, code `2i` lives in the low nibble and code `2i + 1` in the
/// high nibble of byte `i`; an odd trailing code leaves the high nibble 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePacker {
    m: usize,
    nbits: usize,
}

impl CodePacker {
    /// Packer for `m` codes of `nbits` (4 or 8).
    #[must_use]
    pub fn new(m: usize, nbits: usize) -> Self {
        Self { m, nbits }
    }

    /// Bytes per packed vector.
    #[must_use]
    pub fn code_size(&self) -> usize {
        if self.nbits == 4 {
            self.m.div_ceil(2)
        } else {
            self.m
        }
    }

    /// Appends the packed form of `codes` to `out`.
    pub fn pack_into(&self, codes: &[u8], out: &mut Vec<u8>) {
        debug_assert_eq!(codes.len(), self.m);
        if self.nbits == 4 {
            out.extend(
                codes
                    .chunks(2)
                    .map(|pair| (pair[0] & 0x0f) | (pair.get(1).copied().unwrap_or(0) << 4)),
            );
        } else {
            out.extend_from_slice(codes);
        }
    }

    /// Packs `codes` into a fresh buffer.
    #[must_use]
    pub fn pack(&self, codes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.code_size());
        self.pack_into(codes, &mut out);
        out
    }

    /// Code `j` of a packed vector.
    #[inline]
    #[must_use]
    pub fn get(&self, packed: &[u8], j: usize) -> u8 {
        if self.nbits == 4 {
            let byte = packed[j / 2];
            if j % 2 == 0 {
                byte & 0x0f
            } else {
                byte >> 4
            }
        } else {
            packed[j]
        }
    }

    /// Unpacks to `m` codes.
    #[must_use]
    pub fn unpack(&self, packed: &[u8]) -> Vec<u8> {
        (0..self.m).map(|j| self.get(packed, j)).collect()
    }
}

/// Per-query ADC lookup table.
///
/// For L2 the table holds `||q_j - r_j||²` for the query residual against
/// the list centroid. For inner product it holds `<q_j, r_j>` for the raw
/// query and `bias = <q, centroid>`, since `<q, c + r> = <q, c> + <q, r>`.
#[derive(Debug, Clone)]
pub struct DistanceTable {
    table: Vec<f32>,
    ksub: usize,
    packer: CodePacker,
    bias: f32,
}

impl DistanceTable {
    /// Builds the table for `query` scanning the list with `centroid`.
    #[must_use]
    pub fn build(
        codebook: &PqCodebook,
        query: &[f32],
        centroid: &[f32],
        metric: DistanceMetric,
    ) -> Self {
        let dsub = codebook.dsub();
        let ksub = codebook.ksub();

        let (target, bias): (Vec<f32>, f32) = match metric {
            DistanceMetric::L2 => (query.iter().zip(centroid).map(|(q, c)| q - c).collect(), 0.0),
            DistanceMetric::InnerProduct => (query.to_vec(), inner_product(query, centroid)),
        };

        let mut table = Vec::with_capacity(codebook.m * ksub);
        for j in 0..codebook.m {
            let q = &target[j * dsub..(j + 1) * dsub];
            for c in 0..ksub {
                let w = codebook.codeword(j, c);
                table.push(match metric {
                    DistanceMetric::L2 => l2_squared(q, w),
                    DistanceMetric::InnerProduct => inner_product(q, w),
                });
            }
        }

        Self {
            table,
            ksub,
            packer: codebook.packer(),
            bias,
        }
    }

    /// Approximate score of one packed code.
    #[inline]
    #[must_use]
    pub fn distance(&self, packed: &[u8]) -> f32 {
        let mut total = self.bias;
        for j in 0..self.packer.m {
            total += self.table[j * self.ksub + usize::from(self.packer.get(packed, j))];
        }
        total
    }
}
