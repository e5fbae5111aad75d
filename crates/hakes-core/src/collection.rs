//! The operation set shared by every collection variant.
//!
//! [`HakesIndex`](crate::HakesIndex) (two-stage IVF-PQ plus exact rerank)
//! and [`FlatCollection`](crate::FlatCollection) (exact only) both implement
//! [`Collection`], so callers can swap one for the other.
//!
//! Batches are passed row-major: `n` vectors of dimension `dim` occupy
//! `n * dim` consecutive floats.

use std::borrow::Cow;
use std::path::Path;

use crate::distance::{fill_row, DistanceMetric};
use crate::error::{Error, Result};
use crate::params::SearchParams;
use crate::Label;

/// How [`Collection::initialize`] loads a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Everything; serves every operation.
    #[default]
    Full,
    /// Everything except the refine index. Rerank and refine inserts fail.
    FilterOnly,
    /// Only the refine side (refine index, mapping, deletions, transforms).
    /// Search and base inserts fail.
    RefineOnly,
}

/// Row-major search results: `k` slots per query, best first.
///
/// Empty slots hold label `-1` and the metric's worst distance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutput {
    /// Slots per query.
    pub k: usize,
    /// `n * k` distances.
    pub distances: Vec<f32>,
    /// `n * k` labels.
    pub labels: Vec<Label>,
}

impl SearchOutput {
    /// Builds an output from per-query best-first rows.
    ///
    /// Fails with `InvalidParams` if `rows.len() * k` overflows.
    pub(crate) fn from_rows(
        rows: &[Vec<(Label, f32)>],
        k: usize,
        metric: DistanceMetric,
    ) -> Result<Self> {
        let n = rows.len();
        let total = n.checked_mul(k).ok_or_else(|| {
            Error::InvalidParams(format!("{n} queries with {k} slots each overflow"))
        })?;
        let mut labels = vec![-1; total];
        let mut distances = vec![metric.worst(); total];
        if k > 0 {
            for ((row, l), d) in rows
                .iter()
                .zip(labels.chunks_exact_mut(k))
                .zip(distances.chunks_exact_mut(k))
            {
                fill_row(row, metric, l, d);
            }
        }
        Ok(Self {
            k,
            distances,
            labels,
        })
    }

    /// Number of queries.
    #[must_use]
    pub fn num_queries(&self) -> usize {
        if self.k == 0 {
            0
        } else {
            self.labels.len() / self.k
        }
    }

    /// Labels for query `i`.
    #[must_use]
    pub fn labels_of(&self, i: usize) -> &[Label] {
        &self.labels[i * self.k..(i + 1) * self.k]
    }

    /// Distances for query `i`.
    #[must_use]
    pub fn distances_of(&self, i: usize) -> &[f32] {
        &self.distances[i * self.k..(i + 1) * self.k]
    }
}

/// Result of [`Collection::add_with_ids`].
#[derive(Debug, Clone, PartialEq)]
pub struct AddOutput {
    /// Inverted list each vector was assigned to.
    pub assign: Vec<usize>,
    /// Dimension after the base transforms.
    pub transformed_dim: usize,
    /// `n * transformed_dim` transformed vectors.
    pub transformed: Vec<f32>,
}

/// Per-query candidate lists for [`Collection::rerank`].
#[derive(Debug, Clone, PartialEq)]
pub struct RerankCandidates<'a> {
    offsets: Vec<usize>,
    labels: Cow<'a, [Label]>,
    distances: Cow<'a, [f32]>,
}

impl<'a> RerankCandidates<'a> {
    /// Wraps caller-owned lists: query `i` owns the next `counts[i]` entries
    /// of `labels` and `distances`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBatch` if the counts do not add up to the list lengths.
    pub fn new(counts: &[usize], labels: &'a [Label], distances: &'a [f32]) -> Result<Self> {
        let total: usize = counts.iter().sum();
        if total != labels.len() || total != distances.len() {
            return Err(Error::InvalidBatch(format!(
                "candidate counts sum to {total} but {} labels and {} distances were given",
                labels.len(),
                distances.len()
            )));
        }
        Ok(Self {
            offsets: offsets(counts),
            labels: Cow::Borrowed(labels),
            distances: Cow::Borrowed(distances),
        })
    }

    /// Candidates taken from a first-stage search, padding dropped.
    #[must_use]
    pub fn from_search(out: &SearchOutput) -> RerankCandidates<'static> {
        let mut counts = Vec::with_capacity(out.num_queries());
        let mut labels = Vec::new();
        let mut distances = Vec::new();
        for i in 0..out.num_queries() {
            let mut count = 0;
            for (&l, &d) in out.labels_of(i).iter().zip(out.distances_of(i)) {
                if l != -1 {
                    labels.push(l);
                    distances.push(d);
                    count += 1;
                }
            }
            counts.push(count);
        }
        RerankCandidates {
            offsets: offsets(&counts),
            labels: Cow::Owned(labels),
            distances: Cow::Owned(distances),
        }
    }

    /// Number of queries covered.
    #[must_use]
    pub fn num_queries(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Candidate labels of query `i`.
    #[must_use]
    pub fn labels_of(&self, i: usize) -> &[Label] {
        &self.labels[self.offsets[i]..self.offsets[i + 1]]
    }

    /// First-stage distances of query `i`.
    #[must_use]
    pub fn distances_of(&self, i: usize) -> &[f32] {
        &self.distances[self.offsets[i]..self.offsets[i + 1]]
    }
}

fn offsets(counts: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(counts.len() + 1);
    let mut acc = 0;
    out.push(0);
    for &c in counts {
        acc += c;
        out.push(acc);
    }
    out
}

/// Operations every collection variant supports.
///
/// Implementations are internally synchronized: every method takes `&self`
/// and may be called from many threads.
pub trait Collection: Send + Sync {
    /// Loads the checkpoint at `path`, replacing any current state.
    ///
    /// On failure the previous state is kept.
    ///
    /// # Errors
    ///
    /// `Checkpoint` or `CorruptedArtifact` for unusable checkpoints.
    fn initialize(&self, path: &Path, mode: LoadMode, keep_position_assignment: bool)
        -> Result<()>;

    /// Replaces this collection's state with a copy of `other`'s.
    ///
    /// # Errors
    ///
    /// `NotInitialized` if `other` holds no state.
    fn update_index(&self, other: &Self) -> Result<()>
    where
        Self: Sized;

    /// Transforms, assigns and inserts a batch, returning the assignments
    /// and the transformed vectors.
    ///
    /// # Errors
    ///
    /// Validation errors leave the collection unchanged.
    fn add_with_ids(&self, n: usize, dim: usize, vectors: &[f32], ids: &[Label])
        -> Result<AddOutput>;

    /// Transforms and inserts a batch into the approximate index.
    ///
    /// # Errors
    ///
    /// All-or-nothing: on error nothing from the batch is stored.
    fn add_base(&self, n: usize, dim: usize, vectors: &[f32], ids: &[Label]) -> Result<()>;

    /// Inserts or overwrites full-precision vectors used by rerank.
    ///
    /// # Errors
    ///
    /// Validation errors leave the collection unchanged.
    fn add_refine(&self, n: usize, dim: usize, vectors: &[f32], ids: &[Label]) -> Result<()>;

    /// First-stage search.
    ///
    /// # Errors
    ///
    /// Validation or state errors; no state is modified.
    fn search(
        &self,
        n: usize,
        dim: usize,
        queries: &[f32],
        params: &SearchParams,
    ) -> Result<SearchOutput>;

    /// Exact rerank of candidate lists, keeping the best `k` per query.
    ///
    /// # Errors
    ///
    /// Validation, state, or `MissingRefineLabel` under the strict policy.
    fn rerank(
        &self,
        n: usize,
        dim: usize,
        queries: &[f32],
        k: usize,
        candidates: &RerankCandidates<'_>,
    ) -> Result<SearchOutput>;

    /// Writes a checkpoint to `path` and publishes it atomically.
    ///
    /// # Errors
    ///
    /// I/O errors; a previous checkpoint at `path` stays intact.
    fn checkpoint(&self, path: &Path) -> Result<()>;

    /// Renders the tunable parameter document.
    ///
    /// # Errors
    ///
    /// `NotInitialized` or `Serialization`.
    fn get_params(&self) -> Result<String>;

    /// Applies a parameter document.
    ///
    /// # Errors
    ///
    /// Malformed or incompatible documents leave the configuration intact.
    fn update_params(&self, doc: &str) -> Result<()>;

    /// Tombstones `ids`. Idempotent.
    ///
    /// # Errors
    ///
    /// `NotInitialized` only.
    fn delete_with_ids(&self, ids: &[Label]) -> Result<()>;

    /// One-line human-readable summary.
    fn describe(&self) -> String;
}
