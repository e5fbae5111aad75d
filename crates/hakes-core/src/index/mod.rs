//! The HAKES two-stage index.
//!
//! Stage one searches a compressed IVF-PQ index over transformed vectors;
//! stage two reranks the survivors with exact distances against the
//! full-precision refine index.
//!
//! # Locking
//!
//! All state sits in one [`IndexState`] behind a single `RwLock`:
//!
//! - search, rerank, get-params and checkpoint take the read lock;
//! - add, delete, update-params, update-index and the publish step of
//!   initialize take the write lock;
//! - add and update-params first validate and prepare under an upgradable
//!   read lock (searches keep running) and upgrade to write to commit.
//!
//! Fairness is whatever `parking_lot` provides.
//!
//! Checkpoints additionally hold a dedicated mutex for their whole
//! duration, so two checkpoints of the same index never interleave their
//! staging, backup and rename steps. Searches are not blocked by it.

mod add;
mod lifecycle;
pub(crate) mod rerank;
mod search;
pub(crate) mod state;


use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use std::fmt;
use std::path::Path;

use crate::collection::{AddOutput, Collection, LoadMode, RerankCandidates, SearchOutput};
use crate::config::LimitsConfig;
use crate::error::{Error, Result};
use crate::params::SearchParams;
use crate::refine::FlatRefineIndex;
use crate::Label;

use state::IndexState;

/// Checkpoint kind written by [`HakesIndex`].
pub(crate) const KIND: &str = "hakes";

/// Snapshot of index sizes, for monitoring and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Dimension of vectors passed in.
    pub input_dim: usize,
    /// Dimension after the base transforms.
    pub base_dim: usize,
    /// Inverted lists (0 without an approximate index).
    pub nlist: usize,
    /// Vectors in the approximate index.
    pub ntotal: u64,
    /// Ids in the id mapping.
    pub mapped: usize,
    /// Vectors in the refine index.
    pub refine_len: usize,
    /// Tombstoned ids.
    pub deleted: u64,
    /// Approximate index loaded.
    pub has_base: bool,
    /// Refine index loaded.
    pub has_refine: bool,
    /// Secondary query quantizers present.
    pub has_query_path: bool,
    /// Assignment through an owned SQ8 centroid table.
    pub use_ivf_sq: bool,
    /// Refine vectors held as SQ8 codes.
    pub use_refine_sq: bool,
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HakesIndex[ready] d={}->{} nlist={} ntotal={} refine={} deleted={} base={} refine_index={} query_path={} ivf_sq={} refine_sq={}",
            self.input_dim,
            self.base_dim,
            self.nlist,
            self.ntotal,
            self.refine_len,
            self.deleted,
            self.has_base,
            self.has_refine,
            self.has_query_path,
            self.use_ivf_sq,
            self.use_refine_sq
        )
    }
}

/// Two-stage approximate index with exact rerank.
///
/// Created empty with [`HakesIndex::new`] and populated by
/// [`Collection::initialize`], or trained from samples with
/// [`IndexBuilder`](crate::IndexBuilder).
#[derive(Debug, Default)]
pub struct HakesIndex {
    state: RwLock<Option<IndexState>>,
    checkpoint_lock: Mutex<()>,
    limits: LimitsConfig,
}

impl HakesIndex {
    /// Creates an uninitialized index with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an uninitialized index with explicit limits.
    #[must_use]
    pub fn with_limits(limits: LimitsConfig) -> Self {
        Self {
            state: RwLock::new(None),
            checkpoint_lock: Mutex::new(()),
            limits,
        }
    }

    pub(crate) fn from_state(state: IndexState, limits: LimitsConfig) -> Self {
        Self {
            state: RwLock::new(Some(state)),
            checkpoint_lock: Mutex::new(()),
            limits,
        }
    }

    /// Returns true once the index holds state.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    /// Current sizes, or `None` before initialization.
    #[must_use]
    pub fn stats(&self) -> Option<IndexStats> {
        let guard = self.state.read();
        let state = guard.as_ref()?;
        Some(IndexStats {
            input_dim: state.input_dim(),
            base_dim: state.base_dim(),
            nlist: state.base.as_ref().map_or(0, |b| b.nlist()),
            ntotal: state.base.as_ref().map_or(0, |b| b.ntotal()),
            mapped: state.mapping.len(),
            refine_len: state.refine.as_ref().map_or(0, |r| r.len()),
            deleted: state.deleted.len(),
            has_base: state.base.is_some(),
            has_refine: state.refine.is_some(),
            has_query_path: state.query_path.is_some(),
            use_ivf_sq: state.coarse.is_owned(),
            use_refine_sq: state.refine.as_ref().is_some_and(FlatRefineIndex::is_quantized),
        })
    }

    /// Inverted list of `id`, when the position-assignment map is kept.
    #[must_use]
    pub fn assignment_of(&self, id: Label) -> Option<usize> {
        let guard = self.state.read();
        guard
            .as_ref()?
            .position_assignment
            .as_ref()?
            .get(&id)
            .copied()
    }

    fn read_state(&self) -> Result<MappedRwLockReadGuard<'_, IndexState>> {
        RwLockReadGuard::try_map(self.state.read(), Option::as_ref).map_err(|_| Error::NotInitialized)
    }
}

/// Shared batch validation for add, search and rerank.
pub(crate) fn check_batch(
    n: usize,
    dim: usize,
    expected_dim: usize,
    vectors: &[f32],
    ids: Option<&[Label]>,
    max_batch: usize,
) -> Result<()> {
    if n == 0 {
        return Err(Error::InvalidBatch("batch is empty".to_string()));
    }
    if n > max_batch {
        return Err(Error::InvalidBatch(format!(
            "batch of {n} exceeds the limit of {max_batch}"
        )));
    }
    if dim != expected_dim {
        return Err(Error::DimensionMismatch {
            expected: expected_dim,
            actual: dim,
        });
    }
    if vectors.len() != n * dim {
        return Err(Error::InvalidBatch(format!(
            "expected {} floats for {n} vectors of dimension {dim}, got {}",
            n * dim,
            vectors.len()
        )));
    }
    if let Some(ids) = ids {
        if ids.len() != n {
            return Err(Error::InvalidBatch(format!(
                "got {} ids for {n} vectors",
                ids.len()
            )));
        }
    }
    Ok(())
}

impl Collection for HakesIndex {
    fn initialize(
        &self,
        path: &Path,
        mode: LoadMode,
        keep_position_assignment: bool,
    ) -> Result<()> {
        self.initialize_impl(path, mode, keep_position_assignment)
    }

    fn update_index(&self, other: &Self) -> Result<()> {
        self.update_index_impl(other)
    }

    fn add_with_ids(
        &self,
        n: usize,
        dim: usize,
        vectors: &[f32],
        ids: &[Label],
    ) -> Result<AddOutput> {
        self.insert_base(n, dim, vectors, ids, "add_with_ids")
    }

    fn add_base(&self, n: usize, dim: usize, vectors: &[f32], ids: &[Label]) -> Result<()> {
        self.insert_base(n, dim, vectors, ids, "add_base").map(|_| ())
    }

    fn add_refine(&self, n: usize, dim: usize, vectors: &[f32], ids: &[Label]) -> Result<()> {
        self.insert_refine(n, dim, vectors, ids)
    }

    fn search(
        &self,
        n: usize,
        dim: usize,
        queries: &[f32],
        params: &SearchParams,
    ) -> Result<SearchOutput> {
        self.search_impl(n, dim, queries, params)
    }

    fn rerank(
        &self,
        n: usize,
        dim: usize,
        queries: &[f32],
        k: usize,
        candidates: &RerankCandidates<'_>,
    ) -> Result<SearchOutput> {
        self.rerank_impl(n, dim, queries, k, candidates)
    }

    fn checkpoint(&self, path: &Path) -> Result<()> {
        self.checkpoint_impl(path)
    }

    fn get_params(&self) -> Result<String> {
        self.get_params_impl()
    }

    fn update_params(&self, doc: &str) -> Result<()> {
        self.update_params_impl(doc)
    }

    fn delete_with_ids(&self, ids: &[Label]) -> Result<()> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(Error::NotInitialized)?;
        state.deleted.set(ids);
        tracing::debug!(count = ids.len(), total = state.deleted.len(), "ids tombstoned");
        Ok(())
    }

    fn describe(&self) -> String {
        self.stats()
            .map_or_else(|| "HakesIndex[uninitialized]".to_string(), |s| s.to_string())
    }
}
