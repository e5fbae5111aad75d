//! Trains a ready, empty [`HakesIndex`] from sample vectors.
//!
//! Only the minimal pipeline needed to serve: optional normalization,
//! seeded rotation and projection, k-means coarse centroids, and a PQ
//! codebook trained on residuals. Anything more elaborate (learned
//! query-side quantizers, OPQ) is produced offline and loaded through
//! the parameter document or a checkpoint.

use rustc_hash::FxHashMap;

use crate::config::HakesConfig;
use crate::deletion::TagChecker;
use crate::error::{Error, Result};
use crate::index::state::{CoarseHandle, IndexState, QueryPath};
use crate::index::HakesIndex;
use crate::ivf::IvfPqFastScan;
use crate::mapping::IdMap;
use crate::quantizer::{CoarseQuantizer, FlatCentroids, PqCodebook, ScalarQuantizer, Sq8Centroids};
use crate::refine::FlatRefineIndex;
use crate::telemetry::OpTimer;
use crate::transform::{LinearTransform, TransformChain, VectorTransform};

/// Builds a [`HakesIndex`] from a [`HakesConfig`].
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    config: HakesConfig,
    keep_position_assignment: bool,
}

impl IndexBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(config: HakesConfig) -> Self {
        Self {
            config,
            keep_position_assignment: false,
        }
    }

    /// Track the inverted list of every inserted id.
    #[must_use]
    pub fn keep_position_assignment(mut self, keep: bool) -> Self {
        self.keep_position_assignment = keep;
        self
    }

    fn base_chain(&self, d: usize) -> Result<TransformChain> {
        let index = &self.config.index;
        let mut transforms = Vec::new();
        if index.normalize {
            transforms.push(VectorTransform::Normalize { dim: d });
        }
        if index.rotate {
            transforms.push(VectorTransform::Linear(LinearTransform::random_orthogonal(
                d, d, index.seed,
            )?));
        }
        if let Some(r) = index.reduce_dim {
            if r > d {
                return Err(Error::InvalidParams(format!(
                    "reduce_dim {r} exceeds input dimension {d}"
                )));
            }
            transforms.push(VectorTransform::Linear(LinearTransform::random_orthogonal(
                d,
                r,
                index.seed.wrapping_add(1),
            )?));
        }
        TransformChain::new(transforms)
    }

    /// Trains on `n` samples of dimension `d` and returns an empty index.
    ///
    /// # Errors
    ///
    /// `Config` for an invalid configuration, `InvalidBatch` or
    /// `DimensionMismatch`-style validation errors for bad samples, and
    /// `InvalidParams` when the transformed dimension cannot be split into
    /// `pq_m` subspaces.
    pub fn train(&self, n: usize, d: usize, samples: &[f32]) -> Result<HakesIndex> {
        let _timer = OpTimer::with_batch("train", n);
        self.config.validate()?;
        let index = &self.config.index;

        if n == 0 || d == 0 || samples.len() != n * d {
            return Err(Error::InvalidBatch(format!(
                "expected {n} training vectors of dimension {d}, got {} floats",
                samples.len()
            )));
        }
        if d > self.config.limits.max_dimension {
            return Err(Error::InvalidBatch(format!(
                "dimension {d} exceeds the limit of {}",
                self.config.limits.max_dimension
            )));
        }

        let chain = self.base_chain(d)?;
        let transformed = chain.apply(n, d, samples)?;
        let base_dim = chain.output_dim(d);
        if base_dim % index.pq_m != 0 {
            return Err(Error::InvalidParams(format!(
                "transformed dimension {base_dim} is not divisible by pq_m {}",
                index.pq_m
            )));
        }

        let centroids =
            FlatCentroids::train(base_dim, index.nlist, &transformed, index.kmeans_iters, index.seed)?;
        let residuals: Vec<f32> = transformed
            .chunks_exact(base_dim)
            .flat_map(|v| centroids.residual(v, centroids.assign(v)))
            .collect();
        let codebook = PqCodebook::train(
            base_dim,
            index.pq_m,
            index.pq_nbits,
            &residuals,
            index.kmeans_iters,
            index.seed,
        )?;

        let coarse = if index.use_ivf_sq {
            CoarseHandle::Owned(Sq8Centroids::from_flat(&centroids)?)
        } else {
            CoarseHandle::Borrowed
        };
        // Refine vectors stay in input space, so the SQ8 ranges come from
        // the raw samples.
        let refine = if index.use_refine_sq {
            FlatRefineIndex::with_sq8(ScalarQuantizer::train(d, samples)?)
        } else {
            FlatRefineIndex::new(d)
        };
        let query_path = index.with_query_path.then(|| QueryPath {
            centroids: centroids.clone(),
            codebook: codebook.clone(),
        });
        let mut defaults = self.config.search.clone();
        if query_path.is_none() {
            defaults.use_query_path = false;
        }

        let state = IndexState {
            defaults,
            rerank: self.config.rerank.clone(),
            query_transforms: chain.clone(),
            base_transforms: chain,
            coarse,
            base: Some(IvfPqFastScan::new(centroids, codebook)?),
            refine: Some(refine),
            query_path,
            mapping: IdMap::new(),
            deleted: TagChecker::new(),
            position_assignment: self.keep_position_assignment.then(FxHashMap::default),
        };
        state.validate()?;

        tracing::info!(
            n,
            d,
            base_dim,
            nlist = index.nlist,
            pq_m = index.pq_m,
            pq_nbits = index.pq_nbits,
            ivf_sq = index.use_ivf_sq,
            refine_sq = index.use_refine_sq,
            "index trained"
        );
        Ok(HakesIndex::from_state(state, self.config.limits.clone()))
    }
}
