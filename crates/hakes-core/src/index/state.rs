//! Everything a [`HakesIndex`](super::HakesIndex) owns, in one value.
//!
//! The index keeps exactly one `IndexState` behind its lock. Cloning the
//! state is how a peer index is copied; replacing it is how a checkpoint
//! load is published.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::{RerankConfig, SearchConfig};
use crate::deletion::TagChecker;
use crate::error::{Error, Result};
use crate::ivf::IvfPqFastScan;
use crate::mapping::IdMap;
use crate::params::QueryQuantizerParams;
use crate::quantizer::{CoarseQuantizer, FlatCentroids, PqCodebook, Sq8Centroids};
use crate::refine::FlatRefineIndex;
use crate::transform::TransformChain;
use crate::Label;

/// Which coarse quantizer assigns and probes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CoarseHandle {
    /// An SQ8 copy of the centroids owned by the index (IVF-SQ mode).
    Owned(Sq8Centroids),
    /// The approximate index's own float centroids.
    Borrowed,
}

impl CoarseHandle {
    pub(crate) fn resolve<'a>(&'a self, base: &'a IvfPqFastScan) -> &'a dyn CoarseQuantizer {
        match self {
            Self::Owned(sq) => sq,
            Self::Borrowed => base.centroids(),
        }
    }

    pub(crate) fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

/// Secondary query-side quantizers. Both halves are always present together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct QueryPath {
    pub(crate) centroids: FlatCentroids,
    pub(crate) codebook: PqCodebook,
}

impl QueryPath {
    /// Checks that codes written with `base` can be scored with this pair.
    pub(crate) fn check_compatible(&self, base: &IvfPqFastScan) -> Result<()> {
        if self.centroids.nlist() != base.nlist() || self.centroids.dim() != base.dim() {
            return Err(Error::InvalidParams(format!(
                "query quantizer has {} centroids of dimension {}, index has {} of dimension {}",
                self.centroids.nlist(),
                self.centroids.dim(),
                base.nlist(),
                base.dim()
            )));
        }
        if !self.codebook.same_shape(base.codebook()) {
            return Err(Error::InvalidParams(format!(
                "query codebook (m={}, nbits={}) does not match index codebook (m={}, nbits={})",
                self.codebook.m(),
                self.codebook.nbits(),
                base.codebook().m(),
                base.codebook().nbits()
            )));
        }
        Ok(())
    }

    pub(crate) fn to_params(&self) -> QueryQuantizerParams {
        QueryQuantizerParams {
            dim: self.centroids.dim(),
            nlist: self.centroids.nlist(),
            centroids: self.centroids.as_slice().to_vec(),
            m: self.codebook.m(),
            nbits: self.codebook.nbits(),
            codebook: self.codebook.as_slice().to_vec(),
        }
    }
}

impl TryFrom<QueryQuantizerParams> for QueryPath {
    type Error = Error;

    fn try_from(p: QueryQuantizerParams) -> Result<Self> {
        Ok(Self {
            centroids: FlatCentroids::new(p.dim, p.nlist, p.centroids)?,
            codebook: PqCodebook::new(p.dim, p.m, p.nbits, p.codebook)?,
        })
    }
}

/// All mutable state of one index.
#[derive(Debug, Clone)]
pub(crate) struct IndexState {
    pub(crate) defaults: SearchConfig,
    pub(crate) rerank: RerankConfig,
    pub(crate) base_transforms: TransformChain,
    pub(crate) query_transforms: TransformChain,
    pub(crate) coarse: CoarseHandle,
    pub(crate) base: Option<IvfPqFastScan>,
    pub(crate) refine: Option<FlatRefineIndex>,
    pub(crate) query_path: Option<QueryPath>,
    pub(crate) mapping: IdMap,
    pub(crate) deleted: TagChecker,
    /// External id → inverted list, kept only when requested at load.
    pub(crate) position_assignment: Option<FxHashMap<Label, usize>>,
}

impl IndexState {
    /// Dimension of vectors handed to add, search and rerank.
    pub(crate) fn input_dim(&self) -> usize {
        self.base_transforms
            .d_in()
            .or_else(|| self.base.as_ref().map(IvfPqFastScan::dim))
            .or_else(|| self.refine.as_ref().map(FlatRefineIndex::dim))
            .unwrap_or(0)
    }

    /// Dimension of the approximate index space.
    pub(crate) fn base_dim(&self) -> usize {
        self.base_transforms.output_dim(self.input_dim())
    }

    pub(crate) fn base(&self) -> Result<&IvfPqFastScan> {
        self.base.as_ref().ok_or_else(|| {
            Error::InvalidState("approximate index is not loaded (refine-only mode)".to_string())
        })
    }

    pub(crate) fn refine(&self) -> Result<&FlatRefineIndex> {
        self.refine.as_ref().ok_or_else(|| {
            Error::InvalidState("refine index is not loaded (filter-only mode)".to_string())
        })
    }

    /// Rebuilds the position-assignment map from the inverted lists.
    pub(crate) fn rebuild_position_assignment(&mut self) {
        self.position_assignment = self.base.as_ref().map(|base| {
            self.mapping
                .labels()
                .iter()
                .copied()
                .zip(base.assignments())
                .collect()
        });
    }

    /// Cross-component shape checks run after every load.
    pub(crate) fn validate(&self) -> Result<()> {
        let corrupted = |msg: String| Err(Error::CorruptedArtifact(msg));
        let input_dim = self.input_dim();

        if let Err(e) = self.base_transforms.validate() {
            return corrupted(format!("base transforms: {e}"));
        }
        if let Err(e) = self.query_transforms.validate() {
            return corrupted(format!("query transforms: {e}"));
        }
        if let Err(e) = self.query_transforms.check_dims(input_dim, self.base_dim()) {
            return corrupted(format!("query transforms: {e}"));
        }

        if let Some(base) = &self.base {
            base.validate()?;
            if base.dim() != self.base_dim() {
                return corrupted(format!(
                    "base transforms output {}-d vectors but the index is {}-d",
                    self.base_dim(),
                    base.dim()
                ));
            }
            if self.mapping.len() as u64 != base.ntotal() {
                return corrupted(format!(
                    "id mapping holds {} ids but the index holds {} vectors",
                    self.mapping.len(),
                    base.ntotal()
                ));
            }
            if let CoarseHandle::Owned(sq) = &self.coarse {
                if !sq.is_consistent() || sq.nlist() != base.nlist() || sq.dim() != base.dim() {
                    return corrupted("scalar-quantized centroids do not match the index".to_string());
                }
            }
            if let Some(qp) = &self.query_path {
                if let Err(e) = qp.check_compatible(base) {
                    return corrupted(format!("query path: {e}"));
                }
            }
        }

        self.mapping.validate()?;

        if let Some(refine) = &self.refine {
            refine.validate()?;
            if refine.dim() != input_dim {
                return corrupted(format!(
                    "refine index is {}-d but inputs are {input_dim}-d",
                    refine.dim()
                ));
            }
        }

        if let Err(e) = self.defaults.validate() {
            return corrupted(format!("search defaults: {e}"));
        }
        Ok(())
    }
}
