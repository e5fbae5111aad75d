//! Per-call search parameters and the tunable parameter document.
//!
//! The parameter document is TOML, grouped by component:
//!
//! ```toml
//! [search]
//! nprobe = 16
//! k_factor = 5
//! metric = "l2"
//! use_query_path = true
//!
//! [rerank]
//! missing_label = "strict"
//!
//! [[query_transforms]]
//! kind = "normalize"
//! d_in = 128
//! d_out = 128
//!
//! [query_quantizer]
//! dim = 128
//! nlist = 1024
//! centroids = [ ... ]
//! m = 32
//! nbits = 4
//! codebook = [ ... ]
//! ```
//!
//! Every group is optional on input; a group that is absent leaves the
//! matching component untouched.

use serde::{Deserialize, Serialize};

use crate::config::{RerankConfig, SearchConfig};
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::transform::TransformChain;

/// Options for one search call. Unset fields take the index defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    /// Results wanted per query.
    pub k: usize,
    /// Inverted lists probed per query.
    pub nprobe: Option<usize>,
    /// First-stage over-fetch multiplier; `k * k_factor` slots are returned.
    pub k_factor: Option<usize>,
    /// Metric override.
    pub metric: Option<DistanceMetric>,
    /// Route through the secondary query quantizers.
    pub use_query_path: Option<bool>,
}

impl SearchParams {
    /// Parameters asking for `k` results with every other option defaulted.
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            nprobe: None,
            k_factor: None,
            metric: None,
            use_query_path: None,
        }
    }

    /// Sets the probe breadth.
    #[must_use]
    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = Some(nprobe);
        self
    }

    /// Sets the over-fetch multiplier.
    #[must_use]
    pub fn with_k_factor(mut self, k_factor: usize) -> Self {
        self.k_factor = Some(k_factor);
        self
    }

    /// Sets the metric.
    #[must_use]
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Enables or disables the query path.
    #[must_use]
    pub fn with_query_path(mut self, enabled: bool) -> Self {
        self.use_query_path = Some(enabled);
        self
    }

    /// Fills unset fields from `defaults` and validates the result.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` for `k == 0`, out-of-range overrides, or
    /// when `k * k_factor` exceeds `max_k`.
    pub fn resolve(&self, defaults: &SearchConfig, max_k: usize) -> Result<ResolvedSearch> {
        if self.k == 0 {
            return Err(Error::InvalidParams("k must be at least 1".to_string()));
        }
        let resolved = SearchConfig {
            nprobe: self.nprobe.unwrap_or(defaults.nprobe),
            k_factor: self.k_factor.unwrap_or(defaults.k_factor),
            metric: self.metric.unwrap_or(defaults.metric),
            use_query_path: self.use_query_path.unwrap_or(defaults.use_query_path),
        };
        resolved
            .validate()
            .map_err(|e| Error::InvalidParams(e.to_string()))?;
        let out = ResolvedSearch {
            k: self.k,
            nprobe: resolved.nprobe,
            k_factor: resolved.k_factor,
            metric: resolved.metric,
            use_query_path: resolved.use_query_path,
        };
        if out.slots() > max_k {
            return Err(Error::InvalidParams(format!(
                "k {} with k_factor {} asks for {} slots, limit is {max_k}",
                out.k,
                out.k_factor,
                out.slots()
            )));
        }
        Ok(out)
    }
}

/// Search parameters with every field decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSearch {
    /// Results wanted per query.
    pub k: usize,
    /// Inverted lists probed per query.
    pub nprobe: usize,
    /// Over-fetch multiplier.
    pub k_factor: usize,
    /// Metric.
    pub metric: DistanceMetric,
    /// Whether the query path is used.
    pub use_query_path: bool,
}

impl ResolvedSearch {
    /// Result slots per query.
    #[must_use]
    pub fn slots(&self) -> usize {
        self.k.saturating_mul(self.k_factor)
    }
}

/// Secondary query-side quantizers as written in the parameter document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryQuantizerParams {
    /// Centroid dimension.
    pub dim: usize,
    /// Number of centroids; must match the approximate index.
    pub nlist: usize,
    /// Row-major `nlist × dim` centroid table.
    pub centroids: Vec<f32>,
    /// PQ subspaces; must match the approximate index.
    pub m: usize,
    /// PQ bits per code; must match the approximate index.
    pub nbits: usize,
    /// PQ codebook table.
    pub codebook: Vec<f32>,
}

/// The tunable parameter document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamsDocument {
    /// Search defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchConfig>,
    /// Rerank policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank: Option<RerankConfig>,
    /// Query transform chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_transforms: Option<TransformChain>,
    /// Secondary query quantizers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_quantizer: Option<QueryQuantizerParams>,
}

impl ParamsDocument {
    /// Parses a document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` for malformed TOML, unknown values, or an
    /// out-of-range search group.
    pub fn parse(text: &str) -> Result<Self> {
        let doc: Self =
            toml::from_str(text).map_err(|e| Error::InvalidParams(format!("malformed document: {e}")))?;
        if let Some(search) = &doc.search {
            search
                .validate()
                .map_err(|e| Error::InvalidParams(e.to_string()))?;
        }
        if let Some(chain) = &doc.query_transforms {
            chain.validate()?;
        }
        Ok(doc)
    }

    /// Renders the document.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if TOML rendering fails.
    pub fn render(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}
