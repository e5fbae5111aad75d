//! HAKES configuration.
//!
//! Provides configuration file support via `hakes.toml`, environment
//! variables, and runtime overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (`UpdateParams`, explicit [`SearchParams`](crate::SearchParams))
//! 2. Environment variables (`HAKES_*`)
//! 3. Configuration file (`hakes.toml`)
//! 4. Default values
//!
//! The `search` and `rerank` sections are the tunable part of a live index
//! and travel inside the parameter document. The `index` section only shapes
//! a freshly trained index (see [`IndexBuilder`](crate::IndexBuilder)).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::distance::DistanceMetric;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },
}

/// Default search behaviour of a live index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of inverted lists probed per query.
    pub nprobe: usize,
    /// Multiplier on `k` for the first stage, so rerank has spare candidates.
    pub k_factor: usize,
    /// Metric used for scanning and reranking.
    pub metric: DistanceMetric,
    /// Route queries through the secondary quantized-query path.
    pub use_query_path: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            nprobe: 8,
            k_factor: 1,
            metric: DistanceMetric::L2,
            use_query_path: false,
        }
    }
}

/// What rerank does with a candidate label that has no refine vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingLabelPolicy {
    /// Fail the whole call with `MissingRefineLabel`.
    #[default]
    Strict,
    /// Drop the candidate and continue.
    SkipMissing,
}

/// Rerank configuration section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Policy for candidates absent from the refine index.
    pub missing_label: MissingLabelPolicy,
}

/// Shape of a freshly trained index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Number of inverted lists (coarse clusters).
    pub nlist: usize,
    /// Number of PQ sub-quantizers.
    pub pq_m: usize,
    /// Bits per PQ code, 4 (fast-scan layout) or 8.
    pub pq_nbits: usize,
    /// Assign with an owned 8-bit scalar-quantized copy of the centroids.
    pub use_ivf_sq: bool,
    /// Keep the refine vectors as 8-bit scalar-quantized codes.
    pub use_refine_sq: bool,
    /// Seed a secondary quantized-query path from the base quantizers.
    pub with_query_path: bool,
    /// L2-normalize vectors before anything else.
    pub normalize: bool,
    /// Apply a seeded random orthogonal rotation.
    pub rotate: bool,
    /// Project to this many dimensions (orthonormal projection).
    pub reduce_dim: Option<usize>,
    /// Lloyd iterations for coarse and PQ training.
    pub kmeans_iters: usize,
    /// Seed for every randomized step.
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            nlist: 64,
            pq_m: 8,
            pq_nbits: 4,
            use_ivf_sq: false,
            use_refine_sq: false,
            with_query_path: false,
            normalize: false,
            rotate: false,
            reduce_dim: None,
            kmeans_iters: 20,
            seed: 42,
        }
    }
}

/// Limits configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum vector dimensions.
    pub max_dimension: usize,
    /// Maximum vectors accepted by a single add call.
    pub max_batch: usize,
    /// Maximum result slots per query, after `k_factor` is applied.
    pub max_k: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_dimension: 4096,
            max_batch: 1_000_000,
            max_k: 10_000,
        }
    }
}

/// Main HAKES configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HakesConfig {
    /// Search defaults.
    pub search: SearchConfig,
    /// Rerank policy.
    pub rerank: RerankConfig,
    /// Index shape used when training.
    pub index: IndexConfig,
    /// Limits.
    pub limits: LimitsConfig,
}

impl HakesConfig {
    /// Loads configuration from default sources.
    ///
    /// Priority: defaults < file < environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("hakes.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("HAKES_").split("__").lowercase(true));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Creates a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.search.validate()?;

        if self.index.nlist == 0 || self.index.nlist > 65_536 {
            return Err(invalid(
                "index.nlist",
                format!("value {} is out of range [1, 65536]", self.index.nlist),
            ));
        }

        if self.index.pq_m == 0 {
            return Err(invalid("index.pq_m", "value must be >= 1".to_string()));
        }

        if !matches!(self.index.pq_nbits, 4 | 8) {
            return Err(invalid(
                "index.pq_nbits",
                format!("value {} is invalid, expected 4 or 8", self.index.pq_nbits),
            ));
        }

        if let Some(d) = self.index.reduce_dim {
            if d == 0 || d > self.limits.max_dimension {
                return Err(invalid(
                    "index.reduce_dim",
                    format!("value {d} is out of range [1, {}]", self.limits.max_dimension),
                ));
            }
            if d % self.index.pq_m != 0 {
                return Err(invalid(
                    "index.reduce_dim",
                    format!("value {d} is not divisible by pq_m {}", self.index.pq_m),
                ));
            }
        }

        if self.limits.max_dimension == 0 || self.limits.max_dimension > 65_536 {
            return Err(invalid(
                "limits.max_dimension",
                format!(
                    "value {} is out of range [1, 65536]",
                    self.limits.max_dimension
                ),
            ));
        }

        if self.limits.max_batch == 0 {
            return Err(invalid("limits.max_batch", "value must be >= 1".to_string()));
        }

        if self.limits.max_k == 0 {
            return Err(invalid("limits.max_k", "value must be >= 1".to_string()));
        }

        Ok(())
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl SearchConfig {
    /// Validates the search section on its own; it is also checked whenever
    /// a parameter document is applied.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nprobe == 0 || self.nprobe > 65_536 {
            return Err(invalid(
                "search.nprobe",
                format!("value {} is out of range [1, 65536]", self.nprobe),
            ));
        }
        if self.k_factor == 0 || self.k_factor > 1000 {
            return Err(invalid(
                "search.k_factor",
                format!("value {} is out of range [1, 1000]", self.k_factor),
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    }
}
