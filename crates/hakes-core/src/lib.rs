//! # HAKES Core
//!
//! Two-stage approximate nearest-neighbor index for dense float vectors.
//!
//! Stage one filters: vectors go through a learned (or seeded) transform
//! chain, are assigned to an inverted list by a coarse quantizer, and are
//! stored as 4-bit or 8-bit product-quantization codes. Stage two refines:
//! the best candidates are reranked with exact distances against a
//! full-precision copy.
//!
//! ## Features
//!
//! - **IVF-PQ fast scan**: packed 4-bit codes scored with per-query lookup tables
//! - **Split query path**: queries can use their own transforms and quantizers
//! - **Tombstone deletes**: compressed bitmap, never rewrites the inverted lists
//! - **Atomic checkpoints**: staged directory, checksummed manifest, backup fallback
//! - **Concurrent**: every operation takes `&self`; searches run in parallel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hakes_core::{Collection, HakesConfig, IndexBuilder, RerankCandidates, SearchParams};
//!
//! let index = IndexBuilder::new(HakesConfig::load()?).train(n, dim, &samples)?;
//! index.add_base(n, dim, &vectors, &ids)?;
//! index.add_refine(n, dim, &vectors, &ids)?;
//!
//! let first = index.search(1, dim, &query, &SearchParams::new(10).with_k_factor(5))?;
//! let best = index.rerank(1, dim, &query, 10, &RerankCandidates::from_search(&first))?;
//!
//! index.checkpoint("./hakes-ckpt".as_ref())?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// =============================================================================
// NUMERIC CAST LINTS - USE WITH CAUTION
// =============================================================================
// Positions, list ids and code indices move between usize, u64 and u8.
// Prefer local #[allow(...)] or try_from() in new code.
// =============================================================================
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
// =============================================================================
// STYLISTIC LINTS - Safe to allow globally (no bug risk)
// =============================================================================
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::suboptimal_flops)]
#![allow(clippy::derive_partial_eq_without_eq)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::wildcard_imports)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::similar_names)]

pub mod builder;
pub mod checkpoint;
pub mod collection;
pub mod config;
#[cfg(test)]
mod config_tests;
pub mod deletion;
pub mod distance;
#[cfg(test)]
mod distance_tests;
pub mod error;
#[cfg(test)]
mod error_tests;
pub mod flat;
pub mod index;
pub mod ivf;
mod kmeans;
pub mod mapping;
pub mod params;
pub mod quantizer;
pub mod refine;
pub mod telemetry;
pub mod transform;

/// External vector identifier. `-1` marks an empty result slot.
pub type Label = i64;

pub use builder::IndexBuilder;
pub use checkpoint::{Manifest, ManifestFlags};
pub use collection::{AddOutput, Collection, LoadMode, RerankCandidates, SearchOutput};
pub use config::{
    ConfigError, HakesConfig, IndexConfig, LimitsConfig, MissingLabelPolicy, RerankConfig,
    SearchConfig,
};
pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use flat::FlatCollection;
pub use index::{HakesIndex, IndexStats};
pub use params::{ParamsDocument, QueryQuantizerParams, SearchParams};
pub use transform::{LinearTransform, TransformChain, VectorTransform};
