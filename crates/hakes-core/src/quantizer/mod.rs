//! Quantizers: coarse partitioning, 8-bit scalar and product quantization.

pub mod coarse;
pub mod pq;
pub mod scalar;

#[cfg(test)]
mod coarse_tests;

pub use coarse::{CoarseQuantizer, FlatCentroids, Sq8Centroids};
pub use pq::{CodePacker, DistanceTable, PqCodebook};
pub use scalar::ScalarQuantizer;
