//! Inverted-file approximate index.

pub mod fast_scan;


pub use fast_scan::{IvfPqFastScan, Position};
