//! Shared fixtures for integration tests.

#![allow(dead_code)]

use hakes_core::{Collection, HakesConfig, HakesIndex, IndexBuilder, Label};

/// Deterministic pseudo-random vector in `[-1, 1)^dimension`.
#[allow(clippy::cast_precision_loss)]
pub fn generate_vector(dimension: usize, seed: u64) -> Vec<f32> {
    let mut v = Vec::with_capacity(dimension);
    let mut x = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    for _ in 0..dimension {
        x = x.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        v.push(((x >> 11) as f32 / (1u64 << 53) as f32) * 2.0 - 1.0);
    }
    v
}

/// `n` row-major vectors, seeds `first_seed..first_seed + n`.
pub fn generate_batch(n: usize, dimension: usize, first_seed: u64) -> Vec<f32> {
    (0..n as u64)
        .flat_map(|i| generate_vector(dimension, first_seed + i))
        .collect()
}

/// Small exact-by-construction configuration: 8-bit codes and every list probed.
pub fn exact_config(nlist: usize, pq_m: usize) -> HakesConfig {
    let mut config = HakesConfig::default();
    config.index.nlist = nlist;
    config.index.pq_m = pq_m;
    config.index.pq_nbits = 8;
    config.search.nprobe = nlist;
    config
}

/// Trains on `data` and inserts it into both stages with ids `0..n`.
pub fn build_filled(config: HakesConfig, n: usize, dimension: usize, data: &[f32]) -> HakesIndex {
    let index = IndexBuilder::new(config)
        .train(n, dimension, data)
        .expect("train");
    let ids: Vec<Label> = (0..n as Label).collect();
    index.add_base(n, dimension, data, &ids).expect("add_base");
    index
        .add_refine(n, dimension, data, &ids)
        .expect("add_refine");
    index
}
