//! Seeded k-means used to train coarse centroids and PQ sub-codebooks.
//!
//! Initialization is k-means++; refinement is plain Lloyd. A cluster that
//! loses all its points keeps its previous centroid. When the training set
//! has no more points than clusters, the points themselves are the
//! centroids and the tail is padded by repeating them.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::distance::l2_squared;

/// Index of the centroid nearest to `v` (squared L2, lowest index on ties).
#[inline]
pub(crate) fn nearest(centroids: &[f32], dim: usize, v: &[f32]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in centroids.chunks_exact(dim).enumerate() {
        let d = l2_squared(v, c);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

/// Trains `k` centroids of dimension `dim` on row-major `data`.
///
/// Always returns exactly `k * dim` floats. `data` must be non-empty and a
/// multiple of `dim`; callers validate that.
pub(crate) fn train(data: &[f32], dim: usize, k: usize, iters: usize, seed: u64) -> Vec<f32> {
    let n = data.len() / dim;
    debug_assert!(n > 0 && k > 0);

    if n <= k {
        return pad_by_repeat(data.to_vec(), dim, k);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = plusplus_init(data, dim, k, &mut rng);

    for iter in 0..iters {
        let assignments: Vec<usize> = data
            .par_chunks(dim)
            .map(|v| nearest(&centroids, dim, v))
            .collect();

        let mut sums = vec![0.0_f32; k * dim];
        let mut counts = vec![0_usize; k];
        for (v, &a) in data.chunks_exact(dim).zip(&assignments) {
            counts[a] += 1;
            for (s, x) in sums[a * dim..(a + 1) * dim].iter_mut().zip(v) {
                *s += x;
            }
        }

        let mut moved = false;
        for (c, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let inv = 1.0 / count as f32;
            for (old, s) in centroids[c * dim..(c + 1) * dim]
                .iter_mut()
                .zip(&sums[c * dim..(c + 1) * dim])
            {
                let new = s * inv;
                if (new - *old).abs() > 1e-7 {
                    moved = true;
                }
                *old = new;
            }
        }

        if !moved {
            tracing::debug!(iter, k, n, "k-means converged");
            break;
        }
    }

    centroids
}

fn plusplus_init(data: &[f32], dim: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = data.len() / dim;
    let mut centroids = Vec::with_capacity(k * dim);
    let first = rng.gen_range(0..n);
    centroids.extend_from_slice(&data[first * dim..(first + 1) * dim]);

    let mut min_dist: Vec<f32> = data
        .chunks_exact(dim)
        .map(|v| l2_squared(v, &centroids[..dim]))
        .collect();

    for _ in 1..k {
        let total: f32 = min_dist.iter().sum();
        let chosen = if total > 0.0 {
            let mut r = rng.gen::<f32>() * total;
            let mut chosen = n - 1;
            for (i, &d) in min_dist.iter().enumerate() {
                r -= d;
                if r <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            rng.gen_range(0..n)
        };

        let start = centroids.len();
        centroids.extend_from_slice(&data[chosen * dim..(chosen + 1) * dim]);
        let added = &centroids[start..start + dim];
        for (d, v) in min_dist.iter_mut().zip(data.chunks_exact(dim)) {
            *d = d.min(l2_squared(v, added));
        }
    }

    centroids
}

fn pad_by_repeat(mut centroids: Vec<f32>, dim: usize, k: usize) -> Vec<f32> {
    let n = centroids.len() / dim;
    let mut i = 0;
    while centroids.len() < k * dim {
        let src = (i % n) * dim;
        centroids.extend_from_within(src..src + dim);
        i += 1;
    }
    centroids
}
