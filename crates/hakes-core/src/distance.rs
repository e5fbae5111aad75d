//! Distance metrics shared by the approximate, refine and coarse structures.
//!
//! Two conventions coexist, as in every IVF-style engine:
//!
//! - [`DistanceMetric::L2`] reports *squared* Euclidean distance, lower is better.
//! - [`DistanceMetric::InnerProduct`] reports the raw dot product, higher is better.
//!
//! Result rows are always ordered best-first under the active metric.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::Label;

/// Distance metric for vector similarity calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// Inner product (maximum inner product search).
    InnerProduct,
}

impl DistanceMetric {
    /// Calculates the score between two vectors under this metric.
    ///
    /// # Panics
    ///
    /// Debug builds assert that both slices have the same length.
    #[must_use]
    #[inline]
    pub fn calculate(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::L2 => l2_squared(a, b),
            Self::InnerProduct => inner_product(a, b),
        }
    }

    /// Returns whether higher values indicate more similarity.
    #[must_use]
    pub const fn higher_is_better(&self) -> bool {
        matches!(self, Self::InnerProduct)
    }

    /// Score used to pad result slots that have no neighbor.
    #[must_use]
    pub const fn worst(&self) -> f32 {
        match self {
            Self::L2 => f32::INFINITY,
            Self::InnerProduct => f32::NEG_INFINITY,
        }
    }

    /// Orders two scores best-first.
    #[must_use]
    #[inline]
    pub fn compare(&self, a: f32, b: f32) -> Ordering {
        if self.higher_is_better() {
            b.total_cmp(&a)
        } else {
            a.total_cmp(&b)
        }
    }

    /// Sorts `(label, score)` pairs best-first, breaking ties on label so that
    /// results are deterministic across runs and threads.
    pub fn sort_results<L: Ord + Copy>(&self, results: &mut [(L, f32)]) {
        results.sort_by(|a, b| self.compare(a.1, b.1).then_with(|| a.0.cmp(&b.0)));
    }
}

/// Squared Euclidean distance.
#[must_use]
#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Dot product.
#[must_use]
#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&x, &y)| x * y).sum()
}

/// Euclidean norm.
#[must_use]
#[inline]
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Bounded best-k collector.
///
/// Keeps at most `k` entries; once full, a candidate only enters if it beats
/// the current worst. `k` is small (tens to low hundreds) so a sorted vector
/// with binary insertion outperforms a heap here.
#[derive(Debug)]
pub(crate) struct TopK<L> {
    k: usize,
    metric: DistanceMetric,
    items: Vec<(L, f32)>,
}

impl<L: Ord + Copy> TopK<L> {
    pub(crate) fn new(k: usize, metric: DistanceMetric) -> Self {
        Self {
            k,
            metric,
            items: Vec::with_capacity(k.min(1024) + 1),
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, label: L, score: f32) {
        if self.k == 0 {
            return;
        }
        let metric = self.metric;
        let cmp = |a: &(L, f32)| metric.compare(a.1, score).then_with(|| a.0.cmp(&label));
        if self.items.len() == self.k {
            if let Some(worst) = self.items.last() {
                if cmp(worst) != Ordering::Greater {
                    return;
                }
            }
            self.items.pop();
        }
        let at = self.items.partition_point(|item| cmp(item) == Ordering::Less);
        self.items.insert(at, (label, score));
    }

    pub(crate) fn into_sorted(self) -> Vec<(L, f32)> {
        self.items
    }
}

/// Writes one best-first row of `(label, score)` pairs into `k` output slots,
/// padding the tail with `-1` and the metric's worst score.
pub(crate) fn fill_row(
    row: &[(Label, f32)],
    metric: DistanceMetric,
    labels: &mut [Label],
    distances: &mut [f32],
) {
    for (slot, (label, distance)) in labels.iter_mut().zip(distances.iter_mut()).enumerate() {
        match row.get(slot) {
            Some(&(l, d)) => {
                *label = l;
                *distance = d;
            }
            None => {
                *label = -1;
                *distance = metric.worst();
            }
        }
    }
}
