//! Second-stage exact rerank.

use rayon::prelude::*;
use rustc_hash::FxHashSet;

use super::{check_batch, HakesIndex};
use crate::collection::{RerankCandidates, SearchOutput};
use crate::config::MissingLabelPolicy;
use crate::deletion::TagChecker;
use crate::distance::{DistanceMetric, TopK};
use crate::error::{Error, Result};
use crate::refine::FlatRefineIndex;
use crate::telemetry::OpTimer;
use crate::Label;

/// Exact best-`k` over one query's candidates.
///
/// Padding, tombstoned and repeated labels are skipped.
pub(crate) fn rerank_one(
    refine: &FlatRefineIndex,
    deleted: &TagChecker,
    query: &[f32],
    candidates: &[Label],
    k: usize,
    metric: DistanceMetric,
    policy: MissingLabelPolicy,
) -> Result<Vec<(Label, f32)>> {
    let mut top = TopK::new(k, metric);
    let mut seen = FxHashSet::default();
    for &label in candidates {
        if label == -1 || deleted.contains(label) || !seen.insert(label) {
            continue;
        }
        match refine.distance(query, label, metric) {
            Some(d) => top.push(label, d),
            None => match policy {
                MissingLabelPolicy::Strict => return Err(Error::MissingRefineLabel(label)),
                MissingLabelPolicy::SkipMissing => {
                    tracing::debug!(label, "rerank candidate has no refine vector, skipped");
                }
            },
        }
    }
    Ok(top.into_sorted())
}

/// Validates a rerank call's shape against the refine dimension.
pub(crate) fn check_rerank(
    n: usize,
    dim: usize,
    refine_dim: usize,
    queries: &[f32],
    k: usize,
    candidates: &RerankCandidates<'_>,
    max_batch: usize,
    max_k: usize,
) -> Result<()> {
    check_batch(n, dim, refine_dim, queries, None, max_batch)?;
    if k == 0 {
        return Err(Error::InvalidParams("k must be at least 1".to_string()));
    }
    if k > max_k {
        return Err(Error::InvalidParams(format!(
            "k {k} exceeds the limit of {max_k}"
        )));
    }
    if candidates.num_queries() != n {
        return Err(Error::InvalidBatch(format!(
            "got candidates for {} queries, expected {n}",
            candidates.num_queries()
        )));
    }
    Ok(())
}

impl HakesIndex {
    pub(super) fn rerank_impl(
        &self,
        n: usize,
        dim: usize,
        queries: &[f32],
        k: usize,
        candidates: &RerankCandidates<'_>,
    ) -> Result<SearchOutput> {
        let _timer = OpTimer::with_batch("rerank", n);
        let state = self.read_state()?;
        let refine = state.refine()?;
        check_rerank(
            n,
            dim,
            refine.dim(),
            queries,
            k,
            candidates,
            self.limits.max_batch,
            self.limits.max_k,
        )?;

        let metric = state.defaults.metric;
        let policy = state.rerank.missing_label;
        let deleted = &state.deleted;
        let rows = queries
            .par_chunks(dim)
            .enumerate()
            .map(|(i, q)| {
                rerank_one(
                    refine,
                    deleted,
                    q,
                    candidates.labels_of(i),
                    k,
                    metric,
                    policy,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        SearchOutput::from_rows(&rows, k, metric)
    }
}
