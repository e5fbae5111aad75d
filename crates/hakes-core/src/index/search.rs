//! First-stage approximate search.

use rayon::prelude::*;

use super::{check_batch, HakesIndex};
use crate::collection::SearchOutput;
use crate::error::{Error, Result};
use crate::params::SearchParams;
use crate::quantizer::CoarseQuantizer;
use crate::telemetry::OpTimer;
use crate::Label;

impl HakesIndex {
    pub(super) fn search_impl(
        &self,
        n: usize,
        dim: usize,
        queries: &[f32],
        params: &SearchParams,
    ) -> Result<SearchOutput> {
        let _timer = OpTimer::with_batch("search", n);
        let state = self.read_state()?;
        let p = params.resolve(&state.defaults, self.limits.max_k)?;
        let base = state.base()?;
        check_batch(n, dim, state.input_dim(), queries, None, self.limits.max_batch)?;

        let query_path = if p.use_query_path {
            Some(state.query_path.as_ref().ok_or_else(|| {
                Error::InvalidState("query path requested but not configured".to_string())
            })?)
        } else {
            None
        };
        let (centroids, codebook) = match query_path {
            Some(qp) => (&qp.centroids, &qp.codebook),
            None => (base.centroids(), base.codebook()),
        };
        let coarse: &dyn CoarseQuantizer = match query_path {
            Some(qp) => &qp.centroids,
            None => state.coarse.resolve(base),
        };

        let transformed = state.query_transforms.apply(n, dim, queries)?;
        let slots = p.slots();
        let mapping = &state.mapping;
        let deleted = &state.deleted;

        let rows: Vec<Vec<(Label, f32)>> = transformed
            .par_chunks(base.dim())
            .map(|q| {
                let probes = coarse.probe(q, p.nprobe, p.metric);
                base.scan(q, &probes, centroids, codebook, p.metric, slots, |pos| {
                    mapping.label(pos).is_some_and(|id| !deleted.contains(id))
                })
                .into_iter()
                .filter_map(|(pos, d)| mapping.label(pos).map(|id| (id, d)))
                .collect()
            })
            .collect();

        SearchOutput::from_rows(&rows, slots, p.metric)
    }
}
