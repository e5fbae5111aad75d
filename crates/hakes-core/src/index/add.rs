//! Insert paths: approximate index (`add_base`, `add_with_ids`) and refine.

use parking_lot::RwLockUpgradableReadGuard;
use rayon::prelude::*;

use super::{check_batch, HakesIndex};
use crate::collection::AddOutput;
use crate::error::{Error, Result};
use crate::telemetry::OpTimer;
use crate::Label;

impl HakesIndex {
    /// Validates, transforms and assigns under an upgradable read lock, then
    /// upgrades to commit. Nothing is written unless every check passes.
    pub(super) fn insert_base(
        &self,
        n: usize,
        dim: usize,
        vectors: &[f32],
        ids: &[Label],
        op: &'static str,
    ) -> Result<AddOutput> {
        let _timer = OpTimer::with_batch(op, n);
        let guard = self.state.upgradable_read();
        let state = guard.as_ref().ok_or(Error::NotInitialized)?;
        let base = state.base()?;

        check_batch(
            n,
            dim,
            state.input_dim(),
            vectors,
            Some(ids),
            self.limits.max_batch,
        )?;
        state.mapping.check_new(ids)?;

        let transformed = state.base_transforms.apply(n, dim, vectors)?;
        let transformed_dim = base.dim();
        let coarse = state.coarse.resolve(base);
        let assign: Vec<usize> = transformed
            .par_chunks(transformed_dim)
            .map(|v| coarse.assign(v))
            .collect();

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        let state = guard
            .as_mut()
            .ok_or_else(|| Error::Internal("index state vanished during insert".to_string()))?;
        let base = state
            .base
            .as_mut()
            .ok_or_else(|| Error::Internal("approximate index vanished during insert".to_string()))?;

        let first = base.add_preassigned(n, &transformed, &assign)?;
        state.mapping.extend(first, ids)?;
        if let Some(pa) = state.position_assignment.as_mut() {
            pa.extend(ids.iter().copied().zip(assign.iter().copied()));
        }

        tracing::debug!(op, n, first_position = first, "vectors inserted");
        Ok(AddOutput {
            assign,
            transformed_dim,
            transformed,
        })
    }

    pub(super) fn insert_refine(
        &self,
        n: usize,
        dim: usize,
        vectors: &[f32],
        ids: &[Label],
    ) -> Result<()> {
        let _timer = OpTimer::with_batch("add_refine", n);
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(Error::NotInitialized)?;
        let refine_dim = state.refine()?.dim();
        check_batch(n, dim, refine_dim, vectors, Some(ids), self.limits.max_batch)?;

        state
            .refine
            .as_mut()
            .ok_or_else(|| Error::Internal("refine index vanished during insert".to_string()))?
            .upsert(n, vectors, ids)
    }
}
