//! Exact, uncompressed collection.
//!
//! Implements the same [`Collection`] operations as
//! [`HakesIndex`](crate::HakesIndex) over a single full-precision store:
//! no transforms, no quantization, exact search. Every insert path upserts
//! into that store, and every load mode loads it.

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use rayon::prelude::*;
use std::path::Path;

use crate::checkpoint::{CheckpointReader, CheckpointWriter, ManifestFlags};
use crate::collection::{AddOutput, Collection, LoadMode, RerankCandidates, SearchOutput};
use crate::config::{HakesConfig, LimitsConfig, RerankConfig, SearchConfig};
use crate::deletion::TagChecker;
use crate::error::{Error, Result};
use crate::index::check_batch;
use crate::index::rerank::{check_rerank, rerank_one};
use crate::params::{ParamsDocument, SearchParams};
use crate::refine::FlatRefineIndex;
use crate::telemetry::OpTimer;
use crate::Label;

const KIND: &str = "flat";
const STORE: &str = "store.bin";
const DELETED: &str = "deleted.roaring";
const PARAMS: &str = "params.toml";

#[derive(Debug, Clone)]
struct FlatState {
    defaults: SearchConfig,
    rerank: RerankConfig,
    store: FlatRefineIndex,
    deleted: TagChecker,
}

/// Brute-force collection.
#[derive(Debug, Default)]
pub struct FlatCollection {
    state: RwLock<Option<FlatState>>,
    checkpoint_lock: Mutex<()>,
    limits: LimitsConfig,
}

impl FlatCollection {
    /// Creates an empty, ready collection of `dim`-dimensional vectors.
    #[must_use]
    pub fn new(dim: usize, config: &HakesConfig) -> Self {
        Self {
            state: RwLock::new(Some(FlatState {
                defaults: config.search.clone(),
                rerank: config.rerank.clone(),
                store: FlatRefineIndex::new(dim),
                deleted: TagChecker::new(),
            })),
            checkpoint_lock: Mutex::new(()),
            limits: config.limits.clone(),
        }
    }

    /// Creates an uninitialized collection, to be loaded with
    /// [`Collection::initialize`].
    #[must_use]
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// Number of stored vectors, or `None` before initialization.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        self.state.read().as_ref().map(|s| s.store.len())
    }

    fn read_state(&self) -> Result<MappedRwLockReadGuard<'_, FlatState>> {
        RwLockReadGuard::try_map(self.state.read(), Option::as_ref).map_err(|_| Error::NotInitialized)
    }

    fn upsert(&self, n: usize, dim: usize, vectors: &[f32], ids: &[Label]) -> Result<()> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(Error::NotInitialized)?;
        check_batch(
            n,
            dim,
            state.store.dim(),
            vectors,
            Some(ids),
            self.limits.max_batch,
        )?;
        state.store.upsert(n, vectors, ids)
    }
}

impl Collection for FlatCollection {
    fn initialize(
        &self,
        path: &Path,
        mode: LoadMode,
        _keep_position_assignment: bool,
    ) -> Result<()> {
        let reader = CheckpointReader::open(path, KIND)?;
        let params = ParamsDocument::parse(&reader.read_text(PARAMS)?)
            .map_err(|e| Error::CorruptedArtifact(format!("{PARAMS}: {e}")))?;
        let store: FlatRefineIndex = reader.read_bincode(STORE)?;
        store.validate()?;
        let state = FlatState {
            defaults: params.search.unwrap_or_default(),
            rerank: params.rerank.unwrap_or_default(),
            store,
            deleted: TagChecker::read_from(reader.read_bytes(DELETED)?.as_slice())?,
        };

        *self.state.write() = Some(state);
        tracing::info!(path = %path.display(), ?mode, "flat collection loaded");
        Ok(())
    }

    fn update_index(&self, other: &Self) -> Result<()> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        let snapshot = other.state.read().clone().ok_or(Error::NotInitialized)?;
        *self.state.write() = Some(snapshot);
        Ok(())
    }

    fn add_with_ids(
        &self,
        n: usize,
        dim: usize,
        vectors: &[f32],
        ids: &[Label],
    ) -> Result<AddOutput> {
        self.upsert(n, dim, vectors, ids)?;
        Ok(AddOutput {
            assign: vec![0; n],
            transformed_dim: dim,
            transformed: vectors.to_vec(),
        })
    }

    fn add_base(&self, n: usize, dim: usize, vectors: &[f32], ids: &[Label]) -> Result<()> {
        self.upsert(n, dim, vectors, ids)
    }

    fn add_refine(&self, n: usize, dim: usize, vectors: &[f32], ids: &[Label]) -> Result<()> {
        self.upsert(n, dim, vectors, ids)
    }

    fn search(
        &self,
        n: usize,
        dim: usize,
        queries: &[f32],
        params: &SearchParams,
    ) -> Result<SearchOutput> {
        let _timer = OpTimer::with_batch("flat_search", n);
        let state = self.read_state()?;
        let p = params.resolve(&state.defaults, self.limits.max_k)?;
        if p.use_query_path {
            return Err(Error::InvalidState(
                "flat collection has no query path".to_string(),
            ));
        }
        check_batch(n, dim, state.store.dim(), queries, None, self.limits.max_batch)?;

        let slots = p.slots();
        let store = &state.store;
        let deleted = &state.deleted;
        let rows: Vec<Vec<(Label, f32)>> = queries
            .par_chunks(dim)
            .map(|q| store.search(q, slots, p.metric, |id| !deleted.contains(id)))
            .collect();
        SearchOutput::from_rows(&rows, slots, p.metric)
    }

    fn rerank(
        &self,
        n: usize,
        dim: usize,
        queries: &[f32],
        k: usize,
        candidates: &RerankCandidates<'_>,
    ) -> Result<SearchOutput> {
        let _timer = OpTimer::with_batch("flat_rerank", n);
        let state = self.read_state()?;
        check_rerank(
            n,
            dim,
            state.store.dim(),
            queries,
            k,
            candidates,
            self.limits.max_batch,
            self.limits.max_k,
        )?;

        let metric = state.defaults.metric;
        let policy = state.rerank.missing_label;
        let store = &state.store;
        let deleted = &state.deleted;
        let rows = queries
            .par_chunks(dim)
            .enumerate()
            .map(|(i, q)| rerank_one(store, deleted, q, candidates.labels_of(i), k, metric, policy))
            .collect::<Result<Vec<_>>>()?;
        SearchOutput::from_rows(&rows, k, metric)
    }

    fn checkpoint(&self, path: &Path) -> Result<()> {
        let _serial = self.checkpoint_lock.lock();
        let state = self.read_state()?;
        let mut writer = CheckpointWriter::create(path)?;
        writer.write_bincode(STORE, &state.store)?;
        let mut deleted = Vec::new();
        state.deleted.write_to(&mut deleted)?;
        writer.write_bytes(DELETED, &deleted)?;
        let params = ParamsDocument {
            search: Some(state.defaults.clone()),
            rerank: Some(state.rerank.clone()),
            ..ParamsDocument::default()
        };
        writer.write_bytes(PARAMS, params.render()?.as_bytes())?;
        writer.publish(
            KIND,
            ManifestFlags {
                has_refine: true,
                ..ManifestFlags::default()
            },
        )
    }

    fn get_params(&self) -> Result<String> {
        let state = self.read_state()?;
        ParamsDocument {
            search: Some(state.defaults.clone()),
            rerank: Some(state.rerank.clone()),
            ..ParamsDocument::default()
        }
        .render()
    }

    fn update_params(&self, doc: &str) -> Result<()> {
        let doc = ParamsDocument::parse(doc)?;
        if doc.query_transforms.is_some() || doc.query_quantizer.is_some() {
            return Err(Error::InvalidParams(
                "flat collection has no query transforms or quantizers".to_string(),
            ));
        }
        if doc.search.as_ref().is_some_and(|s| s.use_query_path) {
            return Err(Error::InvalidParams(
                "flat collection has no query path".to_string(),
            ));
        }
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(Error::NotInitialized)?;
        if let Some(s) = doc.search {
            state.defaults = s;
        }
        if let Some(r) = doc.rerank {
            state.rerank = r;
        }
        Ok(())
    }

    fn delete_with_ids(&self, ids: &[Label]) -> Result<()> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(Error::NotInitialized)?;
        state.deleted.set(ids);
        Ok(())
    }

    fn describe(&self) -> String {
        match self.state.read().as_ref() {
            Some(s) => format!(
                "FlatCollection[ready] d={} stored={} deleted={}",
                s.store.dim(),
                s.store.len(),
                s.deleted.len()
            ),
            None => "FlatCollection[uninitialized]".to_string(),
        }
    }
}
