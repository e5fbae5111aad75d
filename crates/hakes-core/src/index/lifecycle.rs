//! Load, copy, persist and reconfigure.

use parking_lot::RwLockUpgradableReadGuard;
use std::path::Path;

use super::state::{CoarseHandle, IndexState, QueryPath};
use super::{HakesIndex, KIND};
use crate::checkpoint::{CheckpointReader, CheckpointWriter, ManifestFlags};
use crate::collection::{Collection, LoadMode};
use crate::config::{RerankConfig, SearchConfig};
use crate::deletion::TagChecker;
use crate::error::{Error, Result};
use crate::params::ParamsDocument;
use crate::refine::FlatRefineIndex;
use crate::telemetry::OpTimer;

const BASE_TRANSFORMS: &str = "base_transforms.bin";
const QUERY_TRANSFORMS: &str = "query_transforms.bin";
const COARSE_SQ: &str = "coarse_sq.bin";
const BASE_INDEX: &str = "base_index.bin";
const QUERY_PATH: &str = "query_path.bin";
const REFINE_INDEX: &str = "refine_index.bin";
const ID_MAPPING: &str = "id_mapping.bin";
const DELETED: &str = "deleted.roaring";
const PARAMS: &str = "params.toml";

fn load_state(path: &Path, mode: LoadMode, keep_position_assignment: bool) -> Result<IndexState> {
    let reader = CheckpointReader::open(path, KIND)?;
    let flags = reader.flags();

    let want_base = mode != LoadMode::RefineOnly;
    let want_refine = mode != LoadMode::FilterOnly;
    if want_base && !flags.has_base {
        return Err(Error::Checkpoint(format!(
            "{mode:?} load needs an approximate index, checkpoint has none"
        )));
    }
    if want_refine && !flags.has_refine {
        return Err(Error::Checkpoint(format!(
            "{mode:?} load needs a refine index, checkpoint has none"
        )));
    }

    let params = ParamsDocument::parse(&reader.read_text(PARAMS)?)
        .map_err(|e| Error::CorruptedArtifact(format!("{PARAMS}: {e}")))?;

    let base = if want_base {
        Some(reader.read_bincode(BASE_INDEX)?)
    } else {
        None
    };
    let coarse = if want_base && flags.use_ivf_sq {
        CoarseHandle::Owned(reader.read_bincode(COARSE_SQ)?)
    } else {
        CoarseHandle::Borrowed
    };
    let query_path: Option<QueryPath> = if want_base && flags.has_query_path {
        Some(reader.read_bincode(QUERY_PATH)?)
    } else {
        None
    };
    let refine: Option<FlatRefineIndex> = if want_refine {
        Some(reader.read_bincode(REFINE_INDEX)?)
    } else {
        None
    };
    if let Some(r) = &refine {
        if r.is_quantized() != flags.use_refine_sq {
            return Err(Error::CorruptedArtifact(format!(
                "{REFINE_INDEX} quantized={} but manifest says use_refine_sq={}",
                r.is_quantized(),
                flags.use_refine_sq
            )));
        }
    }

    let mut defaults = params.search.unwrap_or_default();
    if defaults.use_query_path && query_path.is_none() {
        // Query path was not loaded in this mode.
        defaults.use_query_path = false;
    }

    let mut state = IndexState {
        defaults,
        rerank: params.rerank.unwrap_or_default(),
        base_transforms: reader.read_bincode(BASE_TRANSFORMS)?,
        query_transforms: reader.read_bincode(QUERY_TRANSFORMS)?,
        coarse,
        base,
        refine,
        query_path,
        mapping: reader.read_bincode(ID_MAPPING)?,
        deleted: TagChecker::read_from(reader.read_bytes(DELETED)?.as_slice())?,
        position_assignment: None,
    };
    state.validate()?;

    if keep_position_assignment {
        if state.base.is_some() {
            state.rebuild_position_assignment();
        } else {
            tracing::warn!("position assignment requested without an approximate index, ignored");
        }
    }
    Ok(state)
}

impl HakesIndex {
    pub(super) fn initialize_impl(
        &self,
        path: &Path,
        mode: LoadMode,
        keep_position_assignment: bool,
    ) -> Result<()> {
        let _timer = OpTimer::start("initialize");
        let state = load_state(path, mode, keep_position_assignment).map_err(|e| {
            tracing::warn!(path = %path.display(), ?mode, error = %e, "initialize failed");
            e
        })?;

        *self.state.write() = Some(state);
        tracing::info!(path = %path.display(), ?mode, "{}", self.describe());
        Ok(())
    }

    pub(super) fn update_index_impl(&self, other: &Self) -> Result<()> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        let _timer = OpTimer::start("update_index");
        let snapshot = other.state.read().clone().ok_or(Error::NotInitialized)?;
        *self.state.write() = Some(snapshot);
        tracing::info!("index state replaced from peer");
        Ok(())
    }

    pub(super) fn checkpoint_impl(&self, path: &Path) -> Result<()> {
        let _timer = OpTimer::start("checkpoint");
        let _serial = self.checkpoint_lock.lock();
        let state = self.read_state()?;

        let mut writer = CheckpointWriter::create(path)?;
        writer.write_bincode(BASE_TRANSFORMS, &state.base_transforms)?;
        writer.write_bincode(QUERY_TRANSFORMS, &state.query_transforms)?;
        if let CoarseHandle::Owned(sq) = &state.coarse {
            writer.write_bincode(COARSE_SQ, sq)?;
        }
        if let Some(base) = &state.base {
            writer.write_bincode(BASE_INDEX, base)?;
        }
        if let Some(qp) = &state.query_path {
            writer.write_bincode(QUERY_PATH, qp)?;
        }
        if let Some(refine) = &state.refine {
            writer.write_bincode(REFINE_INDEX, refine)?;
        }
        writer.write_bincode(ID_MAPPING, &state.mapping)?;

        let mut deleted = Vec::new();
        state.deleted.write_to(&mut deleted)?;
        writer.write_bytes(DELETED, &deleted)?;

        let params = ParamsDocument {
            search: Some(state.defaults.clone()),
            rerank: Some(state.rerank.clone()),
            query_transforms: None,
            query_quantizer: None,
        };
        writer.write_bytes(PARAMS, params.render()?.as_bytes())?;

        writer.publish(
            KIND,
            ManifestFlags {
                use_ivf_sq: state.coarse.is_owned(),
                has_base: state.base.is_some(),
                has_refine: state.refine.is_some(),
                has_query_path: state.query_path.is_some(),
                use_refine_sq: state.refine.as_ref().is_some_and(FlatRefineIndex::is_quantized),
            },
        )
    }

    pub(super) fn get_params_impl(&self) -> Result<String> {
        let state = self.read_state()?;
        let doc = ParamsDocument {
            search: Some(state.defaults.clone()),
            rerank: Some(state.rerank.clone()),
            query_transforms: (!state.query_transforms.is_empty())
                .then(|| state.query_transforms.clone()),
            query_quantizer: state.query_path.as_ref().map(QueryPath::to_params),
        };
        doc.render()
    }

    /// Validates the whole document against the stored shapes before
    /// touching anything; absent groups keep their current value.
    pub(super) fn update_params_impl(&self, text: &str) -> Result<()> {
        let doc = ParamsDocument::parse(text)?;
        let guard = self.state.upgradable_read();
        let state = guard.as_ref().ok_or(Error::NotInitialized)?;

        if let Some(chain) = &doc.query_transforms {
            chain.check_dims(state.input_dim(), state.base_dim())?;
        }

        let query_path = match doc.query_quantizer {
            Some(p) => {
                let qp = QueryPath::try_from(p)?;
                qp.check_compatible(state.base()?)?;
                Some(qp)
            }
            None => None,
        };

        let search: Option<SearchConfig> = doc.search;
        let wants_query_path = search
            .as_ref()
            .map_or(state.defaults.use_query_path, |s| s.use_query_path);
        if wants_query_path && query_path.is_none() && state.query_path.is_none() {
            return Err(Error::InvalidParams(
                "use_query_path is set but no query quantizer is configured".to_string(),
            ));
        }
        let rerank: Option<RerankConfig> = doc.rerank;

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        let state = guard
            .as_mut()
            .ok_or_else(|| Error::Internal("index state vanished during update".to_string()))?;
        if let Some(s) = search {
            state.defaults = s;
        }
        if let Some(r) = rerank {
            state.rerank = r;
        }
        if let Some(chain) = doc.query_transforms {
            state.query_transforms = chain;
        }
        if let Some(qp) = query_path {
            state.query_path = Some(qp);
        }

        tracing::info!(
            nprobe = state.defaults.nprobe,
            k_factor = state.defaults.k_factor,
            use_query_path = state.defaults.use_query_path,
            "parameters updated"
        );
        Ok(())
    }
}
