//! Process-wide model cache.
//!
//! Loading a swap model and extracting the reference face costs seconds and
//! hundreds of megabytes, so each distinct `(model path, reference path)`
//! pair is loaded at most once per process and shared read-only by every
//! session that references it. The cache is an explicit object handed to
//! callers, not a hidden global.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{PipelineError, PipelineResult};
use crate::model::{ModelLoader, ModelSet};

/// Canonicalized cache key. Relative-path aliases of the same files resolve
/// to the same key, so `./face.jpg` and its absolute form share one load.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelKey {
    model_path: PathBuf,
    reference_path: PathBuf,
}

impl ModelKey {
    pub fn new(model_path: &Path, reference_path: &Path) -> PipelineResult<Self> {
        let model_path = canonicalize(model_path)?;
        let reference_path = canonicalize(reference_path)?;
        Ok(Self {
            model_path,
            reference_path,
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn reference_path(&self) -> &Path {
        &self.reference_path
    }
}

fn canonicalize(path: &Path) -> PipelineResult<PathBuf> {
    path.canonicalize().map_err(|e| {
        PipelineError::model_load(format!("cannot resolve {}: {}", path.display(), e))
    })
}

enum CacheSlot {
    Ready(Arc<ModelSet>),
    /// A failed load stays failed for this key until `clear()`; the original
    /// error text is replayed to every later caller.
    Failed(String),
}

impl CacheSlot {
    fn to_result(&self) -> PipelineResult<Arc<ModelSet>> {
        match self {
            CacheSlot::Ready(set) => Ok(set.clone()),
            CacheSlot::Failed(message) => Err(PipelineError::model_load(message.clone())),
        }
    }
}

pub struct ModelCache {
    loader: Box<dyn ModelLoader>,
    entries: RwLock<HashMap<ModelKey, CacheSlot>>,
    load_lock: Mutex<()>,
}

impl ModelCache {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            entries: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
        }
    }

    /// Fetch the model set for a path pair, loading it on first use.
    ///
    /// Uncontended hits take only the read lock. A miss serializes through
    /// the load lock and re-checks before loading, so concurrent first users
    /// of the same key trigger exactly one load.
    pub fn get_or_load(
        &self,
        model_path: &Path,
        reference_path: &Path,
    ) -> PipelineResult<Arc<ModelSet>> {
        let key = ModelKey::new(model_path, reference_path)?;

        if let Some(slot) = self.entries.read().get(&key) {
            return slot.to_result();
        }

        let _loading = self.load_lock.lock();
        if let Some(slot) = self.entries.read().get(&key) {
            return slot.to_result();
        }

        log::info!(
            "loading models: model={} reference={}",
            key.model_path().display(),
            key.reference_path().display()
        );
        let result = self.loader.load(&key).map(Arc::new);
        let slot = match &result {
            Ok(set) => CacheSlot::Ready(set.clone()),
            Err(e) => CacheSlot::Failed(e.to_string()),
        };
        self.entries.write().insert(key, slot);
        result
    }

    /// Drop every entry, releasing any device-resident state. Intended for
    /// process shutdown or explicit reset, not steady-state reclamation.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Count of successfully loaded entries, for operational monitoring.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|slot| matches!(slot, CacheSlot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
