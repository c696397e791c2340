use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::backend::{Backend, BackendSelection};

use super::backend::{InferenceEngine, ModelLoader};

/// Model loaders keyed by backend.
///
/// Dispatches `load` on `BackendSelection::backend`. A fallback loader, when
/// set, handles every backend without a dedicated entry.
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: HashMap<Backend, Arc<dyn ModelLoader>>,
    fallback: Option<Arc<dyn ModelLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loader for one backend, replacing any previous entry.
    pub fn register<L: ModelLoader + 'static>(&mut self, backend: Backend, loader: L) {
        self.loaders.insert(backend, Arc::new(loader));
    }

    /// Loader used for backends without a dedicated entry.
    pub fn with_fallback<L: ModelLoader + 'static>(mut self, loader: L) -> Self {
        self.fallback = Some(Arc::new(loader));
        self
    }

    fn loader_for(&self, backend: Backend) -> Option<&Arc<dyn ModelLoader>> {
        self.loaders.get(&backend).or(self.fallback.as_ref())
    }
}

impl ModelLoader for LoaderRegistry {
    fn load(&self, selection: &BackendSelection) -> Result<Box<dyn InferenceEngine>> {
        if !selection.is_usable() {
            return Err(anyhow!("no inference backend selected"));
        }
        let loader = self
            .loader_for(selection.backend)
            .ok_or_else(|| anyhow!("no model loader registered for backend {}", selection.backend))?;
        loader.load(selection)
    }
}
