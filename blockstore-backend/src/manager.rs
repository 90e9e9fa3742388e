//! Registry of backend instances, one per variant.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::backend::Backend;
use crate::error::{BackendError, Result};
use crate::types::BackendKind;

/// Routes calls to the backend of a given kind.
///
/// Each backend sits behind its own mutex, so operations against one
/// backend run one at a time while different backends proceed independently.
#[derive(Default)]
pub struct StorageManager {
    backends: HashMap<BackendKind, Mutex<Backend>>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Register a backend, replacing any previous one of the same kind.
    pub fn register(&mut self, backend: Backend) {
        let kind = backend.kind();
        if self.backends.insert(kind, Mutex::new(backend)).is_some() {
            warn!(backend = %kind, "Replaced registered backend");
        } else {
            info!(backend = %kind, "Backend registered");
        }
    }
    
    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<BackendKind> = self.backends.keys().copied().collect();
        kinds.sort();
        kinds
    }
    
    /// Run `f` with exclusive access to the backend of `kind`.
    pub fn with_backend<R>(&self, kind: BackendKind, f: impl FnOnce(&mut Backend) -> R) -> Result<R> {
        let slot = self
            .backends
            .get(&kind)
            .ok_or_else(|| BackendError::InvalidConfig(format!("no {} backend registered", kind)))?;
        
        let mut backend = slot.lock().unwrap_or_else(|poisoned| {
            warn!(backend = %kind, "Backend lock poisoned by an earlier panic, continuing");
            poisoned.into_inner()
        });
        Ok(f(&mut backend))
    }
}
