use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{SharedBuffers, SharedBuffersInfo, SharedBuffersKey};
use crate::render::backend::GpuBackend;
use crate::render::error::Result;

/// Reference counted map of shared buffer sets, keyed by shape.
#[derive(Default)]
pub struct SharedBuffersCache {
    entries: HashMap<SharedBuffersKey, Arc<SharedBuffers>>,
}

impl SharedBuffersCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the set for `info`'s shape, building it on first use, and takes
    /// a reference on it.
    pub fn acquire(
        &mut self,
        info: &SharedBuffersInfo,
        backend: &mut impl GpuBackend,
    ) -> Result<Arc<SharedBuffers>> {
        let key = info.key();
        let buffers = match self.entries.get(&key) {
            Some(existing) => existing.clone(),
            None => {
                let created = Arc::new(SharedBuffers::new(*info, backend)?);
                self.entries.insert(key, created.clone());
                created
            }
        };
        buffers.add_ref();
        Ok(buffers)
    }

    /// Drops one reference. The set is removed and its GPU buffers freed when
    /// the last reference goes away. Returns whether that happened.
    pub fn release(&mut self, key: SharedBuffersKey, backend: &mut impl GpuBackend) -> bool {
        let Some(buffers) = self.entries.get(&key) else {
            warn!("Release of unknown landscape shared buffers {:#x}", key.0);
            return false;
        };

        if buffers.release() > 0 {
            return false;
        }

        if let Some(buffers) = self.entries.remove(&key) {
            buffers.release_resources(backend);
        }
        debug!("Destroyed landscape shared buffers {:#x}", key.0);
        true
    }

    pub fn get(&self, key: SharedBuffersKey) -> Option<&Arc<SharedBuffers>> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: SharedBuffersKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn ref_count(&self, key: SharedBuffersKey) -> u32 {
        self.entries
            .get(&key)
            .map(|buffers| buffers.ref_count())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
