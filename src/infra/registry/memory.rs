//! In-memory resource registry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::core::resource::{Resource, ResourceCell, ResourceRegistry, SharedResource};
use crate::core::{RtResult, RuntimeError};
use crate::util::ids::{ResourceKey, ResourcePath};

struct Slot {
    resource: SharedResource,
    paths: BTreeSet<ResourcePath>,
    acquired: usize,
}

#[derive(Default)]
struct Storage {
    resources: HashMap<ResourceKey, Slot>,
    paths: BTreeMap<ResourcePath, ResourceKey>,
}

impl Storage {
    fn insert(
        &mut self,
        path: &ResourcePath,
        resource: Box<dyn Resource>,
        acquired: usize,
    ) -> RtResult<SharedResource> {
        if self.paths.contains_key(path) {
            return Err(RuntimeError::DuplicatePath(path.to_string()));
        }
        let key = resource.key();
        if self.resources.contains_key(&key) {
            return Err(RuntimeError::operation(format!("resource {key} already registered")));
        }

        let cell = Arc::new(ResourceCell::new(resource));
        self.paths.insert(path.clone(), key);
        self.resources.insert(
            key,
            Slot {
                resource: Arc::clone(&cell),
                paths: BTreeSet::from([path.clone()]),
                acquired,
            },
        );
        Ok(cell)
    }

    fn pin(&mut self, key: ResourceKey) -> RtResult<SharedResource> {
        let slot = self
            .resources
            .get_mut(&key)
            .ok_or_else(|| RuntimeError::ResourceNotFound(key.to_string()))?;
        slot.acquired += 1;
        Ok(Arc::clone(&slot.resource))
    }

    fn remove(&mut self, key: ResourceKey) -> Option<Slot> {
        let slot = self.resources.remove(&key)?;
        for path in &slot.paths {
            self.paths.remove(path);
        }
        Some(slot)
    }
}

/// Resource registry held entirely in memory.
///
/// A resource may be reachable at several paths. Pins are counted per
/// resource so callers can check that every acquire was released.
#[derive(Default)]
pub struct InMemoryResourceRegistry {
    storage: RwLock<Storage>,
}

impl std::fmt::Debug for InMemoryResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryResourceRegistry")
            .field("resources", &self.len())
            .finish()
    }
}

impl InMemoryResourceRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.read().resources.len()
    }

    /// Whether no resources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.read().resources.is_empty()
    }

    /// Keys of every live resource, in no particular order.
    #[must_use]
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.storage.read().resources.keys().copied().collect()
    }

    /// Paths at which `key` is reachable.
    #[must_use]
    pub fn paths_of(&self, key: ResourceKey) -> Vec<ResourcePath> {
        self.storage
            .read()
            .resources
            .get(&key)
            .map(|slot| slot.paths.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Outstanding pins on `key`; zero for unknown keys.
    #[must_use]
    pub fn acquired_count(&self, key: ResourceKey) -> usize {
        self.storage
            .read()
            .resources
            .get(&key)
            .map_or(0, |slot| slot.acquired)
    }

    /// Outstanding pins across every resource.
    #[must_use]
    pub fn total_acquired(&self) -> usize {
        self.storage
            .read()
            .resources
            .values()
            .map(|slot| slot.acquired)
            .sum()
    }
}

impl ResourceRegistry for InMemoryResourceRegistry {
    fn contains(&self, key: ResourceKey) -> bool {
        self.storage.read().resources.contains_key(&key)
    }

    fn key_at(&self, path: &ResourcePath) -> Option<ResourceKey> {
        self.storage.read().paths.get(path).copied()
    }

    fn get_and_lock_by_key(&self, key: ResourceKey) -> RtResult<SharedResource> {
        self.storage.write().pin(key)
    }

    fn get_and_lock_by_path(&self, path: &ResourcePath) -> RtResult<SharedResource> {
        let mut storage = self.storage.write();
        let key = storage
            .paths
            .get(path)
            .copied()
            .ok_or_else(|| RuntimeError::ResourceNotFound(path.to_string()))?;
        storage.pin(key)
    }

    fn release(&self, resource: SharedResource) {
        let mut storage = self.storage.write();
        match storage.resources.get_mut(&resource.key()) {
            Some(slot) if Arc::ptr_eq(&slot.resource, &resource) => {
                if slot.acquired == 0 {
                    warn!(key = %resource.key(), "Release without matching acquire");
                } else {
                    slot.acquired -= 1;
                }
            }
            // Destroyed while pinned; nothing left to count against.
            _ => {}
        }
    }

    fn destroy(&self, key: ResourceKey) -> RtResult<()> {
        let slot = self
            .storage
            .write()
            .remove(key)
            .ok_or_else(|| RuntimeError::ResourceNotFound(key.to_string()))?;
        slot.resource.close();
        debug!(key = %key, pinned = slot.acquired, "Resource removed");
        Ok(())
    }

    fn add(&self, path: &ResourcePath, resource: Box<dyn Resource>) -> RtResult<ResourceKey> {
        let cell = self.storage.write().insert(path, resource, 0)?;
        Ok(cell.key())
    }

    fn add_and_lock(
        &self,
        path: &ResourcePath,
        resource: Box<dyn Resource>,
    ) -> RtResult<SharedResource> {
        self.storage.write().insert(path, resource, 1)
    }

    fn remove_and_close_all(&self) -> usize {
        let drained: Vec<Slot> = {
            let mut storage = self.storage.write();
            storage.paths.clear();
            storage.resources.drain().map(|(_, slot)| slot).collect()
        };
        for slot in &drained {
            slot.resource.close();
        }
        drained.len()
    }

    fn link_path(&self, key: ResourceKey, path: &ResourcePath) -> RtResult<()> {
        let mut storage = self.storage.write();
        if storage.paths.contains_key(path) {
            return Err(RuntimeError::DuplicatePath(path.to_string()));
        }
        let slot = storage
            .resources
            .get_mut(&key)
            .ok_or_else(|| RuntimeError::ResourceNotFound(key.to_string()))?;
        slot.paths.insert(path.clone());
        storage.paths.insert(path.clone(), key);
        Ok(())
    }

    fn unlink_path(&self, path: &ResourcePath) -> RtResult<()> {
        let orphan = {
            let mut storage = self.storage.write();
            let key = storage
                .paths
                .remove(path)
                .ok_or_else(|| RuntimeError::ResourceNotFound(path.to_string()))?;
            let unreachable = storage.resources.get_mut(&key).is_some_and(|slot| {
                slot.paths.remove(path);
                slot.paths.is_empty()
            });
            if unreachable {
                storage.remove(key)
            } else {
                None
            }
        };
        if let Some(slot) = orphan {
            debug!(key = %slot.resource.key(), "Last path unlinked, closing resource");
            slot.resource.close();
        }
        Ok(())
    }
}
