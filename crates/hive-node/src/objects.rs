use std::collections::HashMap;

use bytes::Bytes;
use hive_core::Guid;
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("object store full: need {needed} bytes, {available} available")]
    OutOfSpace { needed: u64, available: u64 },
}

/// Objects held by this node, keyed by object id.
pub trait ObjectStore: Send + Sync {
    fn contains(&self, object_id: &Guid) -> bool;
    fn get(&self, object_id: &Guid) -> Option<Bytes>;
    /// Stores `data`, replacing any previous value.
    fn put(&self, object_id: Guid, data: Bytes) -> Result<(), ObjectStoreError>;
    /// Returns whether the object was present.
    fn remove(&self, object_id: &Guid) -> bool;
    fn object_ids(&self) -> Vec<Guid>;
}

#[derive(Debug, Default)]
struct Objects {
    data: HashMap<Guid, Bytes>,
    used: u64,
}

/// In-memory object store with an optional byte capacity.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    capacity: Option<u64>,
    objects: RwLock<Objects>,
}

impl MemoryObjectStore {
    /// `capacity` bounds total stored bytes; `None` is unbounded.
    pub fn new(capacity: Option<u64>) -> Self {
        Self {
            capacity,
            objects: RwLock::new(Objects::default()),
        }
    }

    pub fn used_bytes(&self) -> u64 {
        self.objects.read().used
    }

    pub fn available_bytes(&self) -> Option<u64> {
        self.capacity
            .map(|capacity| capacity.saturating_sub(self.used_bytes()))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn contains(&self, object_id: &Guid) -> bool {
        self.objects.read().data.contains_key(object_id)
    }

    fn get(&self, object_id: &Guid) -> Option<Bytes> {
        self.objects.read().data.get(object_id).cloned()
    }

    fn put(&self, object_id: Guid, data: Bytes) -> Result<(), ObjectStoreError> {
        let mut objects = self.objects.write();
        let replaced = objects
            .data
            .get(&object_id)
            .map_or(0, |old| old.len() as u64);
        let needed = data.len() as u64;
        if let Some(capacity) = self.capacity {
            let available = capacity.saturating_sub(objects.used - replaced);
            if needed > available {
                return Err(ObjectStoreError::OutOfSpace { needed, available });
            }
        }
        objects.used = objects.used - replaced + needed;
        objects.data.insert(object_id, data);
        Ok(())
    }

    fn remove(&self, object_id: &Guid) -> bool {
        let mut objects = self.objects.write();
        match objects.data.remove(object_id) {
            Some(old) => {
                objects.used -= old.len() as u64;
                true
            }
            None => false,
        }
    }

    fn object_ids(&self) -> Vec<Guid> {
        self.objects.read().data.keys().copied().collect()
    }
}
