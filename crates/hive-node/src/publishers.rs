use std::collections::HashSet;

use hive_codec::PublishRecord;
use hive_core::Guid;
use thiserror::Error;
use tracing::{debug, warn};

use crate::locks::{KeyLocks, LockError};
use crate::store::{MemoryPublisherStore, PublisherStore, StoreError};

#[derive(Debug, Error)]
pub enum PublishersError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one [`Publishers::expire`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpireStats {
    pub keys_scanned: usize,
    pub records_expired: usize,
    /// Keys whose last record expired.
    pub keys_removed: usize,
    /// Keys discarded because their stored set could not be read or rewritten.
    pub keys_dropped: usize,
}

/// Back-pointer table: object id to the set of nodes publishing it.
///
/// Every mutation of a key runs under that key's lock, so concurrent publish and
/// unpublish traffic for one object is serialized while other objects proceed in
/// parallel. A key is never stored with an empty set.
pub struct Publishers {
    store: Box<dyn PublisherStore>,
    locks: KeyLocks,
}

impl Default for Publishers {
    fn default() -> Self {
        Self::new(MemoryPublisherStore::new())
    }
}

impl Publishers {
    pub fn new(store: impl PublisherStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            locks: KeyLocks::new(),
        }
    }

    /// Snapshot of the publishers of `object_id`.
    ///
    /// The set is copied under the key lock. An unreadable entry is dropped from the
    /// table and reported as empty.
    pub fn get_publishers(&self, object_id: &Guid) -> HashSet<PublishRecord> {
        let _guard = match self.locks.lock(*object_id) {
            Ok(guard) => guard,
            Err(err) => {
                warn!(%object_id, error = %err, "cannot lock publisher set for reading");
                return HashSet::new();
            }
        };
        match self.store.get(object_id) {
            Ok(records) => records.unwrap_or_default(),
            Err(err) => {
                warn!(%object_id, error = %err, "unreadable publisher set, dropping key");
                self.drop_key(object_id);
                HashSet::new()
            }
        }
    }

    /// Inserts `record`, replacing any record from the same publisher for the same object.
    pub fn update(&self, record: PublishRecord) -> Result<(), PublishersError> {
        let object_id = record.object_id;
        let _guard = self.locks.lock(object_id)?;
        let mut records = self.load(&object_id)?;
        records.replace(record);
        self.save(&object_id, &records)
    }

    /// Merges `records` into the set for `object_id`. Records for other objects are ignored.
    pub fn update_all(
        &self,
        object_id: Guid,
        records: impl IntoIterator<Item = PublishRecord>,
    ) -> Result<(), PublishersError> {
        let _guard = self.locks.lock(object_id)?;
        let mut current = self.load(&object_id)?;
        for record in records {
            if record.object_id != object_id {
                debug!(%object_id, other = %record.object_id, "skipping record for another object");
                continue;
            }
            current.replace(record);
        }
        self.save(&object_id, &current)
    }

    /// Withdraws `publisher_id`'s record for `object_id`. Returns whether one existed.
    pub fn remove(&self, object_id: &Guid, publisher_id: &Guid) -> Result<bool, PublishersError> {
        let _guard = self.locks.lock(*object_id)?;
        let mut records = self.load(object_id)?;
        let before = records.len();
        records.retain(|record| record.publisher_id() != *publisher_id);
        if records.len() == before {
            return Ok(false);
        }
        self.save(object_id, &records)?;
        Ok(true)
    }

    /// Drops every record for `object_id`.
    pub fn remove_object(&self, object_id: &Guid) -> Result<(), PublishersError> {
        let _guard = self.locks.lock(*object_id)?;
        self.store.remove(object_id)?;
        Ok(())
    }

    /// Removes records whose expiry is not after `now_seconds`.
    ///
    /// Keys are visited one at a time. A key that cannot be read or rewritten is
    /// dropped and the sweep continues.
    pub fn expire(&self, now_seconds: i64) -> Result<ExpireStats, PublishersError> {
        let mut stats = ExpireStats::default();
        for object_id in self.store.keys()? {
            stats.keys_scanned += 1;
            let _guard = match self.locks.lock(object_id) {
                Ok(guard) => guard,
                Err(err) => {
                    warn!(%object_id, error = %err, "skipping key during expiry");
                    continue;
                }
            };
            let records = match self.store.get(&object_id) {
                Ok(Some(records)) => records,
                Ok(None) => continue,
                Err(err) => {
                    warn!(%object_id, error = %err, "unreadable publisher set, dropping key");
                    self.drop_key(&object_id);
                    stats.keys_dropped += 1;
                    continue;
                }
            };
            let before = records.len();
            let live: HashSet<_> = records
                .into_iter()
                .filter(|record| record.is_live(now_seconds))
                .collect();
            if live.len() == before {
                continue;
            }
            if let Err(err) = self.save(&object_id, &live) {
                warn!(%object_id, error = %err, "cannot write swept publisher set, dropping key");
                self.drop_key(&object_id);
                stats.keys_dropped += 1;
                continue;
            }
            stats.records_expired += before - live.len();
            if live.is_empty() {
                stats.keys_removed += 1;
            }
        }
        if stats.records_expired > 0 || stats.keys_dropped > 0 {
            debug!(?stats, "publisher expiry sweep");
        }
        Ok(stats)
    }

    pub fn object_ids(&self) -> Result<Vec<Guid>, PublishersError> {
        Ok(self.store.keys()?)
    }

    /// Number of objects with at least one publisher.
    pub fn len(&self) -> Result<usize, PublishersError> {
        Ok(self.store.keys()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, PublishersError> {
        Ok(self.len()? == 0)
    }

    fn load(&self, object_id: &Guid) -> Result<HashSet<PublishRecord>, PublishersError> {
        Ok(self.store.get(object_id)?.unwrap_or_default())
    }

    /// Caller must hold the key lock.
    fn drop_key(&self, object_id: &Guid) {
        if let Err(err) = self.store.remove(object_id) {
            warn!(%object_id, error = %err, "failed to drop publisher set");
        }
    }

    fn save(
        &self,
        object_id: &Guid,
        records: &HashSet<PublishRecord>,
    ) -> Result<(), PublishersError> {
        if records.is_empty() {
            self.store.remove(object_id)?;
        } else {
            self.store.put(object_id, records)?;
        }
        Ok(())
    }
}
