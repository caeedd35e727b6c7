use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use hive_codec::PublishRecord;
use hive_core::Guid;
use parking_lot::RwLock;
use thiserror::Error;

/// Directory under the spool root that holds publisher files.
pub const PUBLISHERS_DIR: &str = "object-publishers";
/// Hex digits of the object id used to name the shard directory.
const SHARD_PREFIX_LEN: usize = 5;

/// Errors returned by publisher set persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("publisher store io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode publishers of {object_id}: {reason}")]
    Encode { object_id: Guid, reason: String },
    #[error("failed to decode publishers of {object_id}: {reason}")]
    Decode { object_id: Guid, reason: String },
}

/// Keyed persistence for publisher sets.
///
/// Implementations need not be safe for concurrent writers to the same key; callers
/// serialize access per object id.
pub trait PublisherStore: Send + Sync {
    fn get(&self, object_id: &Guid) -> Result<Option<HashSet<PublishRecord>>, StoreError>;
    fn put(&self, object_id: &Guid, records: &HashSet<PublishRecord>) -> Result<(), StoreError>;
    /// Removes the entry; removing an absent key is not an error.
    fn remove(&self, object_id: &Guid) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<Guid>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryPublisherStore {
    sets: RwLock<HashMap<Guid, HashSet<PublishRecord>>>,
}

impl MemoryPublisherStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PublisherStore for MemoryPublisherStore {
    fn get(&self, object_id: &Guid) -> Result<Option<HashSet<PublishRecord>>, StoreError> {
        Ok(self.sets.read().get(object_id).cloned())
    }

    fn put(&self, object_id: &Guid, records: &HashSet<PublishRecord>) -> Result<(), StoreError> {
        self.sets.write().insert(*object_id, records.clone());
        Ok(())
    }

    fn remove(&self, object_id: &Guid) -> Result<(), StoreError> {
        self.sets.write().remove(object_id);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<Guid>, StoreError> {
        Ok(self.sets.read().keys().copied().collect())
    }
}

/// One CBOR file per object id, sharded by the leading hex digits of the id.
///
/// Layout: `<root>/object-publishers/<first 5 hex digits>/<hex id>`. Writes go to a
/// temporary sibling and are renamed into place.
#[derive(Debug, Clone)]
pub struct FilePublisherStore {
    dir: PathBuf,
}

impl FilePublisherStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = root.as_ref().join(PUBLISHERS_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that holds the publishers of `object_id`.
    pub fn path_for(&self, object_id: &Guid) -> PathBuf {
        let hex = object_id.to_hex();
        self.dir.join(&hex[..SHARD_PREFIX_LEN]).join(hex)
    }
}

impl PublisherStore for FilePublisherStore {
    fn get(&self, object_id: &Guid) -> Result<Option<HashSet<PublishRecord>>, StoreError> {
        let bytes = match fs::read(self.path_for(object_id)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let records: Vec<PublishRecord> =
            ciborium::from_reader(bytes.as_slice()).map_err(|err| StoreError::Decode {
                object_id: *object_id,
                reason: err.to_string(),
            })?;
        Ok(Some(records.into_iter().collect()))
    }

    fn put(&self, object_id: &Guid, records: &HashSet<PublishRecord>) -> Result<(), StoreError> {
        let mut sorted: Vec<&PublishRecord> = records.iter().collect();
        sorted.sort_by_key(|record| record.publisher_id());
        let mut bytes = Vec::new();
        ciborium::into_writer(&sorted, &mut bytes).map_err(|err| StoreError::Encode {
            object_id: *object_id,
            reason: err.to_string(),
        })?;

        let path = self.path_for(object_id);
        if let Some(shard) = path.parent() {
            fs::create_dir_all(shard)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, object_id: &Guid) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(object_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self) -> Result<Vec<Guid>, StoreError> {
        let mut keys = Vec::new();
        for shard in fs::read_dir(&self.dir)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let name = entry?.file_name();
                // Leftover temporaries and foreign files are not keys.
                if let Some(object_id) = name.to_str().and_then(|name| Guid::from_hex(name).ok()) {
                    keys.push(object_id);
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;

    use hive_codec::{ObjectMetadata, PublishRecord};
    use hive_core::{Guid, NodeAddress};

    use super::{FilePublisherStore, MemoryPublisherStore, PublisherStore, StoreError};

    fn record(object_id: Guid) -> PublishRecord {
        let publisher = NodeAddress::new(Guid::random(), "10.0.0.1", 12001);
        PublishRecord::new(object_id, publisher, ObjectMetadata::new(), 1_000)
    }

    fn exercise(store: &dyn PublisherStore) {
        let object_id = Guid::random();
        assert!(store
            .get(&object_id)
            .expect("missing key should read")
            .is_none());

        let records: HashSet<_> = [record(object_id), record(object_id)].into_iter().collect();
        store.put(&object_id, &records).expect("put should succeed");
        let loaded = store
            .get(&object_id)
            .expect("get should succeed")
            .expect("key should exist");
        assert_eq!(loaded, records);
        assert_eq!(store.keys().expect("keys should list"), vec![object_id]);

        store.remove(&object_id).expect("remove should succeed");
        store.remove(&object_id).expect("second remove should be a no-op");
        assert!(store.keys().expect("keys should list").is_empty());
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryPublisherStore::new());
    }

    #[test]
    fn file_store_contract() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        exercise(&FilePublisherStore::open(dir.path()).expect("store should open"));
    }

    #[test]
    fn file_store_shards_by_hex_prefix() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let store = FilePublisherStore::open(dir.path()).expect("store should open");
        let object_id = Guid::from_hex(&format!("ABCDE{}", "0".repeat(59)))
            .expect("hex should parse");
        let records: HashSet<_> = [record(object_id)].into_iter().collect();
        store.put(&object_id, &records).expect("put should succeed");

        let expected = dir
            .path()
            .join("object-publishers")
            .join("ABCDE")
            .join(object_id.to_hex());
        assert_eq!(store.path_for(&object_id), expected);
        assert!(expected.is_file());
        assert!(!expected.with_extension("tmp").exists());
    }

    #[test]
    fn corrupt_file_reports_decode_error() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let store = FilePublisherStore::open(dir.path()).expect("store should open");
        let object_id = Guid::random();
        let path = store.path_for(&object_id);
        fs::create_dir_all(path.parent().expect("path should have a shard dir"))
            .expect("shard dir should be created");
        fs::write(&path, b"\xff\x00 not cbor").expect("corrupt file should be written");

        let err = store
            .get(&object_id)
            .expect_err("corrupt file should not decode");
        assert!(matches!(err, StoreError::Decode { object_id: id, .. } if id == object_id));
    }
}
