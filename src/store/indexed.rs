use super::{CrossProcessLock, StoreError};
use crate::model::HashCode;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const ENTRY_MAGIC: [u8; 4] = *b"ddhx";
const ENTRY_HEADER_LEN: usize = 8;

/// A keyed, disk-backed map with cross-process semantics.
///
/// One file per entry, named by the hash of the key. Every entry carries a magic tag
/// and a format version; entries written by an incompatible engine read back as
/// absent rather than as errors, so stale caches degrade to a cold start. Writes go
/// through a temp file and a rename, so a crashed writer never leaves a torn entry.
#[derive(Debug)]
pub struct PersistentIndexedCache<K: Eq + Hash, V> {
    name: String,
    dir: PathBuf,
    lock: CrossProcessLock,
    process_lock: Arc<Mutex<()>>,
    format_version: u32,
    max_entries: usize,
    memory: Option<DashMap<K, Arc<V>>>,
}

impl<K, V> PersistentIndexedCache<K, V>
where
    K: Serialize + DeserializeOwned + PartialEq + Eq + Hash + Clone + std::fmt::Debug,
    V: Serialize + DeserializeOwned,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store_root: &std::path::Path,
        name: &str,
        lock: CrossProcessLock,
        process_lock: Arc<Mutex<()>>,
        format_version: u32,
        max_entries: usize,
        cache_in_memory: bool,
    ) -> Result<Self, StoreError> {
        let dir = store_root.join(name);
        std::fs::create_dir_all(&dir).map_err(|err| StoreError::CouldNotCreateStore {
            err,
            dir: dir.clone(),
        })?;
        Ok(Self {
            name: name.to_string(),
            dir,
            lock,
            process_lock,
            format_version,
            max_entries,
            memory: cache_in_memory.then(DashMap::new),
        })
    }

    pub async fn get(&self, key: &K) -> Result<Option<Arc<V>>, StoreError> {
        if let Some(memory) = &self.memory {
            if let Some(hit) = memory.get(key) {
                return Ok(Some(hit.value().clone()));
            }
        }

        let value = {
            let _process = self.process_lock.lock().unwrap();
            let _guard = self.lock.shared()?;
            self.load(key)?
        };

        match value {
            None => Ok(None),
            Some(value) => {
                let value = Arc::new(value);
                if let Some(memory) = &self.memory {
                    memory.insert(key.clone(), value.clone());
                }
                Ok(Some(value))
            }
        }
    }

    pub async fn put(&self, key: &K, value: V) -> Result<(), StoreError> {
        {
            let _process = self.process_lock.lock().unwrap();
            let _guard = self.lock.exclusive()?;
            self.save(key, &value)?;
            self.enforce_max_entries()?;
        }
        if let Some(memory) = &self.memory {
            memory.insert(key.clone(), Arc::new(value));
        }
        Ok(())
    }

    pub async fn remove(&self, key: &K) -> Result<(), StoreError> {
        {
            let _process = self.process_lock.lock().unwrap();
            let _guard = self.lock.exclusive()?;
            self.delete(key)?;
        }
        if let Some(memory) = &self.memory {
            memory.remove(key);
        }
        Ok(())
    }

    /// Read an entry without taking any locks. For compound store operations that
    /// already hold the exclusive lock.
    pub(crate) fn load(&self, key: &K) -> Result<Option<V>, StoreError> {
        let path = self.entry_path(key)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StoreError::CouldNotReadEntry {
                    err,
                    cache: self.name.clone(),
                    path,
                })
            }
        };

        if bytes.len() < ENTRY_HEADER_LEN || bytes[..4] != ENTRY_MAGIC {
            warn!(cache = %self.name, ?path, "discarding unrecognized cache entry");
            return Ok(None);
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != self.format_version {
            debug!(
                cache = %self.name,
                entry_version = version,
                expected = self.format_version,
                "discarding cache entry with an incompatible version"
            );
            return Ok(None);
        }

        match bincode::deserialize::<(K, V)>(&bytes[ENTRY_HEADER_LEN..]) {
            Ok((stored_key, value)) if stored_key == *key => Ok(Some(value)),
            Ok((stored_key, _)) => {
                warn!(
                    cache = %self.name,
                    ?stored_key,
                    expected = ?key,
                    "cache entry key collision; treating as absent"
                );
                Ok(None)
            }
            Err(err) => {
                warn!(cache = %self.name, ?path, %err, "discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    /// Write an entry without taking any locks; see [Self::load].
    pub(crate) fn save(&self, key: &K, value: &V) -> Result<(), StoreError> {
        let path = self.entry_path(key)?;
        let payload =
            bincode::serialize(&(key, value)).map_err(|err| StoreError::CouldNotEncodeEntry {
                err,
                cache: self.name.clone(),
            })?;

        let mut bytes = Vec::with_capacity(ENTRY_HEADER_LEN + payload.len());
        bytes.extend_from_slice(&ENTRY_MAGIC);
        bytes.extend_from_slice(&self.format_version.to_le_bytes());
        bytes.extend_from_slice(&payload);

        let staging = path.with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&staging, &bytes).map_err(|err| StoreError::CouldNotWriteEntry {
            err,
            cache: self.name.clone(),
            path: staging.clone(),
        })?;
        std::fs::rename(&staging, &path).map_err(|err| StoreError::CouldNotWriteEntry {
            err,
            cache: self.name.clone(),
            path,
        })
    }

    /// Delete an entry without taking any locks; see [Self::load].
    pub(crate) fn delete(&self, key: &K) -> Result<(), StoreError> {
        let path = self.entry_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::CouldNotWriteEntry {
                err,
                cache: self.name.clone(),
                path,
            }),
        }
    }

    fn entry_path(&self, key: &K) -> Result<PathBuf, StoreError> {
        let key_bytes =
            bincode::serialize(key).map_err(|err| StoreError::CouldNotEncodeEntry {
                err,
                cache: self.name.clone(),
            })?;
        Ok(self.dir.join(HashCode::of(&key_bytes).hex()))
    }

    fn enforce_max_entries(&self) -> Result<(), StoreError> {
        if self.max_entries == usize::MAX {
            return Ok(());
        }
        let read_dir = std::fs::read_dir(&self.dir).map_err(|err| StoreError::CouldNotReadEntry {
            err,
            cache: self.name.clone(),
            path: self.dir.clone(),
        })?;

        let mut entries: Vec<(std::time::SystemTime, PathBuf)> = vec![];
        for entry in read_dir.flatten() {
            let path = entry.path();
            if let Ok(metadata) = entry.metadata() {
                let modified = metadata.modified().unwrap_or(std::time::UNIX_EPOCH);
                entries.push((modified, path));
            }
        }
        if entries.len() <= self.max_entries {
            return Ok(());
        }

        entries.sort();
        let excess = entries.len() - self.max_entries;
        for (_, path) in entries.into_iter().take(excess) {
            debug!(cache = %self.name, ?path, "evicting oldest cache entry");
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }
}
