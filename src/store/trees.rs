use super::{CrossProcessLock, PersistentIndexedCache, StoreError};
use crate::model::{FileTreeSnapshot, HashCode, TreeId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

const TREE_ID_COUNTER_FILE: &str = "nextTreeId";

/// One stored tree and the number of records pointing at it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct TreeBlob {
    references: u32,
    tree: FileTreeSnapshot,
}

/// The blob side of the record indirection: file trees live here under stable
/// integer ids, records carry only the ids.
///
/// Blobs are deduplicated by aggregate hash and reference-counted, so the outputs of
/// one task and the inputs of another share a single stored tree, and a tree is
/// removed only when the last record referencing it is superseded.
#[derive(Debug)]
pub struct FileTreeRepository {
    blobs: PersistentIndexedCache<TreeId, TreeBlob>,
    index: PersistentIndexedCache<HashCode, TreeId>,
    counter_path: PathBuf,
    lock: CrossProcessLock,
    process_lock: Arc<Mutex<()>>,
}

impl FileTreeRepository {
    pub(crate) fn new(
        store_root: &Path,
        blob_cache: &str,
        index_cache: &str,
        lock: CrossProcessLock,
        process_lock: Arc<Mutex<()>>,
        format_version: u32,
    ) -> Result<Self, StoreError> {
        // Blobs are reference-counted, never evicted by count.
        let blobs = PersistentIndexedCache::new(
            store_root,
            blob_cache,
            lock.clone(),
            process_lock.clone(),
            format_version,
            usize::MAX,
            false,
        )?;
        let index = PersistentIndexedCache::new(
            store_root,
            index_cache,
            lock.clone(),
            process_lock.clone(),
            format_version,
            usize::MAX,
            false,
        )?;
        Ok(Self {
            blobs,
            index,
            counter_path: store_root.join(TREE_ID_COUNTER_FILE),
            lock,
            process_lock,
        })
    }

    /// Store a tree, or bump the reference count of an existing blob with the same
    /// content. Returns the blob id for the record to embed.
    #[tracing::instrument(name = "FileTreeRepository::add", skip_all)]
    pub async fn add(&self, tree: &FileTreeSnapshot) -> Result<TreeId, StoreError> {
        let _process = self.process_lock.lock().unwrap();
        let _guard = self.lock.exclusive()?;

        let hash = tree.hash();
        if let Some(id) = self.index.load(&hash)? {
            if let Some(mut blob) = self.blobs.load(&id)? {
                blob.references += 1;
                self.blobs.save(&id, &blob)?;
                debug!(%hash, id, references = blob.references, "shared existing tree blob");
                return Ok(id);
            }
        }

        let id = self.next_id()?;
        self.blobs.save(
            &id,
            &TreeBlob {
                references: 1,
                tree: tree.clone(),
            },
        )?;
        self.index.save(&hash, &id)?;
        debug!(%hash, id, "stored new tree blob");
        Ok(id)
    }

    pub async fn get(&self, id: TreeId) -> Result<Option<Arc<FileTreeSnapshot>>, StoreError> {
        let _process = self.process_lock.lock().unwrap();
        let _guard = self.lock.shared()?;
        Ok(self.blobs.load(&id)?.map(|blob| Arc::new(blob.tree)))
    }

    /// Drop one reference. The blob and its index entry disappear with the last one.
    pub async fn release(&self, id: TreeId) -> Result<(), StoreError> {
        let _process = self.process_lock.lock().unwrap();
        let _guard = self.lock.exclusive()?;

        let Some(mut blob) = self.blobs.load(&id)? else {
            return Ok(());
        };
        if blob.references <= 1 {
            let hash = blob.tree.hash();
            self.blobs.delete(&id)?;
            self.index.delete(&hash)?;
            debug!(id, "removed unreferenced tree blob");
        } else {
            blob.references -= 1;
            self.blobs.save(&id, &blob)?;
        }
        Ok(())
    }

    fn next_id(&self) -> Result<TreeId, StoreError> {
        let current = match std::fs::read_to_string(&self.counter_path) {
            Ok(contents) => contents.trim().parse::<TreeId>().unwrap_or(0),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => {
                return Err(StoreError::CouldNotReadEntry {
                    err,
                    cache: "treeIds".to_string(),
                    path: self.counter_path.clone(),
                })
            }
        };
        let next = current + 1;
        std::fs::write(&self.counter_path, format!("{next}\n")).map_err(|err| {
            StoreError::CouldNotWriteEntry {
                err,
                cache: "treeIds".to_string(),
                path: self.counter_path.clone(),
            }
        })?;
        Ok(next)
    }
}
