mod indexed;
mod lock;
mod trees;

pub use indexed::*;
pub use lock::*;
pub use trees::*;

use crate::config::Config;
use crate::model::{TaskExecutionRecord, TaskPath};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Cache holding one execution record per task path.
pub const TASK_HISTORY_CACHE: &str = "taskHistory";
const TREE_BLOB_CACHE: &str = "fileSnapshots";
const TREE_INDEX_CACHE: &str = "treeIndex";
const STORE_VERSION_FILE: &str = "version";
const STORE_LOCK_FILE: &str = "history.lock";

/// Bumped whenever the persisted layout changes; a store written by another version
/// is wiped and rebuilt rather than misread.
pub(crate) const STORE_FORMAT_VERSION: u32 = 1;

/// The persistent home of task execution history: the record cache plus the tree
/// blob repository, sharing one cross-process lock and one store-format version.
#[derive(Debug)]
pub struct TaskHistoryStore {
    root: PathBuf,
    history: PersistentIndexedCache<TaskPath, TaskExecutionRecord>,
    trees: FileTreeRepository,
}

impl TaskHistoryStore {
    /// Open (and if necessary initialize) the store under the configured root.
    ///
    /// Any number of processes may race here; exactly one performs initialization
    /// and the rest converge on the initialized store.
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        let root = config.store_root().clone();
        let lock = CrossProcessLock::new(root.join(STORE_LOCK_FILE));
        ensure_initialized(&root, &lock)?;

        let process_lock = Arc::new(Mutex::new(()));
        let history = PersistentIndexedCache::new(
            &root,
            TASK_HISTORY_CACHE,
            lock.clone(),
            process_lock.clone(),
            STORE_FORMAT_VERSION,
            config.max_history_entries(),
            config.cache_in_memory(),
        )?;
        let trees = FileTreeRepository::new(
            &root,
            TREE_BLOB_CACHE,
            TREE_INDEX_CACHE,
            lock,
            process_lock,
            STORE_FORMAT_VERSION,
        )?;

        Ok(Self {
            root,
            history,
            trees,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn history(&self) -> &PersistentIndexedCache<TaskPath, TaskExecutionRecord> {
        &self.history
    }

    pub fn trees(&self) -> &FileTreeRepository {
        &self.trees
    }
}

fn ensure_initialized(root: &Path, lock: &CrossProcessLock) -> Result<(), StoreError> {
    loop {
        if let Some(_guard) = lock.try_exclusive()? {
            // Another process may have initialized while we waited; check again now
            // that we hold the write lock.
            if !is_initialized(root)? {
                initialize(root)?;
            }
            return Ok(());
        }

        {
            let _shared = lock.shared()?;
            // The exclusive holder may have finished by now. The predicate is
            // consulted fresh on every pass, never cached from a failed attempt.
            if is_initialized(root)? {
                return Ok(());
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn is_initialized(root: &Path) -> Result<bool, StoreError> {
    match std::fs::read_to_string(root.join(STORE_VERSION_FILE)) {
        Ok(contents) => Ok(contents.trim().parse::<u32>() == Ok(STORE_FORMAT_VERSION)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StoreError::CouldNotInitializeStore {
            err,
            dir: root.to_path_buf(),
        }),
    }
}

fn initialize(root: &Path) -> Result<(), StoreError> {
    debug!(?root, "initializing task history store");
    let recreate = |dir: PathBuf| -> Result<(), StoreError> {
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|err| StoreError::CouldNotInitializeStore {
                err,
                dir: dir.clone(),
            })?;
        }
        std::fs::create_dir_all(&dir)
            .map_err(|err| StoreError::CouldNotInitializeStore { err, dir })
    };

    for cache in [TASK_HISTORY_CACHE, TREE_BLOB_CACHE, TREE_INDEX_CACHE] {
        recreate(root.join(cache))?;
    }
    let _ = std::fs::remove_file(root.join("nextTreeId"));

    std::fs::write(
        root.join(STORE_VERSION_FILE),
        format!("{STORE_FORMAT_VERSION}\n"),
    )
    .map_err(|err| StoreError::CouldNotInitializeStore {
        err,
        dir: root.to_path_buf(),
    })
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    LockError(LockError),

    #[error("Could not create store directory {dir:?} due to {err:?}")]
    CouldNotCreateStore { err: std::io::Error, dir: PathBuf },

    #[error("Could not initialize the store at {dir:?} due to {err:?}")]
    CouldNotInitializeStore { err: std::io::Error, dir: PathBuf },

    #[error("Could not read entry {path:?} of the '{cache}' cache due to {err:?}")]
    CouldNotReadEntry {
        err: std::io::Error,
        cache: String,
        path: PathBuf,
    },

    #[error("Could not write entry {path:?} of the '{cache}' cache due to {err:?}")]
    CouldNotWriteEntry {
        err: std::io::Error,
        cache: String,
        path: PathBuf,
    },

    #[error("Could not encode an entry of the '{cache}' cache due to {err:?}")]
    CouldNotEncodeEntry { err: bincode::Error, cache: String },
}

impl From<LockError> for StoreError {
    fn from(value: LockError) -> Self {
        StoreError::LockError(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> Config {
        Config::builder()
            .invocation_dir(root.to_path_buf())
            .store_root(root.join("history"))
            .build()
            .unwrap()
    }

    #[test]
    fn opening_initializes_an_empty_store() {
        let dir = assert_fs::TempDir::new().unwrap();
        let config = config(dir.path());

        let store = TaskHistoryStore::open(&config).unwrap();
        assert!(store.root().join(STORE_VERSION_FILE).exists());
        assert!(store.root().join(TASK_HISTORY_CACHE).is_dir());
        assert!(store.root().join(TREE_BLOB_CACHE).is_dir());
    }

    #[test]
    fn reopening_preserves_the_initialized_store() {
        let dir = assert_fs::TempDir::new().unwrap();
        let config = config(dir.path());

        let first = TaskHistoryStore::open(&config).unwrap();
        let marker = first.root().join(TASK_HISTORY_CACHE).join("sentinel");
        std::fs::write(&marker, b"x").unwrap();
        drop(first);

        let _second = TaskHistoryStore::open(&config).unwrap();
        assert!(marker.exists(), "reopening must not reinitialize");
    }

    #[test]
    fn a_version_bump_wipes_the_store() {
        let dir = assert_fs::TempDir::new().unwrap();
        let config = config(dir.path());

        let first = TaskHistoryStore::open(&config).unwrap();
        let marker = first.root().join(TASK_HISTORY_CACHE).join("sentinel");
        std::fs::write(&marker, b"x").unwrap();
        std::fs::write(first.root().join(STORE_VERSION_FILE), "0\n").unwrap();
        drop(first);

        let _second = TaskHistoryStore::open(&config).unwrap();
        assert!(!marker.exists(), "a stale store must be rebuilt");
    }

    #[test]
    fn concurrent_opens_converge_on_one_initialization() {
        let dir = assert_fs::TempDir::new().unwrap();
        let root = dir.path().to_path_buf();

        let mut handles = vec![];
        for _ in 0..4 {
            let root = root.clone();
            handles.push(std::thread::spawn(move || {
                let config = config(&root);
                TaskHistoryStore::open(&config).map(|store| store.root().to_path_buf())
            }));
        }

        for handle in handles {
            let opened = handle.join().unwrap();
            assert!(opened.is_ok());
        }
        assert_eq!(
            std::fs::read_to_string(root.join("history").join(STORE_VERSION_FILE))
                .unwrap()
                .trim(),
            STORE_FORMAT_VERSION.to_string()
        );
    }
}
