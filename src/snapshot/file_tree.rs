use super::{FileHasher, FileHasherError};
use crate::interner::StringInterner;
use crate::model::{
    CompareStrategy, FileContent, FileTreeSnapshot, NormalizedSnapshot, PathNormalization,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tokio::fs;

/// Captures hashed snapshots of file trees. Must be deterministic: the same
/// filesystem state and arguments always produce a structurally identical snapshot.
#[async_trait]
pub trait TreeSnapshotter: Send + Sync + std::fmt::Debug {
    async fn snapshot(
        &self,
        roots: &[PathBuf],
        normalization: PathNormalization,
        compare_strategy: CompareStrategy,
    ) -> Result<FileTreeSnapshot, TreeSnapshotError>;

    /// Snapshot a flat list of paths under absolute normalization; the shape
    /// discovered-input sets are captured in.
    async fn snapshot_paths(&self, paths: &[PathBuf]) -> Result<FileTreeSnapshot, TreeSnapshotError> {
        self.snapshot(paths, PathNormalization::Absolute, CompareStrategy::Unordered)
            .await
    }
}

/// Captures hashed snapshots of declared file trees.
///
/// Deterministic for a given filesystem state: directories are traversed in sorted
/// order, so two snapshots of the same tree are structurally identical no matter how
/// the OS enumerates entries.
#[derive(Debug, Clone)]
pub struct FileTreeSnapshotter {
    interner: Arc<StringInterner>,
}

#[async_trait]
impl TreeSnapshotter for FileTreeSnapshotter {
    /// Snapshot the given roots. A missing root becomes a `Missing` entry, a file
    /// root is hashed directly, and a directory root contributes every descendant:
    /// subdirectories as zero-information directory entries, files by content hash.
    #[tracing::instrument(name = "FileTreeSnapshotter::snapshot", skip(self))]
    async fn snapshot(
        &self,
        roots: &[PathBuf],
        normalization: PathNormalization,
        compare_strategy: CompareStrategy,
    ) -> Result<FileTreeSnapshot, TreeSnapshotError> {
        let mut entries = vec![];
        for root in roots {
            match fs::metadata(root).await {
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    entries.push(self.entry(root, root, normalization, FileContent::Missing));
                }
                Err(err) => {
                    return Err(TreeSnapshotError::CouldNotReadMetadata {
                        err,
                        path: root.clone(),
                    })
                }
                Ok(metadata) if metadata.is_dir() => {
                    let mut walked = self.walk(root.clone(), root.clone(), normalization).await?;
                    entries.append(&mut walked);
                }
                Ok(metadata) => {
                    let content = self.file_content(root, &metadata).await?;
                    entries.push(self.entry(root, root, normalization, content));
                }
            }
        }
        Ok(FileTreeSnapshot::new(entries, compare_strategy, false))
    }
}

impl FileTreeSnapshotter {
    pub fn new(interner: Arc<StringInterner>) -> Self {
        Self { interner }
    }

    fn walk(
        &self,
        dir: PathBuf,
        root: PathBuf,
        normalization: PathNormalization,
    ) -> BoxFuture<'_, Result<Vec<(Arc<str>, NormalizedSnapshot)>, TreeSnapshotError>> {
        async move {
            let mut read_dir =
                fs::read_dir(&dir)
                    .await
                    .map_err(|err| TreeSnapshotError::CouldNotReadDirectory {
                        err,
                        dir: dir.clone(),
                    })?;

            let mut children = vec![];
            loop {
                match read_dir.next_entry().await {
                    Ok(Some(entry)) => children.push(entry.path()),
                    Ok(None) => break,
                    Err(err) => {
                        return Err(TreeSnapshotError::CouldNotReadDirectory {
                            err,
                            dir: dir.clone(),
                        })
                    }
                }
            }
            children.sort();

            let mut entries = vec![];
            for child in children {
                let metadata = fs::metadata(&child).await.map_err(|err| {
                    TreeSnapshotError::CouldNotReadMetadata {
                        err,
                        path: child.clone(),
                    }
                })?;
                if metadata.is_dir() {
                    entries.push(self.entry(&child, &root, normalization, FileContent::Directory));
                    let mut nested = self.walk(child, root.clone(), normalization).await?;
                    entries.append(&mut nested);
                } else {
                    let content = self.file_content(&child, &metadata).await?;
                    entries.push(self.entry(&child, &root, normalization, content));
                }
            }
            Ok(entries)
        }
        .boxed()
    }

    async fn file_content(
        &self,
        path: &Path,
        metadata: &std::fs::Metadata,
    ) -> Result<FileContent, TreeSnapshotError> {
        let hash = FileHasher::hash(path).await?;
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or(0);
        Ok(FileContent::regular_file(hash, last_modified))
    }

    fn entry(
        &self,
        absolute: &Path,
        root: &Path,
        normalization: PathNormalization,
        content: FileContent,
    ) -> (Arc<str>, NormalizedSnapshot) {
        let absolute_key = self.interner.intern(&absolute.to_string_lossy());
        let normalized = self
            .interner
            .intern(&normalization.normalize(absolute, root));
        (absolute_key, NormalizedSnapshot::new(normalized, content))
    }
}

#[derive(Error, Debug)]
pub enum TreeSnapshotError {
    #[error("Could not read directory {dir:?} due to {err:?}")]
    CouldNotReadDirectory { err: std::io::Error, dir: PathBuf },

    #[error("Could not read metadata for {path:?} due to {err:?}")]
    CouldNotReadMetadata { err: std::io::Error, path: PathBuf },

    #[error(transparent)]
    CouldNotHashFile(FileHasherError),
}

impl From<FileHasherError> for TreeSnapshotError {
    fn from(value: FileHasherError) -> Self {
        TreeSnapshotError::CouldNotHashFile(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    fn snapshotter() -> FileTreeSnapshotter {
        FileTreeSnapshotter::new(Arc::new(StringInterner::new()))
    }

    #[tokio::test]
    async fn snapshotting_is_deterministic() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("src/a.c").write_str("a").unwrap();
        dir.child("src/b.c").write_str("b").unwrap();
        dir.child("src/nested/c.c").write_str("c").unwrap();

        let snapshotter = snapshotter();
        let roots = vec![dir.path().join("src")];
        let first = snapshotter
            .snapshot(&roots, PathNormalization::RelativeToRoot, CompareStrategy::Unordered)
            .await
            .unwrap();
        let second = snapshotter
            .snapshot(&roots, PathNormalization::RelativeToRoot, CompareStrategy::Unordered)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.hash(), second.hash());
    }

    #[tokio::test]
    async fn directories_walk_into_files_and_subdirectories() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("out/lib.a").write_str("lib").unwrap();
        dir.child("out/debug/lib.pdb").write_str("dbg").unwrap();

        let roots = vec![dir.path().join("out")];
        let tree = snapshotter()
            .snapshot(&roots, PathNormalization::RelativeToRoot, CompareStrategy::Unordered)
            .await
            .unwrap();

        let normalized: Vec<&str> = tree
            .snapshots()
            .values()
            .map(|snapshot| snapshot.normalized_path())
            .collect();
        assert_eq!(normalized, vec!["debug", "debug/lib.pdb", "lib.a"]);

        let debug_dir = dir.path().join("out/debug");
        let entry = tree.get(&debug_dir.to_string_lossy()).unwrap();
        assert_eq!(entry.content(), &FileContent::Directory);
    }

    #[tokio::test]
    async fn a_missing_root_becomes_a_missing_entry() {
        let dir = assert_fs::TempDir::new().unwrap();
        let missing = dir.path().join("never-created");

        let tree = snapshotter()
            .snapshot(
                &[missing.clone()],
                PathNormalization::Absolute,
                CompareStrategy::Unordered,
            )
            .await
            .unwrap();

        let entry = tree.get(&missing.to_string_lossy()).unwrap();
        assert_eq!(entry.content(), &FileContent::Missing);
    }

    #[tokio::test]
    async fn an_empty_directory_root_is_an_empty_tree() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("out").create_dir_all().unwrap();

        let tree = snapshotter()
            .snapshot(
                &[dir.path().join("out")],
                PathNormalization::Absolute,
                CompareStrategy::Unordered,
            )
            .await
            .unwrap();
        assert!(tree.is_empty());
    }

    #[tokio::test]
    async fn file_roots_are_hashed_directly() {
        let dir = assert_fs::TempDir::new().unwrap();
        let file = dir.child("a.txt");
        file.write_str("hello").unwrap();

        let tree = snapshotter()
            .snapshot(
                &[file.path().to_path_buf()],
                PathNormalization::NameOnly,
                CompareStrategy::Unordered,
            )
            .await
            .unwrap();

        let entry = tree.get(&file.path().to_string_lossy()).unwrap();
        assert_eq!(entry.normalized_path(), "a.txt");
        assert_matches!(entry.content(), FileContent::RegularFile { .. });
    }

    #[tokio::test]
    async fn relocated_trees_compare_equal_under_relative_normalization() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("v1/src/a.c").write_str("same").unwrap();
        dir.child("v2/src/a.c").write_str("same").unwrap();

        let snapshotter = snapshotter();
        let v1 = snapshotter
            .snapshot(
                &[dir.path().join("v1")],
                PathNormalization::RelativeToRoot,
                CompareStrategy::Unordered,
            )
            .await
            .unwrap();
        let v2 = snapshotter
            .snapshot(
                &[dir.path().join("v2")],
                PathNormalization::RelativeToRoot,
                CompareStrategy::Unordered,
            )
            .await
            .unwrap();

        assert_eq!(v1.hash(), v2.hash());
        assert_eq!(v2.diff(&v1).count(), 0);
    }
}
