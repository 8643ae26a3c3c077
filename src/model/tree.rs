use super::{ContentHasher, FileChange, HashCode, NormalizedSnapshot};
use fxhash::FxHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// How two trees of the same property are lined up for comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareStrategy {
    /// Entry order is part of the fingerprint; compared positionally.
    Ordered,
    /// Order is irrelevant; entries are matched by normalized path.
    Unordered,
}

/// A hashed snapshot of one file-tree property.
///
/// Keys are unique absolute paths. `Ordered` trees preserve insertion order;
/// `Unordered` trees are sorted at construction so equality, hashing and
/// serialization are all canonical without a separate normalization pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileTreeSnapshot {
    entries: IndexMap<Arc<str>, NormalizedSnapshot>,
    compare_strategy: CompareStrategy,
    assigned_to_outputs: bool,
}

impl FileTreeSnapshot {
    pub fn new(
        entries: Vec<(Arc<str>, NormalizedSnapshot)>,
        compare_strategy: CompareStrategy,
        assigned_to_outputs: bool,
    ) -> Self {
        let mut entries = entries;
        if matches!(compare_strategy, CompareStrategy::Unordered) {
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        }
        Self {
            entries: entries.into_iter().collect(),
            compare_strategy,
            assigned_to_outputs,
        }
    }

    /// The shared empty tree. Immutable and structurally unique, so a single
    /// instance serves every task.
    pub fn empty() -> Arc<FileTreeSnapshot> {
        static EMPTY: OnceLock<Arc<FileTreeSnapshot>> = OnceLock::new();
        EMPTY
            .get_or_init(|| {
                Arc::new(FileTreeSnapshot::new(
                    vec![],
                    CompareStrategy::Unordered,
                    false,
                ))
            })
            .clone()
    }

    pub fn snapshots(&self) -> &IndexMap<Arc<str>, NormalizedSnapshot> {
        &self.entries
    }

    /// Absolute paths in stored order. Used to replay discovered-input sets.
    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|path| path.as_ref())
    }

    pub fn get(&self, absolute_path: &str) -> Option<&NormalizedSnapshot> {
        self.entries.get(absolute_path)
    }

    pub fn contains(&self, absolute_path: &str) -> bool {
        self.entries.contains_key(absolute_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn compare_strategy(&self) -> CompareStrategy {
        self.compare_strategy
    }

    pub fn assigned_to_outputs(&self) -> bool {
        self.assigned_to_outputs
    }

    /// Aggregate fingerprint over the strategy tag and every entry, in the order the
    /// strategy implies.
    pub fn hash(&self) -> HashCode {
        let mut hasher = ContentHasher::new();
        hasher.update_str(match self.compare_strategy {
            CompareStrategy::Ordered => "ordered",
            CompareStrategy::Unordered => "unordered",
        });
        for snapshot in self.entries.values() {
            hasher.update_str(snapshot.normalized_path());
            hasher.update_hash(&snapshot.content().content_hash());
        }
        hasher.finish()
    }

    /// Per-path changes relative to `previous`, for change reports.
    pub fn diff(&self, previous: &FileTreeSnapshot) -> impl Iterator<Item = FileChange> {
        let changes = match self.compare_strategy {
            CompareStrategy::Unordered => self.diff_unordered(previous),
            CompareStrategy::Ordered => self.diff_ordered(previous),
        };
        changes.into_iter()
    }

    fn diff_unordered(&self, previous: &FileTreeSnapshot) -> Vec<FileChange> {
        let previous_by_key: FxHashMap<&str, &NormalizedSnapshot> = previous
            .entries
            .values()
            .map(|snapshot| (snapshot.normalized_path(), snapshot))
            .collect();
        let current_by_key: FxHashMap<&str, &NormalizedSnapshot> = self
            .entries
            .values()
            .map(|snapshot| (snapshot.normalized_path(), snapshot))
            .collect();

        let mut changes = vec![];
        for (path, snapshot) in &self.entries {
            match previous_by_key.get(snapshot.normalized_path()) {
                None => changes.push(FileChange::Added {
                    path: path.to_string(),
                }),
                Some(before) => {
                    if !snapshot.content().is_content_up_to_date(before.content()) {
                        changes.push(FileChange::Modified {
                            path: path.to_string(),
                            before: *before.content(),
                            after: *snapshot.content(),
                        });
                    }
                }
            }
        }
        for (path, snapshot) in &previous.entries {
            if !current_by_key.contains_key(snapshot.normalized_path()) {
                changes.push(FileChange::Removed {
                    path: path.to_string(),
                });
            }
        }
        changes
    }

    fn diff_ordered(&self, previous: &FileTreeSnapshot) -> Vec<FileChange> {
        let mut changes = vec![];
        let mut current = self.entries.iter();
        let mut before = previous.entries.iter();
        loop {
            match (current.next(), before.next()) {
                (None, None) => break,
                (Some((path, _)), None) => changes.push(FileChange::Added {
                    path: path.to_string(),
                }),
                (None, Some((path, _))) => changes.push(FileChange::Removed {
                    path: path.to_string(),
                }),
                (Some((path, snapshot)), Some((old_path, old_snapshot))) => {
                    if snapshot.normalized_path() == old_snapshot.normalized_path() {
                        if !snapshot
                            .content()
                            .is_content_up_to_date(old_snapshot.content())
                        {
                            changes.push(FileChange::Modified {
                                path: path.to_string(),
                                before: *old_snapshot.content(),
                                after: *snapshot.content(),
                            });
                        }
                    } else {
                        changes.push(FileChange::Removed {
                            path: old_path.to_string(),
                        });
                        changes.push(FileChange::Added {
                            path: path.to_string(),
                        });
                    }
                }
            }
        }
        changes
    }
}

impl PartialEq for FileTreeSnapshot {
    fn eq(&self, other: &Self) -> bool {
        // Unordered trees are sorted at construction, so positional comparison is
        // correct for both strategies.
        self.compare_strategy == other.compare_strategy
            && self.assigned_to_outputs == other.assigned_to_outputs
            && self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((path_a, snap_a), (path_b, snap_b))| path_a == path_b && snap_a == snap_b)
    }
}

impl Eq for FileTreeSnapshot {}
