use crate::model::{CompareStrategy, FileTreeSnapshot, NormalizedSnapshot};
use std::sync::Arc;

/// Reduce a post-execution output snapshot to the entries this task may claim.
///
/// Only invoked when overlapping outputs were detected; on the fast path the
/// post-execution snapshot is used as-is. An entry survives when the task created
/// it, changed it, or owned it after the previous execution. Everything else in the
/// directory belongs to whoever put it there.
pub fn filter_output_tree(
    after_previous: Option<&FileTreeSnapshot>,
    before_execution: &FileTreeSnapshot,
    after_execution: &Arc<FileTreeSnapshot>,
) -> Arc<FileTreeSnapshot> {
    let mut kept: Vec<(Arc<str>, NormalizedSnapshot)> =
        Vec::with_capacity(after_execution.len());

    for (absolute_path, snapshot) in after_execution.snapshots() {
        if is_output_entry(absolute_path, snapshot, before_execution, after_previous) {
            kept.push((absolute_path.clone(), snapshot.clone()));
        }
    }

    if kept.len() == after_execution.len() {
        // Every entry survived; share the snapshot instead of rebuilding it.
        return after_execution.clone();
    }

    Arc::new(FileTreeSnapshot::new(
        kept,
        CompareStrategy::Unordered,
        true,
    ))
}

/// Classify one post-execution entry:
/// - entries that did not exist before the execution were created by the task
/// - entries that changed during the execution were touched by the task
/// - unchanged entries still count when the previous execution already owned them
fn is_output_entry(
    absolute_path: &str,
    snapshot: &NormalizedSnapshot,
    before_execution: &FileTreeSnapshot,
    after_previous: Option<&FileTreeSnapshot>,
) -> bool {
    if snapshot.content().is_missing() {
        return false;
    }
    let before = match before_execution.get(absolute_path) {
        None => return true,
        Some(before) => before,
    };
    if !snapshot
        .content()
        .is_content_and_metadata_up_to_date(before.content())
    {
        return true;
    }
    after_previous
        .map(|tree| tree.contains(absolute_path))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileContent, HashCode};

    fn tree(entries: &[(&str, FileContent)]) -> Arc<FileTreeSnapshot> {
        Arc::new(FileTreeSnapshot::new(
            entries
                .iter()
                .map(|(path, content)| {
                    (
                        Arc::from(*path),
                        NormalizedSnapshot::new(Arc::from(*path), *content),
                    )
                })
                .collect(),
            CompareStrategy::Unordered,
            false,
        ))
    }

    fn file(contents: &[u8]) -> FileContent {
        FileContent::regular_file(HashCode::of(contents), 0)
    }

    fn file_at(contents: &[u8], last_modified: i64) -> FileContent {
        FileContent::regular_file(HashCode::of(contents), last_modified)
    }

    #[test]
    fn entries_created_during_execution_are_kept() {
        let before = tree(&[]);
        let after = tree(&[("/out/new", file(b"fresh"))]);

        let filtered = filter_output_tree(None, &before, &after);
        assert!(filtered.contains("/out/new"));
    }

    #[test]
    fn entries_modified_during_execution_are_kept() {
        let before = tree(&[("/out/o", file(b"old"))]);
        let after = tree(&[("/out/o", file(b"new"))]);

        let filtered = filter_output_tree(None, &before, &after);
        assert!(filtered.contains("/out/o"));
    }

    #[test]
    fn unchanged_entries_previously_owned_are_kept() {
        let after_previous = tree(&[("/out/o", file(b"X"))]);
        let before = tree(&[("/out/o", file(b"X"))]);
        let after = tree(&[("/out/o", file(b"X"))]);

        let filtered = filter_output_tree(Some(&after_previous), &before, &after);
        assert!(filtered.contains("/out/o"));
    }

    #[test]
    fn unchanged_foreign_entries_are_dropped() {
        let after_previous = tree(&[("/out/o", file(b"X"))]);
        let before = tree(&[("/out/o", file(b"X")), ("/out/o2", file(b"Y"))]);
        // The task rewrote `o` identically and never touched `o2`.
        let after = tree(&[("/out/o", file(b"X")), ("/out/o2", file(b"Y"))]);

        let filtered = filter_output_tree(Some(&after_previous), &before, &after);
        assert!(filtered.contains("/out/o"));
        assert!(!filtered.contains("/out/o2"));
        assert!(filtered.assigned_to_outputs());
    }

    #[test]
    fn modified_entries_are_kept_while_foreign_ones_drop() {
        let after_previous = tree(&[("/out/o", file(b"X"))]);
        let before = tree(&[("/out/o", file(b"X")), ("/out/o2", file(b"Y"))]);
        let after = tree(&[("/out/o", file(b"X2")), ("/out/o2", file(b"Y"))]);

        let filtered = filter_output_tree(Some(&after_previous), &before, &after);
        assert!(filtered.contains("/out/o"));
        assert!(!filtered.contains("/out/o2"));
    }

    #[test]
    fn missing_entries_are_always_dropped() {
        let before = tree(&[]);
        let after = tree(&[("/out/gone", FileContent::Missing)]);

        let filtered = filter_output_tree(None, &before, &after);
        assert!(filtered.is_empty());
    }

    #[test]
    fn a_touched_timestamp_counts_as_a_modification() {
        // Same content, different mtime: the metadata comparison treats the entry as
        // touched by the task, so it stays claimed.
        let before = tree(&[("/out/o", file_at(b"X", 1))]);
        let after = tree(&[("/out/o", file_at(b"X", 2))]);

        let filtered = filter_output_tree(None, &before, &after);
        assert!(filtered.contains("/out/o"));
    }

    #[test]
    fn the_fast_path_shares_the_snapshot() {
        let before = tree(&[]);
        let after = tree(&[("/out/a", file(b"a")), ("/out/b", file(b"b"))]);

        let filtered = filter_output_tree(None, &before, &after);
        assert!(Arc::ptr_eq(&filtered, &after));
    }

    #[quickcheck]
    fn every_kept_entry_satisfies_the_classification(
        after_paths: Vec<(String, bool)>,
        before_paths: Vec<String>,
        owned_paths: Vec<String>,
    ) {
        let after = tree(
            &after_paths
                .iter()
                .map(|(path, missing)| {
                    let path: &str = path;
                    let content = if *missing {
                        FileContent::Missing
                    } else {
                        file(path.as_bytes())
                    };
                    (path, content)
                })
                .collect::<Vec<_>>(),
        );
        let before = tree(
            &before_paths
                .iter()
                .map(|path| (path.as_str(), file(b"before")))
                .collect::<Vec<_>>(),
        );
        let after_previous = tree(
            &owned_paths
                .iter()
                .map(|path| (path.as_str(), file(b"owned")))
                .collect::<Vec<_>>(),
        );

        let filtered = filter_output_tree(Some(&after_previous), &before, &after);

        for (path, snapshot) in filtered.snapshots() {
            let original = after.get(path).expect("filter invented an entry");
            assert_eq!(original, snapshot);
            assert!(is_output_entry(path, snapshot, &before, Some(&after_previous)));
        }
    }
}
