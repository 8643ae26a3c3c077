use crate::model::{FileTreeSnapshot, TaskExecution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Evidence that something other than the owning task wrote into one of its output
/// areas: a path found in the before-execution state that the previous execution did
/// not leave behind.
///
/// Not an error. Its presence switches output capture to the filtering path so that
/// two tasks sharing a directory never claim each other's files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlappingOutputs {
    property_name: String,
    overlapped_path: String,
}

impl OverlappingOutputs {
    pub fn new(property_name: impl Into<String>, overlapped_path: impl Into<String>) -> Self {
        Self {
            property_name: property_name.into(),
            overlapped_path: overlapped_path.into(),
        }
    }

    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    pub fn overlapped_path(&self) -> &str {
        &self.overlapped_path
    }

    /// Scan every output property of a task, in property order, and report the first
    /// overlap found.
    ///
    /// A previous execution whose outputs were never captured (`None`) disables
    /// detection entirely: with no record of what the task left behind, nothing can
    /// be proven foreign. An empty captured tree is the opposite extreme; every
    /// non-missing entry present before execution is foreign. The two cases must not
    /// be collapsed.
    pub fn find(
        before_execution: &BTreeMap<String, Arc<FileTreeSnapshot>>,
        previous: Option<&TaskExecution>,
    ) -> Option<OverlappingOutputs> {
        let previous_outputs = previous.and_then(|previous| previous.output_file_trees())?;

        for (property_name, before) in before_execution {
            let empty = FileTreeSnapshot::empty();
            let after_previous = previous_outputs
                .get(property_name)
                .map(|tree| tree.as_ref())
                .unwrap_or(&empty);
            if let Some(overlap) = Self::detect(property_name, after_previous, before) {
                return Some(overlap);
            }
        }
        None
    }

    /// Find the first entry of `before_execution` that exists but is not accounted
    /// for by `after_previous` with the same content.
    pub fn detect(
        property_name: &str,
        after_previous: &FileTreeSnapshot,
        before_execution: &FileTreeSnapshot,
    ) -> Option<OverlappingOutputs> {
        for (absolute_path, snapshot) in before_execution.snapshots() {
            if snapshot.content().is_missing() {
                continue;
            }
            let owned = after_previous
                .get(absolute_path)
                .map(|previous| previous.content().is_content_up_to_date(snapshot.content()))
                .unwrap_or(false);
            if !owned {
                debug!(
                    property = property_name,
                    path = %absolute_path,
                    "detected overlapping output"
                );
                return Some(OverlappingOutputs::new(
                    property_name,
                    absolute_path.to_string(),
                ));
            }
        }
        None
    }
}

impl std::fmt::Display for OverlappingOutputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "output property '{}' overlaps at {}",
            self.property_name, self.overlapped_path
        )
    }
}
