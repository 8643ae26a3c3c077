mod repository;

pub use repository::*;

use crate::model::TaskPath;
use crate::snapshot::{TreeSnapshotError, ValueSnapshotError};
use crate::store::StoreError;
use thiserror::Error;

/// How the task body finished, as reported by the executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed,
}

impl TaskOutcome {
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Which side of a task a snapshot was being captured for when it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotRole {
    Input,
    Output,
    Discovered,
}

impl std::fmt::Display for SnapshotRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::Discovered => write!(f, "discovered input"),
        }
    }
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Failed to capture snapshot of {role} files for property '{property}' of {task} during up-to-date check")]
    SnapshotFailed {
        task: TaskPath,
        property: String,
        role: SnapshotRole,
        #[source]
        source: TreeSnapshotError,
    },

    #[error("Unable to store input properties for {task}. Property '{property}' with value '{value}' cannot be fingerprinted")]
    InputPropertyNotSnapshottable {
        task: TaskPath,
        property: String,
        value: String,
        #[source]
        source: ValueSnapshotError,
    },

    #[error("No code fingerprint is registered for unit '{code_unit}' required by {task}")]
    UnknownCodeUnit { task: TaskPath, code_unit: String },

    #[error(transparent)]
    StoreWrite(StoreError),
}
