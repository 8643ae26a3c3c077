use super::FileContent;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// How an absolute path is reduced to the key the comparator treats as identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathNormalization {
    /// The full absolute path. Moving a file anywhere invalidates.
    Absolute,
    /// The path relative to the declared root. Relocatable trees compare equal.
    RelativeToRoot,
    /// The file name alone.
    NameOnly,
    /// No path identity at all; only content participates in comparison.
    Ignored,
}

impl PathNormalization {
    pub fn normalize(&self, absolute: &Path, root: &Path) -> String {
        match self {
            Self::Absolute => absolute.to_string_lossy().into_owned(),
            Self::RelativeToRoot => match absolute.strip_prefix(root) {
                Ok(relative) if relative.as_os_str().is_empty() => file_name(absolute),
                Ok(relative) => relative.to_string_lossy().into_owned(),
                Err(_) => file_name(absolute),
            },
            Self::NameOnly => file_name(absolute),
            Self::Ignored => String::new(),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// A content snapshot paired with its normalized path key.
///
/// The normalized path is what comparison sees; the absolute path is kept at the tree
/// layer for diagnostics and discovered-input replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedSnapshot {
    normalized_path: Arc<str>,
    content: FileContent,
}

impl NormalizedSnapshot {
    pub fn new(normalized_path: Arc<str>, content: FileContent) -> Self {
        Self {
            normalized_path,
            content,
        }
    }

    pub fn normalized_path(&self) -> &str {
        &self.normalized_path
    }

    pub fn content(&self) -> &FileContent {
        &self.content
    }
}
