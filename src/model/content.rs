use super::{ContentHasher, HashCode};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// The observed content of a single filesystem entry.
///
/// Only regular-file hashes drive cache invalidation: a directory that exists is a
/// zero-information fact, so directories and missing entries compare by variant alone
/// and carry fixed signature hashes to keep aggregate tree hashes total.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileContent {
    RegularFile {
        hash: HashCode,
        /// Millis since the epoch, as reported by the filesystem. Consulted only by
        /// the metadata-sensitive comparison.
        last_modified: i64,
    },
    Directory,
    Missing,
}

impl FileContent {
    pub fn regular_file(hash: HashCode, last_modified: i64) -> Self {
        Self::RegularFile {
            hash,
            last_modified,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// The hash this entry contributes to an aggregate tree hash.
    pub fn content_hash(&self) -> HashCode {
        static DIRECTORY_SIGNATURE: OnceLock<HashCode> = OnceLock::new();
        static MISSING_SIGNATURE: OnceLock<HashCode> = OnceLock::new();

        match self {
            Self::RegularFile { hash, .. } => *hash,
            Self::Directory => *DIRECTORY_SIGNATURE.get_or_init(|| signature("DIRECTORY")),
            Self::Missing => *MISSING_SIGNATURE.get_or_init(|| signature("MISSING")),
        }
    }

    /// True iff both sides are the same variant and, for regular files, the hashes
    /// match. Timestamps are ignored.
    pub fn is_content_up_to_date(&self, other: &FileContent) -> bool {
        match (self, other) {
            (Self::RegularFile { hash: a, .. }, Self::RegularFile { hash: b, .. }) => a == b,
            (Self::Directory, Self::Directory) => true,
            (Self::Missing, Self::Missing) => true,
            _ => false,
        }
    }

    /// The stricter form: regular files must also agree on their modification time.
    /// For directories and missing entries this is the content comparison.
    pub fn is_content_and_metadata_up_to_date(&self, other: &FileContent) -> bool {
        match (self, other) {
            (
                Self::RegularFile {
                    hash: a,
                    last_modified: ma,
                },
                Self::RegularFile {
                    hash: b,
                    last_modified: mb,
                },
            ) => a == b && ma == mb,
            _ => self.is_content_up_to_date(other),
        }
    }
}

fn signature(tag: &str) -> HashCode {
    let mut hasher = ContentHasher::new();
    hasher.update_str(tag);
    hasher.finish()
}
