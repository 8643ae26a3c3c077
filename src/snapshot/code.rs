use crate::model::HashCode;
use dashmap::DashMap;

/// Resolves the hash of the code unit (rule module, plugin) a task implementation
/// comes from. The hash must be stable across processes running the same code.
pub trait CodeHasher: Send + Sync + std::fmt::Debug {
    /// `None` when the unit is unknown to this build, which the history layer treats
    /// as "cannot prove anything, run the task".
    fn hash_of(&self, code_unit: &str) -> Option<HashCode>;
}

/// Code hasher backed by the manifest of loaded rule modules, registered by the
/// enclosing tool at startup.
#[derive(Default, Debug)]
pub struct ManifestCodeHasher {
    units: DashMap<String, HashCode>,
}

impl ManifestCodeHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, code_unit: impl Into<String>, hash: HashCode) {
        self.units.insert(code_unit.into(), hash);
    }
}

impl CodeHasher for ManifestCodeHasher {
    fn hash_of(&self, code_unit: &str) -> Option<HashCode> {
        self.units.get(code_unit).map(|entry| *entry.value())
    }
}
