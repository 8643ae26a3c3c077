use dashmap::DashMap;
use std::sync::{Arc, Mutex};

/// Process-wide, append-only string interner.
///
/// Snapshots of large trees repeat the same directory prefixes thousands of times;
/// interning collapses equal path strings to one canonical [Arc] instance. Interned
/// strings outlive any single build; teardown is owned by the enclosing runtime.
#[derive(Default, Debug)]
pub struct StringInterner {
    strings: DashMap<Arc<str>, ()>,

    // NOTE: only used to serialize the calls to `intern` and prevent interning the
    // same string under two different instances.
    _intern_lock: Mutex<()>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical instance for `s`. Equal inputs always return clones of the same
    /// allocation.
    pub fn intern(&self, s: &str) -> Arc<str> {
        if let Some(entry) = self.strings.get(s) {
            return entry.key().clone();
        }
        let _lock = self._intern_lock.lock().unwrap();
        if let Some(entry) = self.strings.get(s) {
            return entry.key().clone();
        }
        let interned: Arc<str> = Arc::from(s);
        self.strings.insert(interned.clone(), ());
        interned
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
