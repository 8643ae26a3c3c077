use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Width of every hash the engine manipulates, in bytes.
pub const HASH_WIDTH: usize = 16;

/// A 128-bit content hash.
///
/// Every fingerprint the engine stores (file contents, aggregate tree hashes, code
/// hashes) is one of these. Produced by truncating a SHA-256 digest, which keeps the
/// collision behavior of the full digest at half the storage cost per tree entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HashCode([u8; HASH_WIDTH]);

impl HashCode {
    pub fn from_bytes(bytes: [u8; HASH_WIDTH]) -> Self {
        Self(bytes)
    }

    /// One-shot hash of a byte string.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update_bytes(bytes);
        hasher.finish()
    }

    pub fn as_bytes(&self) -> &[u8; HASH_WIDTH] {
        &self.0
    }

    pub fn hex(&self) -> String {
        let mut out = String::with_capacity(HASH_WIDTH * 2);
        for byte in self.0 {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

impl std::fmt::Display for HashCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl std::fmt::Debug for HashCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HashCode({})", self.hex())
    }
}

/// Incremental hasher producing [HashCode]s.
///
/// Strings are written with a length prefix so that consecutive fields can not run
/// into each other and collide.
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn update_str(&mut self, s: &str) {
        self.inner.update((s.len() as u64).to_le_bytes());
        self.inner.update(s.as_bytes());
    }

    pub fn update_hash(&mut self, hash: &HashCode) {
        self.inner.update(hash.as_bytes());
    }

    pub fn finish(self) -> HashCode {
        let digest = self.inner.finalize();
        let mut bytes = [0u8; HASH_WIDTH];
        bytes.copy_from_slice(&digest[..HASH_WIDTH]);
        HashCode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::Arbitrary;

    impl quickcheck::Arbitrary for HashCode {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            let mut bytes = [0u8; HASH_WIDTH];
            for byte in bytes.iter_mut() {
                *byte = u8::arbitrary(g);
            }
            Self(bytes)
        }
    }

    #[quickcheck]
    fn hashing_is_deterministic(bytes: Vec<u8>) {
        assert_eq!(HashCode::of(&bytes), HashCode::of(&bytes));
    }

    #[quickcheck]
    fn hex_is_32_chars(hash: HashCode) {
        assert_eq!(hash.hex().len(), HASH_WIDTH * 2);
    }

    #[test]
    fn different_inputs_produce_different_hashes() {
        assert_ne!(HashCode::of(b"hello"), HashCode::of(b"world"));
    }

    #[test]
    fn length_prefix_separates_fields() {
        let mut a = ContentHasher::new();
        a.update_str("ab");
        a.update_str("c");

        let mut b = ContentHasher::new();
        b.update_str("a");
        b.update_str("bc");

        assert_ne!(a.finish(), b.finish());
    }
}
