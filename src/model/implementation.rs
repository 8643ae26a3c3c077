use super::HashCode;
use serde::{Deserialize, Serialize};

/// Fingerprint of the code that implements a task or one of its actions: the type
/// name paired with the hash of the code unit that defines it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationSnapshot {
    type_name: String,
    code_hash: HashCode,
}

impl ImplementationSnapshot {
    pub fn new(type_name: impl Into<String>, code_hash: HashCode) -> Self {
        Self {
            type_name: type_name.into(),
            code_hash,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn code_hash(&self) -> HashCode {
        self.code_hash
    }
}

impl std::fmt::Display for ImplementationSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.type_name, self.code_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_iff_both_components_match() {
        let a = ImplementationSnapshot::new("CompileTask", HashCode::of(b"code-v1"));
        let same = ImplementationSnapshot::new("CompileTask", HashCode::of(b"code-v1"));
        let other_code = ImplementationSnapshot::new("CompileTask", HashCode::of(b"code-v2"));
        let other_type = ImplementationSnapshot::new("LinkTask", HashCode::of(b"code-v1"));

        assert_eq!(a, same);
        assert_ne!(a, other_code);
        assert_ne!(a, other_type);
    }
}
