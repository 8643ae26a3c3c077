use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structural fingerprint of a declared input property value.
///
/// Snapshots are held behind [std::sync::Arc] by the record so that an unchanged
/// property can share the previous run's instance instead of storing a duplicate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueSnapshot {
    Null,
    Bool(bool),
    Integer(i64),
    /// Bit pattern of the original `f64`, so equality and hashing stay total.
    Float(u64),
    String(String),
    List(Vec<ValueSnapshot>),
    Map(BTreeMap<String, ValueSnapshot>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::Arbitrary;

    impl quickcheck::Arbitrary for ValueSnapshot {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            // Flat variants only; nesting is exercised by the snapshotter tests.
            let choices = [
                ValueSnapshot::Null,
                ValueSnapshot::Bool(bool::arbitrary(g)),
                ValueSnapshot::Integer(i64::arbitrary(g)),
                ValueSnapshot::Float(u64::arbitrary(g)),
                ValueSnapshot::String(String::arbitrary(g)),
            ];
            g.choose(&choices).unwrap().to_owned()
        }
    }

    #[quickcheck]
    fn serialization_round_trips(value: ValueSnapshot) {
        let bytes = bincode::serialize(&value).unwrap();
        let back: ValueSnapshot = bincode::deserialize(&bytes).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn nested_structures_compare_structurally() {
        let a = ValueSnapshot::Map(BTreeMap::from([(
            "flags".to_string(),
            ValueSnapshot::List(vec![ValueSnapshot::String("-O2".to_string())]),
        )]));
        let b = ValueSnapshot::Map(BTreeMap::from([(
            "flags".to_string(),
            ValueSnapshot::List(vec![ValueSnapshot::String("-O2".to_string())]),
        )]));
        assert_eq!(a, b);
    }
}
