use crate::model::ValueSnapshot;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Produces structural fingerprints of declared input property values.
///
/// The two-argument form lets an implementation hand back the previous snapshot
/// instance when the value is structurally unchanged, so unchanged properties are
/// stored once across builds rather than duplicated per record.
pub trait ValueSnapshotter: Send + Sync + std::fmt::Debug {
    fn snapshot(&self, value: &serde_json::Value) -> Result<Arc<ValueSnapshot>, ValueSnapshotError>;

    fn snapshot_with_previous(
        &self,
        value: &serde_json::Value,
        previous: &Arc<ValueSnapshot>,
    ) -> Result<Arc<ValueSnapshot>, ValueSnapshotError> {
        let current = self.snapshot(value)?;
        if current == *previous {
            Ok(previous.clone())
        } else {
            Ok(current)
        }
    }
}

/// Snapshotter over JSON-shaped property values.
#[derive(Default, Debug, Clone)]
pub struct StructuralValueSnapshotter;

impl StructuralValueSnapshotter {
    pub fn new() -> Self {
        Self
    }
}

impl ValueSnapshotter for StructuralValueSnapshotter {
    fn snapshot(&self, value: &serde_json::Value) -> Result<Arc<ValueSnapshot>, ValueSnapshotError> {
        Ok(Arc::new(structure_of(value)?))
    }
}

fn structure_of(value: &serde_json::Value) -> Result<ValueSnapshot, ValueSnapshotError> {
    let snapshot = match value {
        serde_json::Value::Null => ValueSnapshot::Null,
        serde_json::Value::Bool(b) => ValueSnapshot::Bool(*b),
        serde_json::Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(integer), _) => ValueSnapshot::Integer(integer),
            (None, Some(float)) => ValueSnapshot::Float(float.to_bits()),
            (None, None) => {
                return Err(ValueSnapshotError::NotSnapshottable {
                    value: number.to_string(),
                })
            }
        },
        serde_json::Value::String(s) => ValueSnapshot::String(s.clone()),
        serde_json::Value::Array(items) => ValueSnapshot::List(
            items
                .iter()
                .map(structure_of)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        serde_json::Value::Object(fields) => {
            let mut map = BTreeMap::new();
            for (key, field) in fields {
                map.insert(key.clone(), structure_of(field)?);
            }
            ValueSnapshot::Map(map)
        }
    };
    Ok(snapshot)
}

#[derive(Error, Debug)]
pub enum ValueSnapshotError {
    #[error("value '{value}' cannot be fingerprinted")]
    NotSnapshottable { value: String },
}
