use super::{CompareStrategy, PathNormalization};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Stable identity of a task, e.g. `//app:compile`. Used as the history cache key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskPath(String);

impl TaskPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskPath {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for TaskPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One action contributing to a task, in execution order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionDescriptor {
    type_name: String,
    code_unit: String,
}

impl ActionDescriptor {
    pub fn new(type_name: impl Into<String>, code_unit: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            code_unit: code_unit.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn code_unit(&self) -> &str {
        &self.code_unit
    }
}

/// A declared input file property: where it points and how its paths are compared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputFilePropertySpec {
    name: String,
    roots: Vec<PathBuf>,
    normalization: PathNormalization,
    compare_strategy: CompareStrategy,
}

impl InputFilePropertySpec {
    pub fn new(
        name: impl Into<String>,
        roots: Vec<PathBuf>,
        normalization: PathNormalization,
        compare_strategy: CompareStrategy,
    ) -> Self {
        Self {
            name: name.into(),
            roots,
            normalization,
            compare_strategy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn normalization(&self) -> PathNormalization {
        self.normalization
    }

    pub fn compare_strategy(&self) -> CompareStrategy {
        self.compare_strategy
    }
}

/// A declared output file property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputFilePropertySpec {
    name: String,
    roots: Vec<PathBuf>,
    cacheable: bool,
}

impl OutputFilePropertySpec {
    pub fn new(name: impl Into<String>, roots: Vec<PathBuf>, cacheable: bool) -> Self {
        Self {
            name: name.into(),
            roots,
            cacheable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn cacheable(&self) -> bool {
        self.cacheable
    }
}

/// Everything the engine needs to know about a task in order to fingerprint it.
/// Built by the executor from the task graph; the engine never interprets task
/// semantics beyond this description.
#[derive(Builder, Clone, Debug)]
#[builder(build_fn(error = "TaskDefinitionError"))]
pub struct TaskDefinition {
    path: TaskPath,

    /// Type implementing the task, e.g. `drydock.rules.RustBinary`.
    type_name: String,

    /// The code unit (rule module, plugin) the type comes from.
    code_unit: String,

    #[builder(default)]
    actions: Vec<ActionDescriptor>,

    #[builder(default)]
    input_properties: BTreeMap<String, serde_json::Value>,

    #[builder(default)]
    input_file_properties: Vec<InputFilePropertySpec>,

    #[builder(default)]
    output_file_properties: Vec<OutputFilePropertySpec>,
}

impl TaskDefinition {
    pub fn builder() -> TaskDefinitionBuilder {
        Default::default()
    }

    pub fn path(&self) -> &TaskPath {
        &self.path
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn code_unit(&self) -> &str {
        &self.code_unit
    }

    pub fn actions(&self) -> &[ActionDescriptor] {
        &self.actions
    }

    pub fn input_properties(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.input_properties
    }

    pub fn input_file_properties(&self) -> &[InputFilePropertySpec] {
        &self.input_file_properties
    }

    pub fn output_file_properties(&self) -> &[OutputFilePropertySpec] {
        &self.output_file_properties
    }
}

#[derive(Error, Debug)]
pub enum TaskDefinitionError {
    #[error(transparent)]
    BuilderError(derive_builder::UninitializedFieldError),
}

impl From<derive_builder::UninitializedFieldError> for TaskDefinitionError {
    fn from(value: derive_builder::UninitializedFieldError) -> Self {
        TaskDefinitionError::BuilderError(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_an_identity() {
        let result = TaskDefinition::builder().build();
        assert_matches!(result, Err(TaskDefinitionError::BuilderError(_)));
    }

    #[test]
    fn builder_defaults_the_collections() {
        let task = TaskDefinition::builder()
            .path("//app:compile".into())
            .type_name("CompileTask".to_string())
            .code_unit("rules/compile".to_string())
            .build()
            .unwrap();

        assert!(task.actions().is_empty());
        assert!(task.input_properties().is_empty());
        assert!(task.input_file_properties().is_empty());
        assert!(task.output_file_properties().is_empty());
    }
}
