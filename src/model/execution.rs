use super::{FileTreeSnapshot, ImplementationSnapshot, ValueSnapshot};
use crate::overlap::OverlappingOutputs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier of one build invocation, recorded in every persisted execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInvocationId(String);

impl BuildInvocationId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{}-{}-{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
            std::process::id(),
            count
        ))
    }

    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

impl Default for BuildInvocationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier of a file-tree blob inside the persistent store.
pub type TreeId = u64;

/// The tree ids a persisted record points at. Kept on the hydrated execution so the
/// superseded record's blobs can be released when a new record replaces it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTreeIds {
    pub input_file_trees: BTreeMap<String, TreeId>,
    pub discovered_inputs: TreeId,
    pub output_file_trees: Option<BTreeMap<String, TreeId>>,
}

impl StoredTreeIds {
    /// Every id this record holds a reference to.
    pub fn all(&self) -> Vec<TreeId> {
        let mut ids: Vec<TreeId> = self.input_file_trees.values().copied().collect();
        ids.push(self.discovered_inputs);
        if let Some(outputs) = &self.output_file_trees {
            ids.extend(outputs.values().copied());
        }
        ids
    }
}

/// The serialized form of a task execution: file trees are referenced by id, the
/// blobs live in their own keyspace so records stay small and trees can be shared
/// between records by content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecutionRecord {
    pub build_invocation_id: BuildInvocationId,
    pub task_implementation: ImplementationSnapshot,
    pub action_implementations: Vec<ImplementationSnapshot>,
    pub input_properties: BTreeMap<String, Arc<ValueSnapshot>>,
    pub cacheable_output_properties: BTreeSet<String>,
    pub declared_output_paths: BTreeSet<Arc<str>>,
    pub tree_ids: StoredTreeIds,
    pub detected_overlapping_outputs: Option<OverlappingOutputs>,
    pub successful: bool,
}

/// A fully hydrated task execution.
///
/// Created fresh before a task runs (outputs not yet captured, `successful = false`)
/// and mutated exactly once more, after the task body finishes. Previous executions
/// are hydrated from their [TaskExecutionRecord] with trees loaded from the store.
#[derive(Builder, Clone, Debug)]
pub struct TaskExecution {
    build_invocation_id: BuildInvocationId,
    task_implementation: ImplementationSnapshot,
    #[builder(default)]
    action_implementations: Vec<ImplementationSnapshot>,
    #[builder(default)]
    input_properties: BTreeMap<String, Arc<ValueSnapshot>>,
    #[builder(default)]
    cacheable_output_properties: BTreeSet<String>,
    #[builder(default)]
    declared_output_paths: BTreeSet<Arc<str>>,
    #[builder(default)]
    input_file_trees: BTreeMap<String, Arc<FileTreeSnapshot>>,
    #[builder(default = "FileTreeSnapshot::empty()")]
    discovered_inputs: Arc<FileTreeSnapshot>,
    /// `None` means outputs were never captured for this execution. Distinct from an
    /// empty map; overlap detection depends on the difference.
    #[builder(default)]
    output_file_trees: Option<BTreeMap<String, Arc<FileTreeSnapshot>>>,
    #[builder(default)]
    detected_overlapping_outputs: Option<OverlappingOutputs>,
    #[builder(default = "false")]
    successful: bool,
    /// Set when this execution was loaded from, or persisted to, the store.
    #[builder(default)]
    stored_tree_ids: Option<StoredTreeIds>,
}

impl TaskExecution {
    pub fn builder() -> TaskExecutionBuilder {
        Default::default()
    }

    pub fn build_invocation_id(&self) -> &BuildInvocationId {
        &self.build_invocation_id
    }

    pub fn task_implementation(&self) -> &ImplementationSnapshot {
        &self.task_implementation
    }

    pub fn action_implementations(&self) -> &[ImplementationSnapshot] {
        &self.action_implementations
    }

    pub fn input_properties(&self) -> &BTreeMap<String, Arc<ValueSnapshot>> {
        &self.input_properties
    }

    pub fn cacheable_output_properties(&self) -> &BTreeSet<String> {
        &self.cacheable_output_properties
    }

    pub fn declared_output_paths(&self) -> &BTreeSet<Arc<str>> {
        &self.declared_output_paths
    }

    pub fn input_file_trees(&self) -> &BTreeMap<String, Arc<FileTreeSnapshot>> {
        &self.input_file_trees
    }

    pub fn discovered_inputs(&self) -> &Arc<FileTreeSnapshot> {
        &self.discovered_inputs
    }

    pub fn output_file_trees(&self) -> Option<&BTreeMap<String, Arc<FileTreeSnapshot>>> {
        self.output_file_trees.as_ref()
    }

    pub fn detected_overlapping_outputs(&self) -> Option<&OverlappingOutputs> {
        self.detected_overlapping_outputs.as_ref()
    }

    pub fn successful(&self) -> bool {
        self.successful
    }

    pub(crate) fn stored_tree_ids(&self) -> Option<&StoredTreeIds> {
        self.stored_tree_ids.as_ref()
    }

    /// Second and final mutation of a current execution: record what the task left
    /// behind and whether it succeeded.
    pub(crate) fn complete(
        &mut self,
        output_file_trees: BTreeMap<String, Arc<FileTreeSnapshot>>,
        discovered_inputs: Arc<FileTreeSnapshot>,
        successful: bool,
    ) {
        self.output_file_trees = Some(output_file_trees);
        self.discovered_inputs = discovered_inputs;
        self.successful = successful;
    }

    /// Build the serializable record once trees have been written to the store.
    pub(crate) fn to_record(&mut self, tree_ids: StoredTreeIds) -> TaskExecutionRecord {
        self.stored_tree_ids = Some(tree_ids.clone());
        TaskExecutionRecord {
            build_invocation_id: self.build_invocation_id.clone(),
            task_implementation: self.task_implementation.clone(),
            action_implementations: self.action_implementations.clone(),
            input_properties: self.input_properties.clone(),
            cacheable_output_properties: self.cacheable_output_properties.clone(),
            declared_output_paths: self.declared_output_paths.clone(),
            tree_ids,
            detected_overlapping_outputs: self.detected_overlapping_outputs.clone(),
            successful: self.successful,
        }
    }

    /// Rebuild an execution from its record and the trees loaded for it.
    pub(crate) fn from_record(
        record: TaskExecutionRecord,
        input_file_trees: BTreeMap<String, Arc<FileTreeSnapshot>>,
        discovered_inputs: Arc<FileTreeSnapshot>,
        output_file_trees: Option<BTreeMap<String, Arc<FileTreeSnapshot>>>,
    ) -> Self {
        Self {
            build_invocation_id: record.build_invocation_id,
            task_implementation: record.task_implementation,
            action_implementations: record.action_implementations,
            input_properties: record.input_properties,
            cacheable_output_properties: record.cacheable_output_properties,
            declared_output_paths: record.declared_output_paths,
            input_file_trees,
            discovered_inputs,
            output_file_trees,
            detected_overlapping_outputs: record.detected_overlapping_outputs,
            successful: record.successful,
            stored_tree_ids: Some(record.tree_ids),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HashCode;

    fn record() -> TaskExecutionRecord {
        TaskExecutionRecord {
            build_invocation_id: BuildInvocationId::from_raw("build-1"),
            task_implementation: ImplementationSnapshot::new("CompileTask", HashCode::of(b"v1")),
            action_implementations: vec![ImplementationSnapshot::new(
                "CompileAction",
                HashCode::of(b"v1"),
            )],
            input_properties: BTreeMap::from([(
                "level".to_string(),
                Arc::new(ValueSnapshot::Integer(2)),
            )]),
            cacheable_output_properties: BTreeSet::from(["out".to_string()]),
            declared_output_paths: BTreeSet::from([Arc::from("/work/out")]),
            tree_ids: StoredTreeIds {
                input_file_trees: BTreeMap::from([("sources".to_string(), 1)]),
                discovered_inputs: 2,
                output_file_trees: Some(BTreeMap::from([("out".to_string(), 3)])),
            },
            detected_overlapping_outputs: None,
            successful: true,
        }
    }

    #[test]
    fn records_round_trip_through_the_binary_codec() {
        let record = record();
        let bytes = bincode::serialize(&record).unwrap();
        let back: TaskExecutionRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn stored_tree_ids_enumerate_every_reference() {
        let ids = record().tree_ids;
        let mut all = ids.all();
        all.sort();
        assert_eq!(all, vec![1, 2, 3]);
    }

    #[test]
    fn build_invocation_ids_are_unique() {
        assert_ne!(BuildInvocationId::new(), BuildInvocationId::new());
    }

    #[test]
    fn a_fresh_execution_has_no_captured_outputs() {
        let execution = TaskExecution::builder()
            .build_invocation_id(BuildInvocationId::new())
            .task_implementation(ImplementationSnapshot::new("T", HashCode::of(b"v1")))
            .build()
            .unwrap();

        assert!(!execution.successful());
        assert!(execution.output_file_trees().is_none());
        assert!(execution.discovered_inputs().is_empty());
    }
}
