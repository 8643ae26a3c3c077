use super::{HistoryError, SnapshotRole, TaskOutcome};
use crate::interner::StringInterner;
use crate::model::{
    BuildInvocationId, CompareStrategy, ExecutionChanges, FileTreeSnapshot,
    ImplementationSnapshot, PathNormalization, StoredTreeIds, TaskDefinition, TaskExecution,
    TaskExecutionRecord, ValueSnapshot,
};
use crate::output_filter::filter_output_tree;
use crate::overlap::OverlappingOutputs;
use crate::snapshot::{CodeHasher, TreeSnapshotError, TreeSnapshotter, ValueSnapshotter};
use crate::store::TaskHistoryStore;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hands out one [TaskHistory] per task. The repository owns nothing task-specific
/// itself; it bundles the store and the snapshotting collaborators every history
/// needs, plus the id of the running build.
#[derive(Debug, Clone)]
pub struct TaskHistoryRepository {
    store: Arc<TaskHistoryStore>,
    interner: Arc<StringInterner>,
    tree_snapshotter: Arc<dyn TreeSnapshotter>,
    value_snapshotter: Arc<dyn ValueSnapshotter>,
    code_hasher: Arc<dyn CodeHasher>,
    build_invocation_id: BuildInvocationId,
}

impl TaskHistoryRepository {
    pub fn new(
        store: Arc<TaskHistoryStore>,
        interner: Arc<StringInterner>,
        tree_snapshotter: Arc<dyn TreeSnapshotter>,
        value_snapshotter: Arc<dyn ValueSnapshotter>,
        code_hasher: Arc<dyn CodeHasher>,
    ) -> Self {
        Self::with_build_invocation_id(
            store,
            interner,
            tree_snapshotter,
            value_snapshotter,
            code_hasher,
            BuildInvocationId::new(),
        )
    }

    pub fn with_build_invocation_id(
        store: Arc<TaskHistoryStore>,
        interner: Arc<StringInterner>,
        tree_snapshotter: Arc<dyn TreeSnapshotter>,
        value_snapshotter: Arc<dyn ValueSnapshotter>,
        code_hasher: Arc<dyn CodeHasher>,
        build_invocation_id: BuildInvocationId,
    ) -> Self {
        Self {
            store,
            interner,
            tree_snapshotter,
            value_snapshotter,
            code_hasher,
            build_invocation_id,
        }
    }

    #[tracing::instrument(name = "TaskHistoryRepository::get_history", skip(self, task), fields(task = %task.path()))]
    pub fn get_history(&self, task: &TaskDefinition) -> TaskHistory {
        TaskHistory {
            task: task.clone(),
            store: self.store.clone(),
            interner: self.interner.clone(),
            tree_snapshotter: self.tree_snapshotter.clone(),
            value_snapshotter: self.value_snapshotter.clone(),
            code_hasher: self.code_hasher.clone(),
            build_invocation_id: self.build_invocation_id.clone(),
            previous_load_attempted: false,
            previous: None,
            current: None,
        }
    }
}

/// Captured state the filter needs after the task body runs: the outputs as they
/// looked right before execution.
#[derive(Debug)]
struct CurrentState {
    execution: TaskExecution,
    before_execution_outputs: BTreeMap<String, Arc<FileTreeSnapshot>>,
}

/// The execution history of a single task during one build step.
///
/// Owned by the thread executing the task. The previous record is loaded at most
/// once; the current execution is assembled lazily from the task's present state and
/// mutated exactly once more after the task body runs. Nothing is persisted until
/// [TaskHistory::persist]; a cancelled build leaves the previous record
/// authoritative.
#[derive(Debug)]
pub struct TaskHistory {
    task: TaskDefinition,
    store: Arc<TaskHistoryStore>,
    interner: Arc<StringInterner>,
    tree_snapshotter: Arc<dyn TreeSnapshotter>,
    value_snapshotter: Arc<dyn ValueSnapshotter>,
    code_hasher: Arc<dyn CodeHasher>,
    build_invocation_id: BuildInvocationId,
    previous_load_attempted: bool,
    previous: Option<TaskExecution>,
    current: Option<CurrentState>,
}

impl TaskHistory {
    /// The record of the last persisted execution, if any. Store read failures and
    /// records written by an incompatible engine degrade to "never ran".
    pub async fn previous_execution(&mut self) -> Option<&TaskExecution> {
        self.load_previous().await;
        self.previous.as_ref()
    }

    /// The execution being assembled for this build. Builds it on first call:
    /// implementation and value fingerprints, input trees, the before-execution
    /// state of every output property, replayed discovered inputs, and overlap
    /// detection against the previous record.
    pub async fn current_execution(&mut self) -> Result<&TaskExecution, HistoryError> {
        self.load_previous().await;
        if self.current.is_none() {
            let state = self.create_execution().await?;
            self.current = Some(state);
        }
        Ok(&self.current.as_ref().unwrap().execution)
    }

    /// The categorized reasons the task cannot be skipped. Empty means up to date.
    pub async fn changes(&mut self) -> Result<ExecutionChanges<'_>, HistoryError> {
        self.current_execution().await?;
        Ok(ExecutionChanges::between(
            self.previous.as_ref(),
            &self.current.as_ref().unwrap().execution,
        ))
    }

    pub async fn is_up_to_date(&mut self) -> Result<bool, HistoryError> {
        Ok(self.changes().await?.is_up_to_date())
    }

    /// Re-snapshot the outputs after the task body ran and record the outcome. When
    /// overlapping outputs were detected at construction time, the post-execution
    /// snapshot is filtered down to the entries this task may claim.
    pub async fn update_current(
        &mut self,
        outcome: TaskOutcome,
        discovered_inputs: &[PathBuf],
    ) -> Result<(), HistoryError> {
        self.current_execution().await?;

        let mut outputs_after = BTreeMap::new();
        for spec in self.task.output_file_properties() {
            let tree = self
                .tree_snapshotter
                .snapshot(
                    spec.roots(),
                    PathNormalization::Absolute,
                    CompareStrategy::Unordered,
                )
                .await
                .map_err(|source| self.snapshot_error(spec.name(), SnapshotRole::Output, source))?;
            outputs_after.insert(spec.name().to_string(), Arc::new(tree));
        }

        let state = self.current.as_ref().unwrap();
        let new_outputs = if state.execution.detected_overlapping_outputs().is_some() {
            let mut filtered = BTreeMap::new();
            for (property, before_execution) in &state.before_execution_outputs {
                let after_execution = outputs_after
                    .get(property)
                    .cloned()
                    .unwrap_or_else(FileTreeSnapshot::empty);
                let after_previous = self
                    .previous
                    .as_ref()
                    .and_then(|previous| previous.output_file_trees())
                    .and_then(|trees| trees.get(property))
                    .map(|tree| tree.as_ref());
                filtered.insert(
                    property.clone(),
                    filter_output_tree(after_previous, before_execution, &after_execution),
                );
            }
            filtered
        } else {
            outputs_after
        };

        self.complete_current(outcome, discovered_inputs, new_outputs)
            .await
    }

    /// Variant for executions whose outputs were produced by something other than
    /// the task body, e.g. restored from an artifact store. The supplied snapshot is
    /// recorded as-is.
    pub async fn update_current_with_outputs(
        &mut self,
        outcome: TaskOutcome,
        discovered_inputs: &[PathBuf],
        new_outputs: BTreeMap<String, Arc<FileTreeSnapshot>>,
    ) -> Result<(), HistoryError> {
        self.current_execution().await?;
        self.complete_current(outcome, discovered_inputs, new_outputs)
            .await
    }

    /// Write the current execution under the task path: new tree blobs first, then
    /// the release of the superseded record's blobs, then the record swap. Failures
    /// here are failures of the build step.
    #[tracing::instrument(name = "TaskHistory::persist", skip(self), fields(task = %self.task.path()))]
    pub async fn persist(&mut self) -> Result<(), HistoryError> {
        self.current_execution().await?;
        let state = self.current.as_mut().unwrap();
        let trees = self.store.trees();

        let mut input_ids = BTreeMap::new();
        for (property, tree) in state.execution.input_file_trees() {
            let id = trees.add(tree).await.map_err(HistoryError::StoreWrite)?;
            input_ids.insert(property.clone(), id);
        }
        let discovered_id = trees
            .add(state.execution.discovered_inputs())
            .await
            .map_err(HistoryError::StoreWrite)?;
        let output_ids = match state.execution.output_file_trees() {
            None => None,
            Some(outputs) => {
                let mut ids = BTreeMap::new();
                for (property, tree) in outputs {
                    let id = trees.add(tree).await.map_err(HistoryError::StoreWrite)?;
                    ids.insert(property.clone(), id);
                }
                Some(ids)
            }
        };

        let record = state.execution.to_record(StoredTreeIds {
            input_file_trees: input_ids,
            discovered_inputs: discovered_id,
            output_file_trees: output_ids,
        });

        if let Some(stored) = self
            .previous
            .as_ref()
            .and_then(|previous| previous.stored_tree_ids())
        {
            // Blobs the new record also references survive through their refcount.
            for id in stored.all() {
                trees.release(id).await.map_err(HistoryError::StoreWrite)?;
            }
        }

        self.store
            .history()
            .put(self.task.path(), record)
            .await
            .map_err(HistoryError::StoreWrite)
    }

    async fn complete_current(
        &mut self,
        outcome: TaskOutcome,
        discovered_inputs: &[PathBuf],
        new_outputs: BTreeMap<String, Arc<FileTreeSnapshot>>,
    ) -> Result<(), HistoryError> {
        let discovered = if discovered_inputs.is_empty() {
            debug!(task = %self.task.path(), "no discovered inputs");
            FileTreeSnapshot::empty()
        } else {
            debug!(task = %self.task.path(), count = discovered_inputs.len(), "snapshotting discovered inputs");
            let tree = self
                .tree_snapshotter
                .snapshot_paths(discovered_inputs)
                .await
                .map_err(|source| {
                    self.snapshot_error("<discovered>", SnapshotRole::Discovered, source)
                })?;
            Arc::new(tree)
        };

        let state = self.current.as_mut().unwrap();
        state
            .execution
            .complete(new_outputs, discovered, outcome.is_successful());
        Ok(())
    }

    async fn load_previous(&mut self) {
        if self.previous_load_attempted {
            return;
        }
        self.previous_load_attempted = true;

        let record = match self.store.history().get(self.task.path()).await {
            Ok(record) => record,
            Err(err) => {
                warn!(task = %self.task.path(), %err, "could not read previous execution; assuming none");
                return;
            }
        };
        let Some(record) = record else { return };

        match self.hydrate((*record).clone()).await {
            Ok(Some(execution)) => self.previous = Some(execution),
            Ok(None) => {
                warn!(task = %self.task.path(), "previous execution references missing tree snapshots; assuming none");
            }
            Err(err) => {
                warn!(task = %self.task.path(), %err, "could not load previous execution trees; assuming none");
            }
        }
    }

    async fn hydrate(
        &self,
        record: TaskExecutionRecord,
    ) -> Result<Option<TaskExecution>, crate::store::StoreError> {
        let trees = self.store.trees();

        let mut input_file_trees = BTreeMap::new();
        for (property, id) in &record.tree_ids.input_file_trees {
            match trees.get(*id).await? {
                Some(tree) => {
                    input_file_trees.insert(property.clone(), tree);
                }
                None => return Ok(None),
            }
        }

        let Some(discovered) = trees.get(record.tree_ids.discovered_inputs).await? else {
            return Ok(None);
        };

        let output_file_trees = match &record.tree_ids.output_file_trees {
            None => None,
            Some(ids) => {
                let mut outputs = BTreeMap::new();
                for (property, id) in ids {
                    match trees.get(*id).await? {
                        Some(tree) => {
                            outputs.insert(property.clone(), tree);
                        }
                        None => return Ok(None),
                    }
                }
                Some(outputs)
            }
        };

        Ok(Some(TaskExecution::from_record(
            record,
            input_file_trees,
            discovered,
            output_file_trees,
        )))
    }

    async fn create_execution(&mut self) -> Result<CurrentState, HistoryError> {
        let task_implementation =
            self.implementation_of(self.task.type_name(), self.task.code_unit())?;
        debug!(task = %self.task.path(), implementation = %task_implementation, "captured task implementation");

        let mut action_implementations = Vec::with_capacity(self.task.actions().len());
        for action in self.task.actions() {
            action_implementations
                .push(self.implementation_of(action.type_name(), action.code_unit())?);
        }

        let empty_properties = BTreeMap::new();
        let previous_properties = self
            .previous
            .as_ref()
            .map(|previous| previous.input_properties())
            .unwrap_or(&empty_properties);
        let mut input_properties: BTreeMap<String, Arc<ValueSnapshot>> = BTreeMap::new();
        for (property, value) in self.task.input_properties() {
            let snapshot = match previous_properties.get(property) {
                Some(previous) => self.value_snapshotter.snapshot_with_previous(value, previous),
                None => self.value_snapshotter.snapshot(value),
            }
            .map_err(|source| HistoryError::InputPropertyNotSnapshottable {
                task: self.task.path().clone(),
                property: property.clone(),
                value: value.to_string(),
                source,
            })?;
            input_properties.insert(property.clone(), snapshot);
        }

        let mut input_file_trees = BTreeMap::new();
        for spec in self.task.input_file_properties() {
            debug!(task = %self.task.path(), property = spec.name(), "snapshotting input files");
            let tree = self
                .tree_snapshotter
                .snapshot(spec.roots(), spec.normalization(), spec.compare_strategy())
                .await
                .map_err(|source| self.snapshot_error(spec.name(), SnapshotRole::Input, source))?;
            input_file_trees.insert(spec.name().to_string(), Arc::new(tree));
        }

        let mut before_execution_outputs = BTreeMap::new();
        for spec in self.task.output_file_properties() {
            debug!(task = %self.task.path(), property = spec.name(), "snapshotting output files");
            let tree = self
                .tree_snapshotter
                .snapshot(
                    spec.roots(),
                    PathNormalization::Absolute,
                    CompareStrategy::Unordered,
                )
                .await
                .map_err(|source| self.snapshot_error(spec.name(), SnapshotRole::Output, source))?;
            before_execution_outputs.insert(spec.name().to_string(), Arc::new(tree));
        }

        let discovered_inputs = match self.previous.as_ref() {
            Some(previous) if !previous.discovered_inputs().is_empty() => {
                let paths: Vec<PathBuf> = previous
                    .discovered_inputs()
                    .elements()
                    .map(PathBuf::from)
                    .collect();
                let tree = self
                    .tree_snapshotter
                    .snapshot_paths(&paths)
                    .await
                    .map_err(|source| {
                        self.snapshot_error("<discovered>", SnapshotRole::Discovered, source)
                    })?;
                Arc::new(tree)
            }
            _ => FileTreeSnapshot::empty(),
        };

        let detected_overlapping_outputs =
            OverlappingOutputs::find(&before_execution_outputs, self.previous.as_ref());

        let mut cacheable_output_properties = BTreeSet::new();
        let mut declared_output_paths = BTreeSet::new();
        for spec in self.task.output_file_properties() {
            if spec.cacheable() {
                cacheable_output_properties.insert(spec.name().to_string());
            }
            for root in spec.roots() {
                declared_output_paths.insert(self.interner.intern(&root.to_string_lossy()));
            }
        }

        let execution = TaskExecution::builder()
            .build_invocation_id(self.build_invocation_id.clone())
            .task_implementation(task_implementation)
            .action_implementations(action_implementations)
            .input_properties(input_properties)
            .cacheable_output_properties(cacheable_output_properties)
            .declared_output_paths(declared_output_paths)
            .input_file_trees(input_file_trees)
            .discovered_inputs(discovered_inputs)
            .detected_overlapping_outputs(detected_overlapping_outputs)
            .build()
            .expect("every required execution field is set");

        Ok(CurrentState {
            execution,
            before_execution_outputs,
        })
    }

    fn implementation_of(
        &self,
        type_name: &str,
        code_unit: &str,
    ) -> Result<ImplementationSnapshot, HistoryError> {
        let hash =
            self.code_hasher
                .hash_of(code_unit)
                .ok_or_else(|| HistoryError::UnknownCodeUnit {
                    task: self.task.path().clone(),
                    code_unit: code_unit.to_string(),
                })?;
        Ok(ImplementationSnapshot::new(type_name, hash))
    }

    fn snapshot_error(
        &self,
        property: &str,
        role: SnapshotRole,
        source: TreeSnapshotError,
    ) -> HistoryError {
        HistoryError::SnapshotFailed {
            task: self.task.path().clone(),
            property: property.to_string(),
            role,
            source,
        }
    }
}
