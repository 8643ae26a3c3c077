use super::{FileContent, ImplementationSnapshot, TaskExecution};
use crate::overlap::OverlappingOutputs;
use std::collections::VecDeque;

/// A single path-level difference between two tree snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileChange {
    Added {
        path: String,
    },
    Removed {
        path: String,
    },
    Modified {
        path: String,
        before: FileContent,
        after: FileContent,
    },
}

impl std::fmt::Display for FileChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added { path } => write!(f, "{path} has been added"),
            Self::Removed { path } => write!(f, "{path} has been removed"),
            Self::Modified { path, .. } => write!(f, "{path} has changed"),
        }
    }
}

/// One categorized reason why a task cannot be skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionChange {
    /// No previous execution is on record.
    NoHistory,
    /// The previous execution did not finish successfully.
    PreviousFailed,
    /// Something else wrote into this task's output area.
    OutputsOverlap(OverlappingOutputs),
    ImplementationChanged {
        previous: ImplementationSnapshot,
        current: ImplementationSnapshot,
    },
    ActionImplementationsChanged,
    InputPropertyAdded {
        property: String,
    },
    InputPropertyRemoved {
        property: String,
    },
    InputPropertyChanged {
        property: String,
    },
    CacheableOutputsChanged,
    InputFilePropertyAdded {
        property: String,
    },
    InputFilePropertyRemoved {
        property: String,
    },
    InputFileChanged {
        property: String,
        change: FileChange,
    },
    DiscoveredInputChanged {
        change: FileChange,
    },
}

impl std::fmt::Display for ExecutionChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoHistory => write!(f, "no history is available"),
            Self::PreviousFailed => write!(f, "the previous execution failed"),
            Self::OutputsOverlap(overlap) => write!(f, "{overlap}"),
            Self::ImplementationChanged { previous, current } => {
                write!(
                    f,
                    "the task implementation changed from {previous} to {current}"
                )
            }
            Self::ActionImplementationsChanged => {
                write!(f, "one or more task actions have changed")
            }
            Self::InputPropertyAdded { property } => {
                write!(f, "input property '{property}' has been added")
            }
            Self::InputPropertyRemoved { property } => {
                write!(f, "input property '{property}' has been removed")
            }
            Self::InputPropertyChanged { property } => {
                write!(f, "input property '{property}' has changed")
            }
            Self::CacheableOutputsChanged => {
                write!(f, "the set of cacheable output properties has changed")
            }
            Self::InputFilePropertyAdded { property } => {
                write!(f, "input file property '{property}' has been added")
            }
            Self::InputFilePropertyRemoved { property } => {
                write!(f, "input file property '{property}' has been removed")
            }
            Self::InputFileChanged { property, change } => {
                write!(f, "input file of '{property}': {change}")
            }
            Self::DiscoveredInputChanged { change } => {
                write!(f, "discovered input {change}")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    History,
    Implementation,
    InputProperties,
    InputFiles,
    DiscoveredInputs,
    Done,
}

/// Lazily staged comparison of a current execution against the previous one.
///
/// Reasons are produced category by category (history, implementation, input
/// properties, input files, discovered inputs), so a consumer that only needs the
/// first reason never pays for the file-level diffs. An empty report means the task
/// is up to date.
pub struct ExecutionChanges<'a> {
    previous: Option<&'a TaskExecution>,
    current: &'a TaskExecution,
    stage: Stage,
    buffer: VecDeque<ExecutionChange>,
}

impl<'a> ExecutionChanges<'a> {
    pub fn between(previous: Option<&'a TaskExecution>, current: &'a TaskExecution) -> Self {
        Self {
            previous,
            current,
            stage: Stage::History,
            buffer: VecDeque::new(),
        }
    }

    /// True iff the comparison yields no reason to run.
    pub fn is_up_to_date(mut self) -> bool {
        self.next().is_none()
    }

    fn fill_next_stage(&mut self) {
        match self.stage {
            Stage::History => {
                self.stage = Stage::Implementation;
                let Some(previous) = self.previous else {
                    self.buffer.push_back(ExecutionChange::NoHistory);
                    // With no baseline there is nothing further to compare against.
                    self.stage = Stage::Done;
                    return;
                };
                if !previous.successful() {
                    self.buffer.push_back(ExecutionChange::PreviousFailed);
                }
                if let Some(overlap) = self.current.detected_overlapping_outputs() {
                    self.buffer
                        .push_back(ExecutionChange::OutputsOverlap(overlap.clone()));
                }
            }
            Stage::Implementation => {
                self.stage = Stage::InputProperties;
                let previous = self.previous.expect("stage requires a previous execution");
                if previous.task_implementation() != self.current.task_implementation() {
                    self.buffer.push_back(ExecutionChange::ImplementationChanged {
                        previous: previous.task_implementation().clone(),
                        current: self.current.task_implementation().clone(),
                    });
                }
                if previous.action_implementations() != self.current.action_implementations() {
                    self.buffer
                        .push_back(ExecutionChange::ActionImplementationsChanged);
                }
            }
            Stage::InputProperties => {
                self.stage = Stage::InputFiles;
                let previous = self.previous.expect("stage requires a previous execution");
                for (property, value) in self.current.input_properties() {
                    match previous.input_properties().get(property) {
                        None => self.buffer.push_back(ExecutionChange::InputPropertyAdded {
                            property: property.clone(),
                        }),
                        Some(previous_value) => {
                            let unchanged = std::sync::Arc::ptr_eq(value, previous_value)
                                || value == previous_value;
                            if !unchanged {
                                self.buffer.push_back(ExecutionChange::InputPropertyChanged {
                                    property: property.clone(),
                                });
                            }
                        }
                    }
                }
                for property in previous.input_properties().keys() {
                    if !self.current.input_properties().contains_key(property) {
                        self.buffer
                            .push_back(ExecutionChange::InputPropertyRemoved {
                                property: property.clone(),
                            });
                    }
                }
                if previous.cacheable_output_properties()
                    != self.current.cacheable_output_properties()
                {
                    self.buffer.push_back(ExecutionChange::CacheableOutputsChanged);
                }
            }
            Stage::InputFiles => {
                self.stage = Stage::DiscoveredInputs;
                let previous = self.previous.expect("stage requires a previous execution");
                for (property, tree) in self.current.input_file_trees() {
                    match previous.input_file_trees().get(property) {
                        None => self
                            .buffer
                            .push_back(ExecutionChange::InputFilePropertyAdded {
                                property: property.clone(),
                            }),
                        Some(previous_tree) => {
                            for change in tree.diff(previous_tree) {
                                self.buffer.push_back(ExecutionChange::InputFileChanged {
                                    property: property.clone(),
                                    change,
                                });
                            }
                        }
                    }
                }
                for property in previous.input_file_trees().keys() {
                    if !self.current.input_file_trees().contains_key(property) {
                        self.buffer
                            .push_back(ExecutionChange::InputFilePropertyRemoved {
                                property: property.clone(),
                            });
                    }
                }
            }
            Stage::DiscoveredInputs => {
                self.stage = Stage::Done;
                let previous = self.previous.expect("stage requires a previous execution");
                for change in self
                    .current
                    .discovered_inputs()
                    .diff(previous.discovered_inputs())
                {
                    self.buffer
                        .push_back(ExecutionChange::DiscoveredInputChanged { change });
                }
            }
            Stage::Done => {}
        }
    }
}

impl<'a> Iterator for ExecutionChanges<'a> {
    type Item = ExecutionChange;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(change) = self.buffer.pop_front() {
                return Some(change);
            }
            if self.stage == Stage::Done {
                return None;
            }
            self.fill_next_stage();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BuildInvocationId, CompareStrategy, FileTreeSnapshot, HashCode, NormalizedSnapshot,
        TaskExecutionBuilder, ValueSnapshot,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn implementation(version: &str) -> ImplementationSnapshot {
        ImplementationSnapshot::new("CompileTask", HashCode::of(version.as_bytes()))
    }

    fn tree(entries: &[(&str, &[u8])]) -> Arc<FileTreeSnapshot> {
        Arc::new(FileTreeSnapshot::new(
            entries
                .iter()
                .map(|(path, contents)| {
                    (
                        Arc::from(*path),
                        NormalizedSnapshot::new(
                            Arc::from(*path),
                            FileContent::regular_file(HashCode::of(contents), 0),
                        ),
                    )
                })
                .collect(),
            CompareStrategy::Unordered,
            false,
        ))
    }

    fn execution() -> TaskExecutionBuilder {
        let mut builder = TaskExecution::builder();
        builder
            .build_invocation_id(BuildInvocationId::from_raw("build"))
            .task_implementation(implementation("v1"))
            .input_properties(BTreeMap::from([(
                "level".to_string(),
                Arc::new(ValueSnapshot::Integer(2)),
            )]))
            .input_file_trees(BTreeMap::from([(
                "sources".to_string(),
                tree(&[("/w/a.c", b"a")]),
            )]))
            .successful(true);
        builder
    }

    #[test]
    fn identical_executions_are_up_to_date() {
        let previous = execution().build().unwrap();
        let current = execution().build().unwrap();
        assert!(ExecutionChanges::between(Some(&previous), &current).is_up_to_date());
    }

    #[test]
    fn no_history_is_the_only_reason_reported() {
        let current = execution().build().unwrap();
        let changes: Vec<_> = ExecutionChanges::between(None, &current).collect();
        assert_eq!(changes, vec![ExecutionChange::NoHistory]);
    }

    #[test]
    fn a_failed_previous_execution_forces_a_run() {
        let previous = execution().successful(false).build().unwrap();
        let current = execution().build().unwrap();
        let changes: Vec<_> = ExecutionChanges::between(Some(&previous), &current).collect();
        assert!(changes.contains(&ExecutionChange::PreviousFailed));
    }

    #[test]
    fn an_implementation_change_is_reported_before_file_diffs() {
        let previous = execution().build().unwrap();
        let current = execution()
            .task_implementation(implementation("v2"))
            .input_file_trees(BTreeMap::from([(
                "sources".to_string(),
                tree(&[("/w/a.c", b"changed")]),
            )]))
            .build()
            .unwrap();

        let first = ExecutionChanges::between(Some(&previous), &current)
            .next()
            .unwrap();
        assert_matches!(first, ExecutionChange::ImplementationChanged { .. });
    }

    #[test]
    fn input_property_differences_are_categorized() {
        let previous = execution().build().unwrap();
        let current = execution()
            .input_properties(BTreeMap::from([
                ("level".to_string(), Arc::new(ValueSnapshot::Integer(3))),
                ("verbose".to_string(), Arc::new(ValueSnapshot::Bool(true))),
            ]))
            .build()
            .unwrap();

        let changes: Vec<_> = ExecutionChanges::between(Some(&previous), &current).collect();
        assert!(changes.contains(&ExecutionChange::InputPropertyChanged {
            property: "level".to_string()
        }));
        assert!(changes.contains(&ExecutionChange::InputPropertyAdded {
            property: "verbose".to_string()
        }));
    }

    #[test]
    fn input_file_changes_carry_the_property_and_path() {
        let previous = execution().build().unwrap();
        let current = execution()
            .input_file_trees(BTreeMap::from([(
                "sources".to_string(),
                tree(&[("/w/a.c", b"edited")]),
            )]))
            .build()
            .unwrap();

        let changes: Vec<_> = ExecutionChanges::between(Some(&previous), &current).collect();
        assert_matches!(
            &changes[..],
            [ExecutionChange::InputFileChanged { property, change: FileChange::Modified { path, .. } }]
                if property == "sources" && path == "/w/a.c"
        );
    }

    #[test]
    fn an_overlap_on_the_current_execution_forces_a_run() {
        let previous = execution().build().unwrap();
        let current = execution()
            .detected_overlapping_outputs(Some(OverlappingOutputs::new("out", "/out/o2")))
            .build()
            .unwrap();

        let changes: Vec<_> = ExecutionChanges::between(Some(&previous), &current).collect();
        assert_matches!(&changes[..], [ExecutionChange::OutputsOverlap(_)]);
    }

    #[test]
    fn discovered_input_changes_are_reported_last() {
        let previous = execution()
            .discovered_inputs(tree(&[("/w/gen.h", b"old")]))
            .build()
            .unwrap();
        let current = execution()
            .input_properties(BTreeMap::from([(
                "level".to_string(),
                Arc::new(ValueSnapshot::Integer(9)),
            )]))
            .discovered_inputs(tree(&[("/w/gen.h", b"new")]))
            .build()
            .unwrap();

        let changes: Vec<_> = ExecutionChanges::between(Some(&previous), &current).collect();
        assert_matches!(changes.first(), Some(ExecutionChange::InputPropertyChanged { .. }));
        assert_matches!(
            changes.last(),
            Some(ExecutionChange::DiscoveredInputChanged { .. })
        );
    }
}
