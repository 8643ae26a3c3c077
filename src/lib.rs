//! # Drydock Engine
//!
//! The incremental-execution engine of the Drydock build system. The engine keeps a
//! persistent, content-addressed record of every task execution: a fingerprint of the
//! task's implementation, fingerprints of its declared input values, and hashed
//! snapshots of its input and output file trees.
//!
//! On each build, an executor asks the [TaskHistoryRepository] for a [TaskHistory],
//! compares the freshly captured state against the previous record, and either skips
//! the task or runs it and persists the new record. The delicate parts live here: the
//! snapshot data model, the change comparison, the handling of output directories
//! shared between independent tasks, and the cross-process persistence protocol.
//!
//! Scheduling, task semantics, and the command line belong to the enclosing tool.

mod config;
mod history;
mod interner;
mod model;
mod output_filter;
mod overlap;
mod snapshot;
mod store;

pub use config::*;
pub use history::*;
pub use interner::*;
pub use model::*;
pub use output_filter::*;
pub use overlap::*;
pub use snapshot::*;
pub use store::*;

#[macro_use]
extern crate derive_builder;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;
