//! Staged, cache-aware task graphs.
//!
//! A [Graph] is declared with a [GraphBuilder]: stages in order, then tasks,
//! each with a version tag and typed handles to the outputs it reads.
//! [Flow::run] executes it on a worker pool. Every task invocation is fingerprinted
//! and served from the [tabflow_artifacts::ArtifactStore] when the fingerprint is known.
//!
//! [transform_task] binds one query to one backend, and [equivalence_task]
//! checks that several backends computed the same thing.

pub mod config;
pub mod context;
pub mod equivalence;
pub mod errors;
pub mod fingerprint;
pub mod graph;
pub mod materializer;
pub mod scheduler;
pub mod tasks;

pub use config::RunConfig;
pub use context::TaskContext;
pub use equivalence::{Reduction, validate, values_agree};
pub use errors::{ConfigError, EquivalenceMismatch, GraphError, TaskError, ValidationError};
pub use graph::{Determinism, Graph, GraphBuilder, OutputRef, OutputSpec, TaskDef, TaskHandle, TaskId};
pub use materializer::{Materialized, MaterializedOutput, Materializer, Mode, Source};
pub use scheduler::{Flow, RunResult, TaskReport, TaskState};
pub use tasks::{BackendRegistry, equivalence_task, transform_task};
