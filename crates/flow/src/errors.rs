use std::path::PathBuf;

use tabflow_artifacts::StoreError;
use tabflow_backends::BackendError;
use tabflow_frame::{ArtifactKind, DataType, Value};
use thiserror::Error;

use crate::graph::TaskId;

/// Errors raised while building a graph. Nothing has run yet.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Stage `{0}` is declared twice")]
    DuplicateStage(String),
    #[error("Stage `{0}` is not declared")]
    UnknownStage(String),
    #[error("Task `{0}` is registered twice")]
    DuplicateTask(TaskId),
    #[error("Stage `{stage}` already has an output named `{name}`")]
    DuplicateOutput { stage: String, name: String },
    #[error("Task `{task}` reads an output of `{input}`, which is not in this graph")]
    UnknownInput { task: TaskId, input: TaskId },
    #[error("Task `{task}` reads an output of `{input}`, which belongs to a later stage")]
    StageOrder { task: TaskId, input: TaskId },
    #[error("Query of task `{task}` reads `{input}`, which is not bound")]
    MissingBinding { task: String, input: String },
    #[error("Task `{0}` is not in this graph")]
    UnknownTarget(TaskId),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Why a task did not produce its outputs.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task failed: {0:#}")]
    Task(#[from] anyhow::Error),
    #[error("Task panicked: {0}")]
    Panicked(String),
    #[error("Concurrent execution of the same invocation failed: {0}")]
    Coalesced(String),
    #[error("Task `{task}` returned {found} artifacts, it declares {expected}")]
    OutputArity { task: TaskId, expected: usize, found: usize },
    #[error("Output `{output}` of task `{task}` is a {found}, it is declared as a {expected}")]
    OutputKind {
        task: TaskId,
        output: String,
        expected: ArtifactKind,
        found: ArtifactKind,
    },
    #[error("Input {index} is a {found}, expected a {expected}")]
    InputKind {
        index: usize,
        expected: ArtifactKind,
        found: ArtifactKind,
    },
    #[error("Task has no input {0}")]
    MissingInput(usize),
    #[error("Task `{0}` draws randomness but declares neither a seed nor non-cacheable")]
    UnseededRandomness(TaskId),
    #[error("Task `{0}` is not selected and has no cached outputs")]
    NotMaterialized(TaskId),
    #[error("Aborted because `{0}` did not succeed")]
    Aborted(TaskId),
    #[error("Aborted because another task of stage `{0}` failed")]
    StageStopped(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The first backend whose reduced output diverges from the reference backend.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Backend `{backend}` diverges on `{metric}`: found {found}, `{reference}` has {expected}")]
pub struct EquivalenceMismatch {
    pub reference: String,
    pub backend: String,
    pub metric: String,
    pub expected: Value,
    pub found: Value,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error(transparent)]
    Mismatch(#[from] EquivalenceMismatch),
    #[error("Nothing to compare")]
    Empty,
    #[error("Output of backend `{backend}` has no column `{column}`")]
    UnknownColumn { backend: String, column: String },
    #[error("Column `{column}` of backend `{backend}` is {ty}, expected a numeric column")]
    NotNumeric { backend: String, column: String, ty: DataType },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config file {path}: {error}")]
    Io { path: PathBuf, error: std::io::Error },
    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid config file {path}: {error}")]
    TomlFile { path: PathBuf, error: toml::de::Error },
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("No backend is registered as `{0}`")]
    UnknownBackend(String),
    #[error("Unable to start workers: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
