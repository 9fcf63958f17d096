use tabflow_compiler::CompileError;
use tabflow_frame::{DataType, FrameError};
use tabflow_verbs::ConstructionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    #[error("Backend `{backend}` cannot execute a {query} query")]
    UnsupportedQuery { backend: String, query: &'static str },
    #[error("Input `{0}` is not bound")]
    MissingInput(String),
    #[error("Input `{name}` has schema {found}, expected {expected}")]
    InputSchema {
        name: String,
        expected: String,
        found: String,
    },
    #[error("Result column `{column}`: expected {expected}, found {found}")]
    SchemaMismatch {
        column: String,
        expected: String,
        found: String,
    },
    #[error("Result column `{column}` holds a value of type {found}, expected {expected}")]
    ValueType {
        column: String,
        expected: DataType,
        found: String,
    },
    #[error("Integer overflow computing `{0}`")]
    IntegerOverflow(String),
    #[error("Engine failure: {0}")]
    Execution(#[from] rusqlite::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}
