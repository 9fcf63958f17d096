use thiserror::Error;

use crate::types::DataType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Duplicate column name `{0}`")]
    DuplicateColumn(String),
    #[error("Key column `{0}` is not in the schema")]
    UnknownKeyColumn(String),
    #[error("Row {row} of `{table}` has {found} values but the schema has {expected} columns")]
    Arity {
        table: String,
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Column `{column}` of `{table}` expects {expected} but row {row} holds {found}")]
    Type {
        table: String,
        column: String,
        row: usize,
        expected: DataType,
        found: DataType,
    },
    #[error("Column `{column}` of `{table}` is not nullable but row {row} is null")]
    NullViolation { table: String, column: String, row: usize },
    #[error("Columns have different lengths in `{0}`")]
    Ragged(String),
}
