//! Backends execute a [Query] against bound input tables.
//!
//! There are three kinds:
//!
//! * [Eager] interprets a chain directly over in-memory rows
//! * [LazySqlite] compiles a chain to SQL and runs it on SQLite when collected
//! * [RawSqlite] runs hand written SQL and exists only as a validation oracle
//!
//! Every backend returns columns in chain order
//! and resolves join name clashes the same way, see [tabflow_verbs::Join::layout].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tabflow_frame::{Schema, Table};
use tabflow_verbs::Chain;

pub mod eager;
pub mod errors;
pub mod eval;
pub mod lazy;
pub mod raw;
mod sqlite;

pub use eager::Eager;
pub use errors::BackendError;
pub use lazy::{LazySqlite, LazyTable};
pub use raw::{RawQuery, RawSqlite};

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Eager,
    LazyCompiled,
    Raw,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eager => "eager",
            Self::LazyCompiled => "lazy",
            Self::Raw => "raw",
        })
    }
}

/// What a backend is asked to run.
#[derive(Debug, Clone)]
pub enum Query {
    Chain(Chain),
    Raw(RawQuery),
}

impl Query {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chain(_) => "chain",
            Self::Raw(_) => "raw",
        }
    }

    /// The names of the input tables the query reads.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Self::Chain(chain) => chain.sources().keys().map(|k| &**k).collect(),
            Self::Raw(raw) => raw.bindings(),
        }
    }
}

impl From<Chain> for Query {
    fn from(chain: Chain) -> Self {
        Self::Chain(chain)
    }
}

impl From<RawQuery> for Query {
    fn from(raw: RawQuery) -> Self {
        Self::Raw(raw)
    }
}

/// Input tables by the name a query refers to them with.
#[derive(Debug, Clone, Default)]
pub struct BoundInputs {
    tables: BTreeMap<Box<str>, Arc<Table>>,
}

impl BoundInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: &str, table: impl Into<Arc<Table>>) -> Self {
        self.insert(name, table);
        self
    }

    pub fn insert(&mut self, name: &str, table: impl Into<Arc<Table>>) {
        self.tables.insert(name.into(), table.into());
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Table>> {
        self.tables
            .get(name)
            .ok_or_else(|| BackendError::MissingInput(name.to_owned()))
    }

    /// Look up a source of a chain and check it has the expected shape.
    pub fn source(&self, name: &str, expected: &Schema) -> Result<&Arc<Table>> {
        let table = self.get(name)?;
        if !table.schema().same_shape(expected) {
            return Err(BackendError::InputSchema {
                name: name.to_owned(),
                expected: expected.to_string(),
                found: table.schema().to_string(),
            });
        }
        Ok(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Table>)> {
        self.tables.iter().map(|(k, v)| (&**k, v))
    }
}

/// An execution engine for queries.
pub trait Backend: Send + Sync {
    /// The name under which the backend is registered.
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Text identifying exactly what [Backend::execute] would run for `query`.
    /// Equal texts over equal inputs produce equal results.
    fn describe(&self, query: &Query) -> Result<String>;

    fn execute(&self, query: &Query, inputs: &BoundInputs) -> Result<Table>;
}
