//! The lazy backend compiles a chain to a single SQL query
//! and defers running it until the result is collected.

use tabflow_compiler::{CompiledQuery, Sqlite, compile};
use tabflow_frame::Table;
use tabflow_verbs::Chain;

use crate::sqlite::Session;
use crate::{Backend, BackendError, BackendKind, BoundInputs, Query, Result};

/// Runs compiled chains on a fresh in-memory SQLite database.
#[derive(Debug, Clone)]
pub struct LazySqlite {
    name: String,
}

impl Default for LazySqlite {
    fn default() -> Self {
        Self::new("sqlite")
    }
}

/// A compiled query paired with its inputs. Nothing runs until [LazyTable::collect].
#[derive(Debug, Clone)]
pub struct LazyTable {
    query: CompiledQuery,
    inputs: BoundInputs,
}

impl LazyTable {
    pub fn query(&self) -> &CompiledQuery {
        &self.query
    }

    pub fn collect(&self) -> Result<Table> {
        run(&self.query, &self.inputs)
    }
}

impl LazySqlite {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }

    pub fn compile(&self, chain: &Chain) -> Result<CompiledQuery> {
        Ok(compile(chain, &Sqlite)?)
    }

    /// Compile `chain` and check its sources against `inputs`, without running anything.
    pub fn lazy(&self, chain: &Chain, inputs: &BoundInputs) -> Result<LazyTable> {
        let query = self.compile(chain)?;
        let mut bound = BoundInputs::new();
        for (name, schema) in chain.sources() {
            bound.insert(name, inputs.source(name, schema)?.clone());
        }
        Ok(LazyTable { query, inputs: bound })
    }

    pub fn run(&self, query: &CompiledQuery, inputs: &BoundInputs) -> Result<Table> {
        run(query, inputs)
    }
}

fn run(query: &CompiledQuery, inputs: &BoundInputs) -> Result<Table> {
    let mut session = Session::open()?;
    for name in &query.sources {
        session.load(name, inputs.get(name)?)?;
    }
    let rows = session.query(&query.sql, &query.params)?.conform(&query.schema)?;
    let table = Table::new(&query.name, query.schema.clone(), rows)?;
    tracing::debug!(table = %query.name, rows = table.num_rows(), "collected lazy table");
    Ok(table)
}

impl Backend for LazySqlite {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::LazyCompiled
    }

    fn describe(&self, query: &Query) -> Result<String> {
        match query {
            Query::Chain(chain) => Ok(self.compile(chain)?.to_string()),
            Query::Raw(_) => Err(BackendError::UnsupportedQuery {
                backend: self.name.clone(),
                query: query.kind(),
            }),
        }
    }

    fn execute(&self, query: &Query, inputs: &BoundInputs) -> Result<Table> {
        match query {
            Query::Chain(chain) => self.lazy(chain, inputs)?.collect(),
            Query::Raw(_) => Err(BackendError::UnsupportedQuery {
                backend: self.name.clone(),
                query: query.kind(),
            }),
        }
    }
}
