//! Ready-made tasks: running a query on a backend, and checking that backends agree.

use std::sync::Arc;

use itertools::Itertools;
use tabflow_backends::{Backend, BoundInputs, Eager, LazySqlite, Query, RawSqlite};
use tabflow_frame::{ColumnDef, DataType, Schema, Table, Value};

use crate::config::RunConfig;
use crate::equivalence::{Reduction, validate};
use crate::errors::{ConfigError, GraphError};
use crate::graph::{OutputRef, TaskDef};

/// Backends by the name a [RunConfig] selects them with.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `eager`, `sqlite` and `raw_sqlite`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(Eager::default())
            .register(LazySqlite::default())
            .register(RawSqlite::default());
        registry
    }

    /// Register `backend`, replacing any backend of the same name.
    pub fn register(&mut self, backend: impl Backend + 'static) -> &mut Self {
        self.backends.retain(|b| b.name() != backend.name());
        self.backends.push(Arc::new(backend));
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Backend>, ConfigError> {
        self.backends
            .iter()
            .find(|b| b.name() == name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownBackend(name.to_owned()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.backends.iter().map(|b| b.name())
    }

    /// The backends taking part in a run, in the order the config lists them.
    pub fn select(&self, config: &RunConfig) -> Result<Vec<Arc<dyn Backend>>, ConfigError> {
        config.backends.iter().map(|name| self.get(name)).collect()
    }
}

/// A task running `query` on `backend`.
///
/// Each binding names the table the query reads and the output that provides it.
/// What the backend will run, as reported by [Backend::describe], is part of the fingerprint,
/// so editing the query, or a change in how it compiles, invalidates the cache.
pub fn transform_task(
    name: &str,
    version: &str,
    backend: Arc<dyn Backend>,
    query: impl Into<Query>,
    bindings: &[(&str, &OutputRef)],
) -> Result<TaskDef, GraphError> {
    let query = query.into();
    for input in query.inputs() {
        if !bindings.iter().any(|(bound, _)| *bound == input) {
            return Err(GraphError::MissingBinding {
                task: name.to_owned(),
                input: input.to_owned(),
            });
        }
    }
    let description = backend.describe(&query)?;
    let names: Vec<String> = bindings.iter().map(|(n, _)| (*n).to_owned()).collect();
    let backend_name = backend.name().to_owned();

    let def = TaskDef::new(name, version, move |ctx| {
        let mut inputs = BoundInputs::new();
        for (i, name) in names.iter().enumerate() {
            inputs.insert(name, ctx.table(i)?.clone());
        }
        let table = backend.execute(&query, &inputs)?;
        Ok(vec![table.into()])
    })
    .inputs(bindings.iter().map(|(_, o)| *o))
    .param("backend", backend_name)
    .param("query", description);
    Ok(def)
}

/// A task comparing the outputs of several backends under `reduction`.
///
/// The first output is the reference. The task fails with the first divergence;
/// on success it produces a `(metric, value)` table of the reference's reduction.
pub fn equivalence_task(
    name: &str,
    version: &str,
    reduction: Reduction,
    tolerance: f64,
    outputs: &[(&str, &OutputRef)],
) -> TaskDef {
    let backends: Vec<String> = outputs.iter().map(|(b, _)| (*b).to_owned()).collect();
    let described = format!("{reduction:?}");
    TaskDef::new(name, version, move |ctx| {
        let tables = ctx.tables()?;
        let pairs: Vec<(&str, &Table)> = backends.iter().map(|b| b.as_str()).zip(tables).collect();
        let reduced = validate(&pairs, &reduction, tolerance)?;

        let schema = Schema::new(vec![
            ColumnDef::new("metric", DataType::Str).not_null(),
            ColumnDef::new("value", DataType::Str),
        ])?;
        let rows = reduced
            .into_iter()
            .map(|(metric, value)| vec![Value::from(metric), Value::from(value.to_string())].into())
            .collect();
        Ok(vec![Table::new(ctx.id().name.as_str(), schema, rows)?.into()])
    })
    .inputs(outputs.iter().map(|(_, o)| *o))
    .param("backends", backends_param(outputs))
    .param("reduction", described)
    .param("tolerance", tolerance)
}

fn backends_param(outputs: &[(&str, &OutputRef)]) -> String {
    outputs.iter().map(|(b, _)| *b).join(",")
}
