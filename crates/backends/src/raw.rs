//! The raw backend runs hand written SQL.
//!
//! Tables are referenced as `{name}` in the query text and substituted by quoted identifiers.
//! Each bound table carries its row position in the hidden [ORD] column, so raw text can
//! `ORDER BY {name}.__ord` to reproduce input order. Hidden columns never reach the result.
//!
//! Nothing checks that a raw query means what the chain it stands next to means.
//! It is a hand-checked oracle for validation.

use std::collections::BTreeSet;
use std::sync::Arc;

use itertools::Itertools;
use tabflow_compiler::{Dialect, ORD, Sqlite};
use tabflow_frame::{ColumnDef, DataType, Schema, Table, Value};

use crate::sqlite::{ResultSet, Session};
use crate::{Backend, BackendError, BackendKind, BoundInputs, Query, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct RawQuery {
    name: Box<str>,
    text: Box<str>,
    schema: Option<Arc<Schema>>,
}

enum Piece<'a> {
    Text(&'a str),
    Binding(&'a str),
}

fn is_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `text` around `{ident}` references. Braces around anything else are left alone.
fn pieces(text: &str) -> Vec<Piece<'_>> {
    let mut out = vec![];
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) if is_ident(&after[..end]) => {
                out.push(Piece::Text(&rest[..start]));
                out.push(Piece::Binding(&after[..end]));
                rest = &after[end + 1..];
            }
            _ => {
                out.push(Piece::Text(&rest[..=start]));
                rest = after;
            }
        }
    }
    out.push(Piece::Text(rest));
    out
}

impl RawQuery {
    pub fn new(name: &str, text: &str) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            schema: None,
        }
    }

    /// Declare the result schema instead of inferring it from the returned values.
    pub fn with_schema(mut self, schema: impl Into<Arc<Schema>>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    /// The tables referenced by the query, in order of first use.
    pub fn bindings(&self) -> Vec<&str> {
        pieces(&self.text)
            .into_iter()
            .filter_map(|piece| match piece {
                Piece::Binding(name) => Some(name),
                Piece::Text(_) => None,
            })
            .unique()
            .collect()
    }

    /// The query text with every reference replaced by a quoted identifier.
    pub fn resolve(&self, dialect: &dyn Dialect) -> String {
        pieces(&self.text)
            .into_iter()
            .map(|piece| match piece {
                Piece::Text(text) => text.to_owned(),
                Piece::Binding(name) => dialect.quote(name),
            })
            .collect()
    }
}

/// Runs raw queries on a fresh in-memory SQLite database.
#[derive(Debug, Clone)]
pub struct RawSqlite {
    name: String,
}

impl Default for RawSqlite {
    fn default() -> Self {
        Self::new("raw_sqlite")
    }
}

impl RawSqlite {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }

    pub fn run(&self, query: &RawQuery, inputs: &BoundInputs) -> Result<Table> {
        let mut session = Session::open()?;
        for name in query.bindings() {
            session.load(name, inputs.get(name)?)?;
        }
        let result = visible(session.query(&query.resolve(&Sqlite), &[])?);
        let (schema, rows) = match &query.schema {
            Some(schema) => (schema.clone(), result.conform(schema)?),
            None => {
                let schema = Arc::new(infer(&result)?);
                let rows = result.conform(&schema)?;
                (schema, rows)
            }
        };
        let table = Table::new(&query.name, schema, rows)?;
        tracing::debug!(backend = %self.name, table = %query.name, rows = table.num_rows(), "ran raw query");
        Ok(table)
    }
}

/// Drop hidden columns and, when names clash, keep only the last column of that name.
fn visible(result: ResultSet) -> ResultSet {
    let keep = (0..result.columns.len())
        .filter(|&i| {
            let name = &result.columns[i].name;
            name != ORD && result.columns[i + 1..].iter().all(|c| &c.name != name)
        })
        .collect::<BTreeSet<_>>();
    ResultSet {
        rows: result.rows.into_iter().map(|row| pick(row, &keep)).collect(),
        columns: pick(result.columns, &keep),
    }
}

fn pick<T>(items: Vec<T>, keep: &BTreeSet<usize>) -> Vec<T> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| keep.contains(&i).then_some(item))
        .collect()
}

/// Derive a schema from the values of a result.
///
/// A declared column type is used when every value fits it.
/// Otherwise integers give `i64`, reals or a mix of integers and reals give `f64`,
/// and a column with no values at all defaults to `f64`.
fn infer(result: &ResultSet) -> Result<Schema> {
    let columns = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let values = || result.rows.iter().map(move |row| &row[i]).filter(|v| !v.is_null());
            let fits = |ty: DataType| values().all(|v| v.clone().coerce(ty).is_some());
            let ty = match col.decl_type {
                Some(ty) if fits(ty) => ty,
                _ => {
                    let seen = values().filter_map(Value::data_type).collect::<BTreeSet<_>>();
                    match seen.iter().copied().collect::<Vec<_>>()[..] {
                        [] => DataType::F64,
                        [ty] => ty,
                        [DataType::I64, DataType::F64] => DataType::F64,
                        _ => {
                            return Err(BackendError::SchemaMismatch {
                                column: col.name.clone(),
                                expected: "values of one type".to_owned(),
                                found: seen.iter().join(", "),
                            });
                        }
                    }
                }
            };
            Ok(ColumnDef::new(&col.name, ty))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Schema::new(columns)?)
}

impl Backend for RawSqlite {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Raw
    }

    fn describe(&self, query: &Query) -> Result<String> {
        match query {
            Query::Raw(raw) => Ok(match raw.schema() {
                Some(schema) => format!("{}\n-- as {schema}", raw.text()),
                None => raw.text().to_owned(),
            }),
            Query::Chain(_) => Err(BackendError::UnsupportedQuery {
                backend: self.name.clone(),
                query: query.kind(),
            }),
        }
    }

    fn execute(&self, query: &Query, inputs: &BoundInputs) -> Result<Table> {
        match query {
            Query::Raw(raw) => self.run(raw, inputs),
            Query::Chain(_) => Err(BackendError::UnsupportedQuery {
                backend: self.name.clone(),
                query: query.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tabflow_frame::row;

    fn inputs() -> BoundInputs {
        let a = Table::new(
            "a",
            Schema::from_pairs([("id", DataType::I64), ("x", DataType::F64)]).unwrap(),
            vec![row![2i64, 0.5], row![1i64, None::<f64>]],
        )
        .unwrap();
        let b = Table::new(
            "b",
            Schema::from_pairs([("id", DataType::I64), ("tag", DataType::Str)]).unwrap(),
            vec![row![1i64, "one"], row![2i64, "two"]],
        )
        .unwrap();
        BoundInputs::new().bind("a", a).bind("b", b)
    }

    #[test]
    fn references_are_substituted() {
        let q = RawQuery::new("q", "SELECT * FROM {a} JOIN {b} USING (id) JOIN {a} AS again WHERE x = '{not a ref}'");
        assert_eq!(q.bindings(), vec!["a", "b"]);
        assert_eq!(
            q.resolve(&Sqlite),
            r#"SELECT * FROM "a" JOIN "b" USING (id) JOIN "a" AS again WHERE x = '{not a ref}'"#
        );
    }

    #[test]
    fn later_columns_win_and_order_is_hidden() {
        let q = RawQuery::new(
            "q",
            "SELECT l.*, r.id, r.tag, l.__ord FROM {a} AS l JOIN {b} AS r ON l.id = r.id ORDER BY l.__ord",
        );
        let table = RawSqlite::default().run(&q, &inputs()).unwrap();
        assert_eq!(table.schema().names().collect::<Vec<_>>(), vec!["x", "id", "tag"]);
        assert_eq!(table.into_rows(), vec![row![0.5, 2i64, "two"], row![None::<f64>, 1i64, "one"]]);
    }

    #[test]
    fn expression_types_are_inferred() {
        let q = RawQuery::new("q", "SELECT SUM(id) AS n, AVG(x) AS m, MAX(NULL) AS z FROM {a}");
        let table = RawSqlite::default().run(&q, &inputs()).unwrap();
        let types = table.schema().columns().iter().map(|c| c.ty).collect::<Vec<_>>();
        assert_eq!(types, vec![DataType::I64, DataType::F64, DataType::F64]);
        assert_eq!(table.into_rows(), vec![row![3i64, 0.5, None::<f64>]]);
    }

    #[test]
    fn declared_schema_is_checked() {
        let schema = Schema::from_pairs([("id", DataType::Bool)]).unwrap();
        let q = RawQuery::new("q", "SELECT tag AS id FROM {b}").with_schema(schema);
        let err = RawSqlite::default().run(&q, &inputs()).unwrap_err();
        assert!(matches!(err, BackendError::ValueType { expected: DataType::Bool, .. }));
    }

    #[test]
    fn chains_are_rejected() {
        let chain = tabflow_verbs::Chain::source("a", Schema::from_pairs([("id", DataType::I64)]).unwrap());
        let err = RawSqlite::default().describe(&chain.into()).unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedQuery { query: "chain", .. }));
    }
}
