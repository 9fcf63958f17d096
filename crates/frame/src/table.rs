use std::sync::Arc;

use crate::errors::FrameError;
use crate::schema::Schema;
use crate::types::{DataType, Value};

/// A row of a [Table], with one value per schema column.
pub type Row = Box<[Value]>;

/// A named, schema-tagged, fully materialized table.
///
/// Rows are stored in order.
/// The only row identity is whatever keys the [Schema] declares.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: Box<str>,
    schema: Arc<Schema>,
    rows: Vec<Row>,
}

impl Table {
    /// Build a table, validating every row against the schema.
    ///
    /// Integers stored in a float column are widened.
    /// Anything else that does not match the column type is an error.
    pub fn new(name: &str, schema: impl Into<Arc<Schema>>, mut rows: Vec<Row>) -> Result<Self, FrameError> {
        let schema = schema.into();
        for (i, row) in rows.iter_mut().enumerate() {
            check_row(name, &schema, i, row)?;
        }
        Ok(Self {
            name: name.into(),
            schema,
            rows,
        })
    }

    /// Build a table from column vectors.
    pub fn from_columns(
        name: &str,
        schema: impl Into<Arc<Schema>>,
        columns: Vec<Vec<Value>>,
    ) -> Result<Self, FrameError> {
        let nrows = columns.first().map_or(0, Vec::len);
        if columns.iter().any(|c| c.len() != nrows) {
            return Err(FrameError::Ragged(name.to_owned()));
        }
        let mut iters = columns.into_iter().map(Vec::into_iter).collect::<Vec<_>>();
        let rows = (0..nrows)
            .map(|_| iters.iter_mut().filter_map(Iterator::next).collect::<Row>())
            .collect();
        Self::new(name, schema, rows)
    }

    /// An empty table with the given schema.
    pub fn empty(name: &str, schema: impl Into<Arc<Schema>>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            rows: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the table, keeping its contents.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.into();
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.len()
    }

    /// Iterate over the values of the column `name`.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value> + '_> {
        let i = self.schema.position(name)?;
        Some(self.rows.iter().map(move |row| &row[i]))
    }

    /// Feed a canonical encoding of the schema and rows into `hasher`.
    /// The table name is not part of the content.
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(b"table");
        hasher.update(&(self.schema.len() as u64).to_le_bytes());
        for col in self.schema.columns() {
            hasher.update(&(col.name.len() as u64).to_le_bytes());
            hasher.update(col.name.as_bytes());
            hasher.update(col.ty.name().as_bytes());
        }
        hasher.update(&(self.rows.len() as u64).to_le_bytes());
        for row in &self.rows {
            for value in row.iter() {
                value.hash_into(hasher);
            }
        }
    }
}

fn check_row(table: &str, schema: &Schema, i: usize, row: &mut Row) -> Result<(), FrameError> {
    if row.len() != schema.len() {
        return Err(FrameError::Arity {
            table: table.to_owned(),
            row: i,
            expected: schema.len(),
            found: row.len(),
        });
    }
    for (value, col) in row.iter_mut().zip(schema.columns()) {
        match value.data_type() {
            None if !col.nullable => {
                return Err(FrameError::NullViolation {
                    table: table.to_owned(),
                    column: col.name.to_string(),
                    row: i,
                });
            }
            None => {}
            Some(ty) if ty == col.ty => {}
            Some(DataType::I64) if col.ty == DataType::F64 => {
                *value = Value::F64(value.as_f64().unwrap_or_default());
            }
            Some(ty) => {
                return Err(FrameError::Type {
                    table: table.to_owned(),
                    column: col.name.to_string(),
                    row: i,
                    expected: col.ty,
                    found: ty,
                });
            }
        }
    }
    Ok(())
}

/// Build a [Row] from anything convertible into values.
#[macro_export]
macro_rules! row {
    ($($v:expr),* $(,)?) => {
        vec![$($crate::Value::from($v)),*].into_boxed_slice()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use pretty_assertions::assert_eq;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("pk", DataType::I64).not_null(),
            ColumnDef::new("x", DataType::F64),
        ])
        .unwrap()
    }

    #[test]
    fn integers_widen_into_float_columns() {
        let t = Table::new("t", schema(), vec![row![1i64, 2i64]]).unwrap();
        assert_eq!(t.rows()[0][1], Value::F64(2.0));
    }

    #[test]
    fn null_in_not_null_column() {
        let err = Table::new("t", schema(), vec![row![None::<i64>, 1.0]]).unwrap_err();
        assert!(matches!(err, FrameError::NullViolation { row: 0, .. }));
    }

    #[test]
    fn type_mismatch() {
        let err = Table::new("t", schema(), vec![row![1i64, "a"]]).unwrap_err();
        assert!(matches!(err, FrameError::Type { expected: DataType::F64, found: DataType::Str, .. }));
    }

    #[test]
    fn from_columns_transposes() {
        let t = Table::from_columns(
            "t",
            schema(),
            vec![vec![1i64.into(), 2i64.into()], vec![0.5.into(), Value::Null]],
        )
        .unwrap();
        assert_eq!(t.rows(), &[row![1i64, 0.5], row![2i64, None::<f64>]]);
        assert_eq!(t.column("x").unwrap().cloned().collect::<Vec<_>>(), vec![Value::F64(0.5), Value::Null]);
    }

    #[test]
    fn content_hash_ignores_name() {
        let a = Table::new("a", schema(), vec![row![1i64, 1.0]]).unwrap();
        let b = a.clone().with_name("b");
        let hash = |t: &Table| {
            let mut h = blake3::Hasher::new();
            t.hash_into(&mut h);
            h.finalize()
        };
        assert_eq!(hash(&a), hash(&b));
    }
}
