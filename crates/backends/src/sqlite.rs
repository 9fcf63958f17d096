//! A thin session over an in-memory SQLite database,
//! shared by the lazy and raw backends.

use itertools::Itertools;
use rusqlite::types::{ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, ToSql, params_from_iter};
use tabflow_compiler::{Dialect, ORD, Sqlite};
use tabflow_frame::{DataType, Row, Schema, Table, Value};

use crate::{BackendError, Result};

pub(crate) struct Session {
    conn: Connection,
}

/// A result column as SQLite reports it.
#[derive(Debug, Clone)]
pub(crate) struct Column {
    pub name: String,
    /// Only known when the column is a direct reference to a table column.
    pub decl_type: Option<DataType>,
}

impl From<rusqlite::Column<'_>> for Column {
    fn from(col: rusqlite::Column<'_>) -> Self {
        let decl_type = col.decl_type().map(str::to_ascii_lowercase).and_then(|decl| match &*decl {
            "boolean" | "bool" => Some(DataType::Bool),
            s if s.contains("int") => Some(DataType::I64),
            s if s.contains("char") || s.contains("clob") || s.contains("text") => Some(DataType::Str),
            s if s.contains("real") || s.contains("floa") || s.contains("doub") => Some(DataType::F64),
            _ => None,
        });
        Self {
            name: col.name().to_owned(),
            decl_type,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ResultSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Check the result columns against `schema` by name and position,
    /// then convert every value to its column type.
    pub fn conform(self, schema: &Schema) -> Result<Vec<Row>> {
        let mut names = self.columns.iter().map(|c| c.name.as_str());
        if !names.clone().eq(schema.names()) {
            return Err(BackendError::SchemaMismatch {
                column: "*".to_owned(),
                expected: schema.names().join(", "),
                found: names.join(", "),
            });
        }
        self.rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(schema.columns())
                    .map(|(v, col)| {
                        let found = v.data_type().map_or("null", DataType::name);
                        v.coerce(col.ty).ok_or_else(|| BackendError::ValueType {
                            column: col.name.to_string(),
                            expected: col.ty,
                            found: found.to_owned(),
                        })
                    })
                    .collect()
            })
            .collect()
    }
}

/// Binds a [Value] as a statement parameter.
struct Param<'a>(&'a Value);

impl ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Bool(b) => ToSqlOutput::Owned(Sql::Integer(*b as i64)),
            Value::I64(v) => ToSqlOutput::Owned(Sql::Integer(*v)),
            Value::F64(v) => ToSqlOutput::Owned(Sql::Real(*v)),
            Value::Str(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn column_type(ty: DataType) -> &'static str {
    match ty {
        DataType::Bool => "BOOLEAN",
        ty => Sqlite.type_name(ty),
    }
}

fn value(v: ValueRef<'_>, i: usize, name: &str) -> rusqlite::Result<Value> {
    Ok(match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::I64(v),
        ValueRef::Real(v) => Value::F64(v),
        ValueRef::Text(bytes) => Value::str(std::str::from_utf8(bytes).map_err(rusqlite::Error::Utf8Error)?),
        ValueRef::Blob(_) => return Err(rusqlite::Error::InvalidColumnType(i, name.to_owned(), Type::Blob)),
    })
}

impl Session {
    pub fn open() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Create the table `name` holding the rows of `table`,
    /// with each row's position stored in an extra [ORD] column.
    pub fn load(&mut self, name: &str, table: &Table) -> Result<()> {
        let q = |ident: &str| Sqlite.quote(ident);
        let cols = table
            .schema()
            .columns()
            .iter()
            .map(|c| format!("{} {}", q(&c.name), column_type(c.ty)))
            .chain([format!("{} INTEGER", q(ORD))])
            .join(", ");
        let placeholders = (1..=table.num_columns() + 1).map(|n| Sqlite.placeholder(n)).join(", ");

        let tx = self.conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", q(name)), [])?;
        tx.execute(&format!("CREATE TABLE {} ({cols})", q(name)), [])?;
        {
            let mut stmt = tx.prepare(&format!("INSERT INTO {} VALUES ({placeholders})", q(name)))?;
            for (i, row) in table.rows().iter().enumerate() {
                let ord = Value::I64(i as i64);
                stmt.execute(params_from_iter(row.iter().chain([&ord]).map(Param)))?;
            }
        }
        tx.commit()?;
        tracing::trace!(table = name, rows = table.num_rows(), "loaded input");
        Ok(())
    }

    pub fn query(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns = stmt.columns().into_iter().map(Column::from).collect::<Vec<_>>();
        let rows = stmt
            .query(params_from_iter(params.iter().map(Param)))?
            .mapped(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| value(row.get_ref(i)?, i, &col.name))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ResultSet { columns, rows })
    }
}
