//! Checking that backends agree.
//!
//! Each backend's output is reduced to a few scalars and every reduction is compared
//! against the first backend's: floats within a relative tolerance, anything else exactly.

use std::fmt;

use tabflow_frame::{DataType, Table, Value};

use crate::errors::{EquivalenceMismatch, ValidationError};

/// How a table is reduced before comparing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reduction {
    Rows,
    /// Non-null values of a column.
    Count(String),
    Sum(String),
    Mean(String),
    /// The row count, and for each column of the reference output
    /// its non-null count and, when numeric or boolean, its sum.
    Summary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Metric {
    Rows,
    Count(String),
    Sum(String),
    Mean(String),
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows => f.write_str("rows"),
            Self::Count(c) => write!(f, "count({c})"),
            Self::Sum(c) => write!(f, "sum({c})"),
            Self::Mean(c) => write!(f, "mean({c})"),
        }
    }
}

fn metrics(reduction: &Reduction, reference: &Table) -> Vec<Metric> {
    match reduction {
        Reduction::Rows => vec![Metric::Rows],
        Reduction::Count(c) => vec![Metric::Count(c.clone())],
        Reduction::Sum(c) => vec![Metric::Sum(c.clone())],
        Reduction::Mean(c) => vec![Metric::Mean(c.clone())],
        Reduction::Summary => {
            let mut out = vec![Metric::Rows];
            for col in reference.schema().columns() {
                out.push(Metric::Count(col.name.to_string()));
                if col.ty != DataType::Str {
                    out.push(Metric::Sum(col.name.to_string()));
                }
            }
            out
        }
    }
}

fn column<'a>(
    table: &'a Table,
    backend: &str,
    name: &str,
) -> Result<(DataType, impl Iterator<Item = &'a Value> + 'a), ValidationError> {
    let unknown = || ValidationError::UnknownColumn {
        backend: backend.to_owned(),
        column: name.to_owned(),
    };
    let ty = table.schema().column(name).ok_or_else(unknown)?.ty;
    let values = table.column(name).ok_or_else(unknown)?;
    Ok((ty, values.filter(|v| !v.is_null())))
}

fn evaluate(metric: &Metric, table: &Table, backend: &str) -> Result<Value, ValidationError> {
    let not_numeric = |column: &str, ty| ValidationError::NotNumeric {
        backend: backend.to_owned(),
        column: column.to_owned(),
        ty,
    };
    Ok(match metric {
        Metric::Rows => Value::I64(table.num_rows() as i64),
        Metric::Count(c) => Value::I64(column(table, backend, c)?.1.count() as i64),
        Metric::Sum(c) => match column(table, backend, c)? {
            (DataType::I64, values) => {
                let sum: i128 = values.filter_map(Value::as_i64).map(i128::from).sum();
                i64::try_from(sum).map_or(Value::F64(sum as f64), Value::I64)
            }
            (DataType::F64, values) => Value::F64(values.filter_map(Value::as_f64).sum()),
            (DataType::Bool, values) => Value::I64(values.filter(|v| v.as_bool() == Some(true)).count() as i64),
            (ty, _) => return Err(not_numeric(c, ty)),
        },
        Metric::Mean(c) => match column(table, backend, c)? {
            (ty, values) if ty.is_numeric() => {
                let (n, total) = values
                    .filter_map(Value::as_f64)
                    .fold((0usize, 0.0), |(n, t), v| (n + 1, t + v));
                if n == 0 { Value::Null } else { Value::F64(total / n as f64) }
            }
            (ty, _) => return Err(not_numeric(c, ty)),
        },
    })
}

/// Do two reduced values agree?
///
/// Floats, and integers compared with floats, agree within `tolerance` relative to the larger magnitude.
pub fn values_agree(expected: &Value, found: &Value, tolerance: f64) -> bool {
    match (expected, found) {
        (Value::F64(_), Value::F64(_) | Value::I64(_)) | (Value::I64(_), Value::F64(_)) => {
            let (Some(a), Some(b)) = (expected.as_f64(), found.as_f64()) else {
                return false;
            };
            if a.is_nan() || b.is_nan() {
                return a.is_nan() && b.is_nan();
            }
            a == b || (a - b).abs() <= tolerance * a.abs().max(b.abs())
        }
        _ => expected == found,
    }
}

/// Reduce every output and compare it with the first one, the reference.
///
/// Returns the reference's reduction, as `(metric, value)` pairs.
pub fn validate(
    outputs: &[(&str, &Table)],
    reduction: &Reduction,
    tolerance: f64,
) -> Result<Vec<(String, Value)>, ValidationError> {
    let Some(&(reference, first)) = outputs.first() else {
        return Err(ValidationError::Empty);
    };
    let metrics = metrics(reduction, first);
    let expected = metrics
        .iter()
        .map(|m| evaluate(m, first, reference))
        .collect::<Result<Vec<_>, _>>()?;

    for &(backend, table) in &outputs[1..] {
        for (metric, expected) in metrics.iter().zip(&expected) {
            let found = evaluate(metric, table, backend)?;
            if !values_agree(expected, &found, tolerance) {
                tracing::warn!(backend, reference, %metric, %expected, %found, "backends diverge");
                return Err(EquivalenceMismatch {
                    reference: reference.to_owned(),
                    backend: backend.to_owned(),
                    metric: metric.to_string(),
                    expected: expected.clone(),
                    found,
                }
                .into());
            }
        }
    }
    Ok(metrics.iter().map(|m| m.to_string()).zip(expected).collect())
}
