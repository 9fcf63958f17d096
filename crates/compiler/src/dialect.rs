//! SQL dialects.
//!
//! A dialect renders the few constructs whose spelling or semantics differ between engines.
//! Everything else, including explicit `NULLS FIRST/LAST` ordering, is shared.

use std::fmt::Debug;

use itertools::Itertools;
use tabflow_frame::DataType;
use tabflow_verbs::{AggFunc, NullOrder, OrderKey, ScalarFn};

pub trait Dialect: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// The `n`th (1-based) bound parameter.
    fn placeholder(&self, n: usize) -> String;

    fn type_name(&self, ty: DataType) -> &'static str;

    /// A scalar function call, or [None] if the engine lacks it.
    fn func(&self, func: ScalarFn, args: &[String]) -> Option<String>;

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Floating point division, null on a zero divisor.
    fn div(&self, lhs: &str, rhs: &str) -> String {
        format!("(CAST({lhs} AS {}) / NULLIF({rhs}, 0))", self.type_name(DataType::F64))
    }

    fn cast(&self, expr: &str, from: DataType, to: DataType) -> String {
        match (from, to) {
            (DataType::Bool, DataType::I64 | DataType::F64) => format!(
                "CAST((CASE WHEN {expr} THEN 1 WHEN NOT {expr} THEN 0 END) AS {})",
                self.type_name(to)
            ),
            _ => format!("CAST({expr} AS {})", self.type_name(to)),
        }
    }

    fn agg(&self, func: AggFunc, arg: Option<&str>) -> String {
        let arg = arg.unwrap_or("*");
        match func {
            AggFunc::Count | AggFunc::CountRows => format!("COUNT({arg})"),
            AggFunc::Sum => format!("SUM({arg})"),
            AggFunc::Mean => format!("AVG({arg})"),
            AggFunc::Min => format!("MIN({arg})"),
            AggFunc::Max => format!("MAX({arg})"),
        }
    }

    fn order_term(&self, key: &OrderKey) -> String {
        format!(
            "{} {} NULLS {}",
            self.quote(&key.col),
            if key.desc { "DESC" } else { "ASC" },
            match key.nulls {
                NullOrder::First => "FIRST",
                NullOrder::Last => "LAST",
            }
        )
    }
}

/// SQLite, as bundled with `rusqlite`.
/// Booleans are stored as integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, n: usize) -> String {
        format!("?{n}")
    }

    fn type_name(&self, ty: DataType) -> &'static str {
        match ty {
            DataType::Bool | DataType::I64 => "INTEGER",
            DataType::F64 => "REAL",
            DataType::Str => "TEXT",
        }
    }

    fn func(&self, func: ScalarFn, args: &[String]) -> Option<String> {
        match (func, args) {
            (ScalarFn::Round(digits), [arg]) if digits >= 0 => Some(format!("ROUND({arg}, {digits})")),
            // `ROUND` only takes non-negative digits.
            (ScalarFn::Round(digits), [arg]) => {
                let scale = 10f64.powi(-digits);
                Some(format!("(ROUND({arg} / {scale:?}) * {scale:?})"))
            }
            (ScalarFn::Abs, [arg]) => Some(format!("ABS({arg})")),
            (ScalarFn::Strip, [arg]) => Some(format!("TRIM({arg})")),
            (ScalarFn::Coalesce, args) if !args.is_empty() => Some(format!("COALESCE({})", args.iter().join(", "))),
            // The math functions are an optional SQLite extension.
            _ => None,
        }
    }
}

/// PostgreSQL.
/// Compile only, there is no bundled engine to run it on.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn type_name(&self, ty: DataType) -> &'static str {
        match ty {
            DataType::Bool => "BOOLEAN",
            DataType::I64 => "BIGINT",
            DataType::F64 => "DOUBLE PRECISION",
            DataType::Str => "TEXT",
        }
    }

    fn func(&self, func: ScalarFn, args: &[String]) -> Option<String> {
        match (func, args) {
            (ScalarFn::Round(digits), [arg]) => Some(format!(
                "CAST(ROUND(CAST({arg} AS NUMERIC), {digits}) AS DOUBLE PRECISION)"
            )),
            (ScalarFn::Abs, [arg]) => Some(format!("ABS({arg})")),
            (ScalarFn::Sqrt, [arg]) => Some(format!("(CASE WHEN {arg} >= 0 THEN SQRT({arg}) END)")),
            (ScalarFn::Pow, [base, exp]) => Some(format!("POWER(CAST({base} AS DOUBLE PRECISION), {exp})")),
            (ScalarFn::Strip, [arg]) => Some(format!("TRIM({arg})")),
            (ScalarFn::Coalesce, args) if !args.is_empty() => Some(format!("COALESCE({})", args.iter().join(", "))),
            _ => None,
        }
    }

    fn cast(&self, expr: &str, from: DataType, to: DataType) -> String {
        match (from, to) {
            // Postgres rounds when casting to an integer, truncate instead.
            (DataType::F64, DataType::I64) => format!("CAST(TRUNC({expr}) AS BIGINT)"),
            (DataType::Bool, DataType::I64 | DataType::F64) => format!(
                "CAST((CASE WHEN {expr} THEN 1 WHEN NOT {expr} THEN 0 END) AS {})",
                self.type_name(to)
            ),
            _ => format!("CAST({expr} AS {})", self.type_name(to)),
        }
    }

    fn agg(&self, func: AggFunc, arg: Option<&str>) -> String {
        let arg = arg.unwrap_or("*");
        match func {
            AggFunc::Count | AggFunc::CountRows => format!("COUNT({arg})"),
            AggFunc::Sum => format!("SUM({arg})"),
            AggFunc::Mean => format!("CAST(AVG({arg}) AS DOUBLE PRECISION)"),
            AggFunc::Min => format!("MIN({arg})"),
            AggFunc::Max => format!("MAX({arg})"),
        }
    }
}
