//! The verb chain: a backend-agnostic, immutable description of a tabular transformation.
//!
//! A [Chain] starts at a named source and is extended one [Verb] at a time.
//! Every step is type checked against the schema captured by the previous one,
//! so a chain that builds is a chain every backend can run.

pub mod chain;
pub mod check;
pub mod errors;
pub mod expr;
mod printer;

pub use chain::{Chain, Join, JoinColumn, JoinKind, Side, Verb, Window};
pub use errors::{ConstructionError, InvalidJoin};
pub use expr::{
    AggExpr, AggFunc, BinOp, Expr, NullOrder, OrderKey, ScalarFn, UnOp, WindowFunc, asc, coalesce, col, count,
    count_rows, desc, lag, lead, lit, max, mean, min, rank, row_number, shift, sum, typed_null,
};
