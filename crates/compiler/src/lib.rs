//! Compile verb chains to SQL.
//!
//! Before translation, filters are pushed towards the sources by the rules in [rules].
//! Row order, null ordering and window tie breaks are encoded explicitly,
//! so the query observes the same order on every engine.

pub mod compile;
pub mod dialect;
pub mod errors;
pub mod rules;

pub use compile::{CompiledQuery, ORD, compile};
pub use dialect::{Dialect, Postgres, Sqlite};
pub use errors::CompileError;
