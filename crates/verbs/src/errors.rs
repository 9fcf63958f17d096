use tabflow_frame::DataType;
use thiserror::Error;

/// Errors raised while building a [crate::Chain].
/// They are detected at construction time, never during execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("Unknown column `{name}` in `{verb}`; available columns are [{available}]")]
    UnknownColumn {
        name: String,
        verb: &'static str,
        available: String,
    },
    #[error("Window function `{func}` requires an ordering key")]
    UnorderedWindow { func: &'static str },
    #[error("Duplicate column `{0}`")]
    DuplicateColumn(String),
    #[error("Type mismatch in `{context}`: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: DataType,
    },
    #[error("Cannot infer the type of a null literal; use a typed null")]
    UntypedNull,
    #[error("Cannot cast {from} to {to}")]
    InvalidCast { from: DataType, to: DataType },
    #[error("Function `{func}` takes {expected} arguments, found {found}")]
    Arity {
        func: &'static str,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    InvalidJoin(#[from] InvalidJoin),
    #[error("`{0}` cannot follow `group_by`; only `summarise` or `alias` can")]
    NotAggregate(&'static str),
    #[error("`select` requires at least one column")]
    EmptySelect,
    #[error("`order_by` requires at least one key")]
    EmptyOrder,
    #[error("A source can only start a chain")]
    MisplacedSource,
    #[error("Source `{0}` is bound to two different schemas")]
    ConflictingSource(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidJoin {
    #[error("Join requires at least one equality predicate")]
    EmptyPredicate,
    #[error("Join on [{on}] does not cover a primary or unique key of either side")]
    NotKeyEquivalent { on: String },
    #[error("Cannot join `{left}` ({left_ty}) with `{right}` ({right_ty})")]
    KeyType {
        left: String,
        left_ty: DataType,
        right: String,
        right_ty: DataType,
    },
}

impl ConstructionError {
    pub(crate) fn type_mismatch(context: impl ToString, expected: &str, found: DataType) -> Self {
        Self::TypeMismatch {
            context: context.to_string(),
            expected: expected.to_owned(),
            found,
        }
    }
}
