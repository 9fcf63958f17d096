use tabflow_verbs::ConstructionError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("The {dialect} dialect does not support `{verb}`")]
    UnsupportedVerb { dialect: &'static str, verb: String },
    #[error("Column name `{0}` is reserved")]
    ReservedColumn(String),
    #[error(transparent)]
    Construction(#[from] ConstructionError),
}
