//! The tabular data model shared by every tabflow crate:
//! typed [Value]s, [Schema]s, materialized [Table]s and opaque [Blob]s,
//! both of which are [Artifact]s a task can produce.

pub mod artifact;
pub mod errors;
pub mod schema;
pub mod table;
pub mod types;

pub use artifact::{Artifact, ArtifactKind, Blob};
pub use errors::FrameError;
pub use schema::{ColumnDef, Schema};
pub use table::{Row, Table};
pub use types::{DataType, Value};
