pub mod explain;
pub mod list;
pub mod run;
