use std::fmt;

use itertools::Itertools;

use crate::errors::FrameError;
use crate::types::DataType;

/// A column in a [Schema].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDef {
    pub name: Box<str>,
    pub ty: DataType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: &str, ty: DataType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// The ordered, uniquely named columns of a table,
/// along with its declared primary and unique keys.
///
/// Keys are stored as column positions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Schema {
    columns: Vec<ColumnDef>,
    primary_key: Vec<usize>,
    unique_keys: Vec<Vec<usize>>,
}

impl Schema {
    /// Build a schema, rejecting duplicate column names.
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self, FrameError> {
        if let Some(name) = columns.iter().map(|c| &c.name).duplicates().next() {
            return Err(FrameError::DuplicateColumn(name.to_string()));
        }
        Ok(Self {
            columns,
            primary_key: vec![],
            unique_keys: vec![],
        })
    }

    /// Shorthand for a schema of nullable columns.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, DataType)>) -> Result<Self, FrameError> {
        Self::new(pairs.into_iter().map(|(name, ty)| ColumnDef::new(name, ty)).collect())
    }

    /// Declare the primary key.
    /// Key columns are implicitly not null.
    pub fn with_primary_key(mut self, names: &[&str]) -> Result<Self, FrameError> {
        let key = self.positions(names)?;
        for &i in &key {
            self.columns[i].nullable = false;
        }
        self.primary_key = key;
        Ok(self)
    }

    /// Declare an additional unique key.
    pub fn with_unique_key(mut self, names: &[&str]) -> Result<Self, FrameError> {
        let key = self.positions(names)?;
        self.unique_keys.push(key);
        Ok(self)
    }

    fn positions(&self, names: &[&str]) -> Result<Vec<usize>, FrameError> {
        names
            .iter()
            .map(|name| {
                self.position(name)
                    .ok_or_else(|| FrameError::UnknownKeyColumn(name.to_string()))
            })
            .collect()
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| &*c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| &*c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|c| &*c.name)
    }

    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    pub fn unique_keys(&self) -> &[Vec<usize>] {
        &self.unique_keys
    }

    /// The column names of the primary key and every unique key.
    pub fn keys(&self) -> impl Iterator<Item = Vec<&str>> + '_ {
        std::iter::once(&self.primary_key)
            .filter(|key| !key.is_empty())
            .chain(self.unique_keys.iter())
            .map(|key| key.iter().map(|&i| &*self.columns[i].name).collect())
    }

    /// Do `names` cover some declared primary or unique key?
    pub fn covers_key(&self, names: &[&str]) -> bool {
        self.keys().any(|key| key.iter().all(|k| names.contains(k)))
    }

    pub fn has_keys(&self) -> bool {
        !self.primary_key.is_empty() || !self.unique_keys.is_empty()
    }

    /// Keep key declarations whose columns all survive a projection.
    /// `map` relates an old position to its new one.
    pub fn retain_keys(mut self, from: &Schema, map: impl Fn(usize) -> Option<usize>) -> Self {
        let remap = |key: &Vec<usize>| key.iter().map(|&i| map(i)).collect::<Option<Vec<_>>>();
        self.primary_key = remap(&from.primary_key).unwrap_or_default();
        self.unique_keys = from.unique_keys.iter().filter_map(remap).collect();
        self
    }

    /// Do two schemas have the same column names and types in the same order?
    /// Nullability and keys are ignored.
    pub fn same_shape(&self, other: &Schema) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.name == b.name && a.ty == b.ty)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({})",
            self.columns
                .iter()
                .map(|c| format!("{}: {}{}", c.name, c.ty, if c.nullable { "?" } else { "" }))
                .join(", ")
        )
    }
}
