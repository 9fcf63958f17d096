use std::fmt;

use bytes::Bytes;

use crate::table::Table;

/// An opaque artifact without a schema contract,
/// e.g. a serialized model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    name: Box<str>,
    bytes: Bytes,
}

impl Blob {
    pub fn new(name: &str, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(b"blob");
        hasher.update(&(self.bytes.len() as u64).to_le_bytes());
        hasher.update(&self.bytes);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Table,
    Blob,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => f.write_str("table"),
            Self::Blob => f.write_str("blob"),
        }
    }
}

/// Anything a task produces and the store persists.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Table(Table),
    Blob(Blob),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Table(_) => ArtifactKind::Table,
            Self::Blob(_) => ArtifactKind::Blob,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Table(t) => t.name(),
            Self::Blob(b) => b.name(),
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(t) => Some(t),
            Self::Blob(_) => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Self::Blob(b) => Some(b),
            Self::Table(_) => None,
        }
    }

    /// The BLAKE3 hash of the artifact's content.
    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        match self {
            Self::Table(t) => t.hash_into(&mut hasher),
            Self::Blob(b) => b.hash_into(&mut hasher),
        }
        hasher.finalize().into()
    }
}

impl From<Table> for Artifact {
    fn from(t: Table) -> Self {
        Self::Table(t)
    }
}

impl From<Blob> for Artifact {
    fn from(b: Blob) -> Self {
        Self::Blob(b)
    }
}
