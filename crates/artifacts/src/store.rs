//! The contract between the materializer and whatever persists artifacts.
//!
//! Artifacts are written under `(stage, name)` with the fingerprint of the invocation
//! that produced them, and read back by [ArtifactAddress].
//! The address is derived from stage, name and fingerprint only,
//! so re-running an unchanged task lands on the same address.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tabflow_frame::{Artifact, ArtifactKind};

use crate::digest::{Digest, Fingerprint, FingerprintBuilder};
use crate::errors::StoreError;

/// Where an artifact lives in a store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactAddress {
    pub stage: Box<str>,
    pub name: Box<str>,
    pub digest: Digest,
}

impl ArtifactAddress {
    pub fn new(stage: &str, name: &str, fingerprint: &Fingerprint) -> Self {
        let digest = FingerprintBuilder::new("address")
            .str("stage", stage)
            .str("name", name)
            .digest("fingerprint", &fingerprint.0)
            .finish()
            .0;
        Self {
            stage: stage.into(),
            name: name.into(),
            digest,
        }
    }
}

impl fmt::Display for ArtifactAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.stage, self.name, self.digest.short())
    }
}

/// An artifact as held by a store.
#[derive(Clone, Debug)]
pub struct StoredArtifact {
    pub address: ArtifactAddress,
    pub fingerprint: Fingerprint,
    pub kind: ArtifactKind,
    /// BLAKE3 of the artifact content, see [Artifact::content_hash].
    pub content: Digest,
    pub artifact: Arc<Artifact>,
}

/// A key to artifact store.
///
/// Implementations must be safe to call from many threads at once,
/// and `put` must be atomic: a reader sees either nothing or the whole artifact.
pub trait ArtifactStore: Send + Sync {
    /// Write `artifact` under `(stage, name)`, recording `fingerprint` alongside.
    fn put(
        &self,
        stage: &str,
        name: &str,
        fingerprint: &Fingerprint,
        artifact: Artifact,
    ) -> Result<ArtifactAddress, StoreError>;

    /// Read the artifact at `address`.
    fn get(&self, address: &ArtifactAddress) -> Result<StoredArtifact, StoreError>;

    /// Find the address recorded for `(stage, name)` under `fingerprint`.
    fn lookup(&self, stage: &str, name: &str, fingerprint: &Fingerprint) -> Result<ArtifactAddress, StoreError>;
}

#[derive(Default)]
struct Inner {
    index: HashMap<(Box<str>, Box<str>, Fingerprint), ArtifactAddress>,
    payloads: HashMap<ArtifactAddress, StoredArtifact>,
    writes: usize,
}

/// A store that keeps everything in memory.
/// Used by tests and by the demo binary.
#[derive(Default)]
pub struct MemoryArtifactStore {
    inner: RwLock<Inner>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the payload at `address` but keep the index entry pointing at it.
    /// Returns whether there was a payload.
    pub fn evict(&self, address: &ArtifactAddress) -> bool {
        self.inner.write().payloads.remove(address).is_some()
    }

    /// The number of payloads held.
    pub fn len(&self) -> usize {
        self.inner.read().payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of `put` calls served so far.
    pub fn writes(&self) -> usize {
        self.inner.read().writes
    }

    /// The most recently written addresses of `(stage, name)`, in no particular order.
    pub fn addresses(&self, stage: &str, name: &str) -> Vec<ArtifactAddress> {
        self.inner
            .read()
            .payloads
            .keys()
            .filter(|a| &*a.stage == stage && &*a.name == name)
            .cloned()
            .collect()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(
        &self,
        stage: &str,
        name: &str,
        fingerprint: &Fingerprint,
        artifact: Artifact,
    ) -> Result<ArtifactAddress, StoreError> {
        let address = ArtifactAddress::new(stage, name, fingerprint);
        let stored = StoredArtifact {
            address: address.clone(),
            fingerprint: *fingerprint,
            kind: artifact.kind(),
            content: artifact.content_hash().into(),
            artifact: Arc::new(artifact),
        };
        let mut inner = self.inner.write();
        inner
            .index
            .insert((stage.into(), name.into(), *fingerprint), address.clone());
        inner.payloads.insert(address.clone(), stored);
        inner.writes += 1;
        tracing::trace!(%address, fingerprint = %fingerprint.short(), "stored artifact");
        Ok(address)
    }

    fn get(&self, address: &ArtifactAddress) -> Result<StoredArtifact, StoreError> {
        self.inner
            .read()
            .payloads
            .get(address)
            .cloned()
            .ok_or_else(|| StoreError::Missing(address.clone()))
    }

    fn lookup(&self, stage: &str, name: &str, fingerprint: &Fingerprint) -> Result<ArtifactAddress, StoreError> {
        self.inner
            .read()
            .index
            .get(&(stage.into(), name.into(), *fingerprint))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                stage: stage.to_owned(),
                name: name.to_owned(),
                fingerprint: *fingerprint,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tabflow_frame::{Blob, DataType, Schema, Table};

    fn fp(version: &str) -> Fingerprint {
        Fingerprint::builder("test").str("version", version).finish()
    }

    fn table() -> Artifact {
        let schema = Schema::from_pairs([("x", DataType::I64)]).unwrap();
        Table::empty("t", schema).into()
    }

    #[test]
    fn put_then_lookup_then_get() {
        let store = MemoryArtifactStore::new();
        let address = store.put("load", "t", &fp("1"), table()).unwrap();
        assert_eq!(store.lookup("load", "t", &fp("1")).unwrap(), address);
        let stored = store.get(&address).unwrap();
        assert_eq!(stored.kind, ArtifactKind::Table);
        assert_eq!(stored.fingerprint, fp("1"));
        assert_eq!(*stored.artifact, table());
        assert_eq!(stored.content, Digest::from(table().content_hash()));
    }

    #[test]
    fn addresses_are_stable() {
        let a = MemoryArtifactStore::new().put("s", "t", &fp("1"), table()).unwrap();
        let b = MemoryArtifactStore::new().put("s", "t", &fp("1"), table()).unwrap();
        assert_eq!(a, b);
        let c = MemoryArtifactStore::new().put("s", "t", &fp("2"), table()).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn lookup_misses() {
        let store = MemoryArtifactStore::new();
        store.put("s", "t", &fp("1"), table()).unwrap();
        assert!(matches!(store.lookup("s", "t", &fp("2")), Err(StoreError::NotFound { .. })));
        assert!(matches!(store.lookup("s", "u", &fp("1")), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn eviction_leaves_a_dangling_index_entry() {
        let store = MemoryArtifactStore::new();
        let address = store
            .put("s", "model", &fp("1"), Blob::new("model", bytes::Bytes::from_static(b"weights")).into())
            .unwrap();
        assert!(store.evict(&address));
        assert_eq!(store.lookup("s", "model", &fp("1")).unwrap(), address);
        assert_eq!(store.get(&address).unwrap_err(), StoreError::Missing(address));
        assert!(store.is_empty());
        assert_eq!(store.writes(), 1);
    }
}
