//! Content addressing for task outputs:
//! [Digest]s and [Fingerprint]s, the [ArtifactStore] contract
//! and [MemoryArtifactStore], an implementation of it.

pub mod digest;
pub mod errors;
pub mod store;

pub use digest::{Digest, Fingerprint, FingerprintBuilder};
pub use errors::StoreError;
pub use store::{ArtifactAddress, ArtifactStore, MemoryArtifactStore, StoredArtifact};
