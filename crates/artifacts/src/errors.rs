use thiserror::Error;

use crate::digest::Fingerprint;
use crate::store::ArtifactAddress;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("No artifact `{stage}/{name}` recorded for fingerprint {fingerprint}")]
    NotFound {
        stage: String,
        name: String,
        fingerprint: Fingerprint,
    },
    #[error("Artifact {0} is recorded but its payload is missing")]
    Missing(ArtifactAddress),
}
