//! Fingerprints of task invocations.
//!
//! A fingerprint covers the task's identity, its version tag, its literals and seed,
//! the outputs it declares and the address of every input, in declaration order.
//! Input addresses are themselves derived from their producer's fingerprint,
//! so a change anywhere upstream reaches every dependent.

use tabflow_artifacts::{ArtifactAddress, Fingerprint};
use tabflow_frame::ArtifactKind;

use crate::graph::{Determinism, TaskDef, TaskId};

pub fn task_fingerprint(id: &TaskId, def: &TaskDef, inputs: &[ArtifactAddress]) -> Fingerprint {
    let mut b = Fingerprint::builder("task")
        .str("stage", &id.stage)
        .str("name", &id.name)
        .str("version", &def.version);
    for (key, value) in &def.params {
        b = b.str("param", key).str("value", value);
    }
    if let Some(seed) = def.seed {
        b = b.bytes("seed", &seed.to_le_bytes());
    }
    for output in &def.outputs {
        let kind = match output.kind {
            ArtifactKind::Table => "table",
            ArtifactKind::Blob => "blob",
        };
        b = b.str("output", &output.name).str("kind", kind);
    }
    for input in inputs {
        b = b.digest("input", &input.digest);
    }
    b.finish()
}

/// The fingerprint outputs are stored under.
///
/// Non-cacheable tasks get a fresh one per execution.
pub fn storage_fingerprint(fingerprint: &Fingerprint, determinism: Determinism) -> Fingerprint {
    match determinism {
        Determinism::Deterministic => *fingerprint,
        Determinism::NonCacheable => Fingerprint::builder("nonce")
            .digest("task", &fingerprint.0)
            .bytes("nonce", uuid::Uuid::new_v4().as_bytes())
            .finish(),
    }
}
