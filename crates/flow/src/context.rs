use std::collections::BTreeMap;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tabflow_frame::{Artifact, ArtifactKind, Blob, Table};

use crate::errors::TaskError;
use crate::graph::{Determinism, TaskId};

/// What a task body sees: its resolved inputs, in declaration order, and its literals.
pub struct TaskContext {
    pub(crate) id: TaskId,
    pub(crate) inputs: Vec<Arc<Artifact>>,
    pub(crate) params: BTreeMap<String, String>,
    pub(crate) seed: Option<u64>,
    pub(crate) determinism: Determinism,
}

impl TaskContext {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn inputs(&self) -> &[Arc<Artifact>] {
        &self.inputs
    }

    pub fn input(&self, index: usize) -> Result<&Artifact, TaskError> {
        self.inputs
            .get(index)
            .map(|a| &**a)
            .ok_or(TaskError::MissingInput(index))
    }

    pub fn table(&self, index: usize) -> Result<&Table, TaskError> {
        let input = self.input(index)?;
        input.as_table().ok_or(TaskError::InputKind {
            index,
            expected: ArtifactKind::Table,
            found: input.kind(),
        })
    }

    pub fn blob(&self, index: usize) -> Result<&Blob, TaskError> {
        let input = self.input(index)?;
        input.as_blob().ok_or(TaskError::InputKind {
            index,
            expected: ArtifactKind::Blob,
            found: input.kind(),
        })
    }

    /// All inputs as tables, for tasks taking a list.
    pub fn tables(&self) -> Result<Vec<&Table>, TaskError> {
        (0..self.inputs.len()).map(|i| self.table(i)).collect()
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|v| v.as_str())
    }

    /// A random number generator.
    ///
    /// Seeded from the task's declared seed, which is part of its fingerprint.
    /// Only non-cacheable tasks may draw unseeded randomness.
    pub fn rng(&self) -> Result<StdRng, TaskError> {
        match (self.seed, self.determinism) {
            (Some(seed), _) => Ok(StdRng::seed_from_u64(seed)),
            (None, Determinism::NonCacheable) => Ok(StdRng::from_os_rng()),
            (None, Determinism::Deterministic) => Err(TaskError::UnseededRandomness(self.id.clone())),
        }
    }
}
