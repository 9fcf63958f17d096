//! Cache-aware execution of one task invocation.
//!
//! The [Materializer] looks a fingerprint up in the [ArtifactStore],
//! runs the task on a miss, checks what it returned and stores it.
//! Concurrent requests for the same fingerprint in the same namespace
//! share one execution: the first caller leads, the others wait for its result.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tabflow_artifacts::{ArtifactAddress, ArtifactStore, Fingerprint, StoreError};
use tabflow_frame::{Artifact, Blob};

use crate::context::TaskContext;
use crate::errors::{TaskError, ValidationError};
use crate::fingerprint::{storage_fingerprint, task_fingerprint};
use crate::graph::{Determinism, TaskDef, TaskId};

/// One stored output of a task.
#[derive(Debug, Clone)]
pub struct MaterializedOutput {
    pub address: ArtifactAddress,
    pub artifact: Arc<Artifact>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Source {
    #[display(fmt = "cache")]
    Cache,
    #[display(fmt = "executed")]
    Executed,
    /// Another caller executed the same invocation.
    #[display(fmt = "coalesced")]
    Coalesced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Serve from the cache, execute on a miss.
    Normal,
    /// Execute without looking at the cache.
    Recompute,
    /// Serve from the cache, fail on a miss.
    CacheOnly,
}

/// A request to materialize one task.
pub struct Job<'a> {
    pub id: &'a TaskId,
    /// Where outputs are stored, in place of the bare stage name.
    pub namespace: &'a str,
    pub def: &'a TaskDef,
    pub inputs: Vec<MaterializedOutput>,
}

#[derive(Debug)]
pub struct Materialized {
    pub fingerprint: Fingerprint,
    pub outputs: Vec<MaterializedOutput>,
    pub source: Source,
    /// The store had recorded the fingerprint but lost an output.
    pub inconsistent_cache: bool,
}

type Shared = Result<Vec<MaterializedOutput>, String>;

#[derive(Default)]
struct Inflight {
    result: Mutex<Option<Shared>>,
    done: Condvar,
}

pub struct Materializer {
    store: Arc<dyn ArtifactStore>,
    inflight: Mutex<HashMap<(String, Fingerprint), Arc<Inflight>>>,
}

impl Materializer {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn fingerprint(job: &Job<'_>) -> Fingerprint {
        let inputs: Vec<_> = job.inputs.iter().map(|i| i.address.clone()).collect();
        task_fingerprint(job.id, job.def, &inputs)
    }

    pub fn materialize(&self, job: Job<'_>, mode: Mode) -> Result<Materialized, TaskError> {
        let fingerprint = Self::fingerprint(&job);

        if mode == Mode::CacheOnly {
            let (cached, inconsistent_cache) = self.cached(&job, &fingerprint)?;
            let outputs = cached.ok_or_else(|| TaskError::NotMaterialized(job.id.clone()))?;
            return Ok(Materialized {
                fingerprint,
                outputs,
                source: Source::Cache,
                inconsistent_cache,
            });
        }

        if job.def.determinism == Determinism::NonCacheable {
            let outputs = self.execute(&job, &fingerprint)?;
            return Ok(Materialized {
                fingerprint,
                outputs,
                source: Source::Executed,
                inconsistent_cache: false,
            });
        }

        let key = (job.namespace.to_owned(), fingerprint);
        let (slot, leader) = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some(slot) => (slot.clone(), false),
                None => {
                    let slot = Arc::new(Inflight::default());
                    inflight.insert(key.clone(), slot.clone());
                    (slot, true)
                }
            }
        };

        if !leader {
            tracing::debug!(task = %job.id, fingerprint = %fingerprint.short(), "waiting for a concurrent execution");
            let mut result = slot.result.lock();
            while result.is_none() {
                slot.done.wait(&mut result);
            }
            return match result.as_ref() {
                Some(Ok(outputs)) => Ok(Materialized {
                    fingerprint,
                    outputs: outputs.clone(),
                    source: Source::Coalesced,
                    inconsistent_cache: false,
                }),
                Some(Err(message)) => Err(TaskError::Coalesced(message.clone())),
                None => Err(TaskError::Coalesced(String::new())),
            };
        }

        let result = self.lead(&job, &fingerprint, mode);
        *slot.result.lock() = Some(match &result {
            Ok(m) => Ok(m.outputs.clone()),
            Err(e) => Err(e.to_string()),
        });
        self.inflight.lock().remove(&key);
        slot.done.notify_all();
        result
    }

    fn lead(&self, job: &Job<'_>, fingerprint: &Fingerprint, mode: Mode) -> Result<Materialized, TaskError> {
        let mut inconsistent_cache = false;
        if mode == Mode::Normal {
            let (cached, inconsistent) = self.cached(job, fingerprint)?;
            inconsistent_cache = inconsistent;
            if let Some(outputs) = cached {
                return Ok(Materialized {
                    fingerprint: *fingerprint,
                    outputs,
                    source: Source::Cache,
                    inconsistent_cache,
                });
            }
        }
        let outputs = self.execute(job, fingerprint)?;
        Ok(Materialized {
            fingerprint: *fingerprint,
            outputs,
            source: Source::Executed,
            inconsistent_cache,
        })
    }

    /// Every output recorded under `fingerprint`, or `None` on a miss.
    /// The flag reports a recorded fingerprint whose outputs are gone.
    fn cached(
        &self,
        job: &Job<'_>,
        fingerprint: &Fingerprint,
    ) -> Result<(Option<Vec<MaterializedOutput>>, bool), TaskError> {
        let mut outputs = Vec::with_capacity(job.def.outputs.len());
        for spec in &job.def.outputs {
            let address = match self.store.lookup(job.namespace, &spec.name, fingerprint) {
                Ok(address) => address,
                Err(StoreError::NotFound { .. }) => return Ok((None, false)),
                Err(e) => return Err(e.into()),
            };
            let stored = match self.store.get(&address) {
                Ok(stored) if stored.kind == spec.kind => stored,
                Ok(stored) => {
                    tracing::warn!(
                        task = %job.id,
                        %address,
                        expected = %spec.kind,
                        found = %stored.kind,
                        "cache inconsistency: stored artifact has the wrong kind, recomputing"
                    );
                    return Ok((None, true));
                }
                Err(StoreError::Missing(_)) => {
                    tracing::warn!(
                        task = %job.id,
                        %address,
                        fingerprint = %fingerprint.short(),
                        "cache inconsistency: fingerprint is recorded but the artifact is missing, recomputing"
                    );
                    return Ok((None, true));
                }
                Err(e) => return Err(e.into()),
            };
            outputs.push(MaterializedOutput {
                address: stored.address,
                artifact: stored.artifact,
            });
        }
        Ok((Some(outputs), false))
    }

    fn execute(&self, job: &Job<'_>, fingerprint: &Fingerprint) -> Result<Vec<MaterializedOutput>, TaskError> {
        let def = job.def;
        let ctx = TaskContext {
            id: job.id.clone(),
            inputs: job.inputs.iter().map(|i| i.artifact.clone()).collect(),
            params: def.params.clone(),
            seed: def.seed,
            determinism: def.determinism,
        };

        tracing::debug!(task = %job.id, fingerprint = %fingerprint.short(), "executing");
        let start = Instant::now();
        let artifacts = match panic::catch_unwind(AssertUnwindSafe(|| (def.func)(&ctx))) {
            Ok(Ok(artifacts)) => artifacts,
            Ok(Err(error)) => return Err(unwrap_task_error(error)),
            Err(payload) => return Err(TaskError::Panicked(panic_message(&*payload))),
        };

        if artifacts.len() != def.outputs.len() {
            return Err(TaskError::OutputArity {
                task: job.id.clone(),
                expected: def.outputs.len(),
                found: artifacts.len(),
            });
        }
        for (artifact, spec) in artifacts.iter().zip(&def.outputs) {
            if artifact.kind() != spec.kind {
                return Err(TaskError::OutputKind {
                    task: job.id.clone(),
                    output: spec.name.clone(),
                    expected: spec.kind,
                    found: artifact.kind(),
                });
            }
        }

        let stored_under = storage_fingerprint(fingerprint, def.determinism);
        let mut outputs = Vec::with_capacity(artifacts.len());
        for (artifact, spec) in artifacts.into_iter().zip(&def.outputs) {
            let artifact = match artifact {
                Artifact::Table(t) => Artifact::Table(t.with_name(&spec.name)),
                Artifact::Blob(b) => Artifact::Blob(Blob::new(&spec.name, b.bytes().clone())),
            };
            let address = self
                .store
                .put(job.namespace, &spec.name, &stored_under, artifact.clone())?;
            outputs.push(MaterializedOutput {
                address,
                artifact: Arc::new(artifact),
            });
        }
        tracing::debug!(task = %job.id, elapsed = ?start.elapsed(), outputs = outputs.len(), "stored outputs");
        Ok(outputs)
    }
}

/// Task bodies return [anyhow::Error]; recover the typed errors raised through `?`.
fn unwrap_task_error(error: anyhow::Error) -> TaskError {
    let error = match error.downcast::<TaskError>() {
        Ok(e) => return e,
        Err(error) => error,
    };
    match error.downcast::<ValidationError>() {
        Ok(e) => TaskError::Validation(e),
        Err(error) => TaskError::Task(error),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
