//! Running a [Graph].
//!
//! One coordinator thread owns every task's state and hands ready tasks to a worker pool.
//! A task is ready once all its producers succeeded and every stage its own stage reads from
//! has no unfinished task left. Completions come back over a channel.
//! A failure aborts the tasks that read from it; unrelated branches keep going.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tabflow_artifacts::{ArtifactStore, Fingerprint};
use tabflow_frame::Table;

use crate::config::RunConfig;
use crate::errors::{ConfigError, GraphError, TaskError};
use crate::graph::{Graph, TaskId};
use crate::materializer::{Job, Materialized, MaterializedOutput, Materializer, Mode, Source};

/// Where a task is in a run.
///
/// A task goes `Pending` to `Running` to one terminal state, or straight to `Aborted`.
/// Fingerprinting and the cache lookup happen inside the running job, so there is no
/// separate fingerprinted state: a task that is `Running` may still turn out `Skipped`.
/// The fingerprint of a finished task is on its [TaskReport].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum TaskState {
    #[display(fmt = "pending")]
    Pending,
    /// Handed to a worker. Covers fingerprinting, the cache lookup and execution.
    #[display(fmt = "running")]
    Running,
    /// Served without executing, from the cache or from a concurrent execution.
    #[display(fmt = "skipped")]
    Skipped,
    #[display(fmt = "succeeded")]
    Succeeded,
    #[display(fmt = "failed")]
    Failed,
    /// Never started, because something it depends on did not succeed.
    #[display(fmt = "aborted")]
    Aborted,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Skipped | Self::Succeeded)
    }
}

#[derive(Debug)]
pub struct TaskReport {
    pub id: TaskId,
    pub state: TaskState,
    pub fingerprint: Option<Fingerprint>,
    pub source: Option<Source>,
    pub outputs: Vec<MaterializedOutput>,
    pub error: Option<TaskError>,
    pub inconsistent_cache: bool,
    pub elapsed: Duration,
}

impl TaskReport {
    fn pending(id: TaskId) -> Self {
        Self {
            id,
            state: TaskState::Pending,
            fingerprint: None,
            source: None,
            outputs: Vec::new(),
            error: None,
            inconsistent_cache: false,
            elapsed: Duration::ZERO,
        }
    }
}

/// The outcome of [Flow::run].
#[derive(Debug)]
pub struct RunResult {
    /// Every task that took part succeeded or was skipped.
    pub successful: bool,
    pub tasks: BTreeMap<TaskId, TaskReport>,
}

impl RunResult {
    pub fn per_task_status(&self) -> BTreeMap<TaskId, TaskState> {
        self.tasks.iter().map(|(id, r)| (id.clone(), r.state)).collect()
    }

    pub fn report(&self, id: &TaskId) -> Option<&TaskReport> {
        self.tasks.get(id)
    }

    pub fn state(&self, id: &TaskId) -> Option<TaskState> {
        self.report(id).map(|r| r.state)
    }

    pub fn error(&self, id: &TaskId) -> Option<&TaskError> {
        self.report(id).and_then(|r| r.error.as_ref())
    }

    pub fn outputs(&self, id: &TaskId) -> Option<&[MaterializedOutput]> {
        self.report(id).map(|r| &*r.outputs)
    }

    /// The first output of `id`, if it is a table.
    pub fn table(&self, id: &TaskId) -> Option<&Table> {
        self.outputs(id)?.first()?.artifact.as_table()
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|r| r.state == state).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> + '_ {
        self.tasks
            .values()
            .filter(|r| matches!(r.state, TaskState::Failed | TaskState::Aborted))
    }
}

/// Runs graphs on a worker pool, caching through a [Materializer].
pub struct Flow {
    materializer: Arc<Materializer>,
    config: RunConfig,
    pool: rayon::ThreadPool,
}

type Completion = (usize, Result<Materialized, TaskError>, Duration);

impl Flow {
    pub fn new(store: Arc<dyn ArtifactStore>, config: RunConfig) -> Result<Self, ConfigError> {
        Self::with_materializer(Arc::new(Materializer::new(store)), config)
    }

    /// Share a materializer, and with it the coalescing of duplicate work, between flows.
    pub fn with_materializer(materializer: Arc<Materializer>, config: RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_workers)
            .thread_name(|i| format!("tabflow-worker-{i}"))
            .build()?;
        Ok(Self {
            materializer,
            config,
            pool,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn materializer(&self) -> &Arc<Materializer> {
        &self.materializer
    }

    pub fn run(&self, graph: &Graph) -> RunResult {
        let mode = if self.config.ignore_cache {
            Mode::Recompute
        } else {
            Mode::Normal
        };
        self.execute(graph, vec![Some(mode); graph.len()])
    }

    /// Re-run `targets` only.
    ///
    /// What they read from is taken from the cache and never executed;
    /// a task whose outputs are not cached fails with [TaskError::NotMaterialized].
    pub fn run_selected(&self, graph: &Graph, targets: &[TaskId]) -> Result<RunResult, GraphError> {
        let ancestors = graph.ancestors(targets)?;
        let mut modes = vec![None; graph.len()];
        for id in &ancestors {
            if let Some(i) = graph.position(id) {
                modes[i] = Some(Mode::CacheOnly);
            }
        }
        for id in targets {
            if let Some(i) = graph.position(id) {
                modes[i] = Some(Mode::Recompute);
            }
        }
        Ok(self.execute(graph, modes))
    }

    fn execute(&self, graph: &Graph, modes: Vec<Option<Mode>>) -> RunResult {
        let _span = tracing::info_span!("run", tasks = modes.iter().flatten().count()).entered();
        let start = Instant::now();

        let namespaces: Vec<String> = graph.stages().iter().map(|s| self.config.namespace(s)).collect();
        let mut reports: Vec<Option<TaskReport>> = modes
            .iter()
            .enumerate()
            .map(|(i, m)| m.map(|_| TaskReport::pending(graph.node(i).id.clone())))
            .collect();
        let mut unfinished = vec![0usize; graph.stages().len()];
        for (i, r) in reports.iter().enumerate() {
            if r.is_some() {
                unfinished[graph.node(i).stage] += 1;
            }
        }
        let mut stopped = BTreeSet::new();

        self.pool.in_place_scope(|scope| {
            let (tx, rx) = crossbeam_channel::unbounded::<Completion>();
            let mut running = 0usize;
            loop {
                // Tasks are visited in registration order, which follows data flow but not stages,
                // so an abort late in a pass can unblock an earlier task.
                let mut progressed = true;
                while progressed {
                    progressed = false;
                    for i in 0..reports.len() {
                        let Some(mode) = modes[i] else { continue };
                        if !matches!(&reports[i], Some(r) if r.state == TaskState::Pending) {
                            continue;
                        }
                        let node = graph.node(i);

                        let mut blocked = None;
                        let mut waiting = false;
                        for &p in &node.producers {
                            match reports[p].as_ref().map(|r| r.state) {
                                Some(state) if state.is_success() => {}
                                Some(state) if state.is_terminal() => {
                                    blocked = Some(p);
                                    break;
                                }
                                _ => waiting = true,
                            }
                        }
                        if let Some(p) = blocked {
                            let cause = graph.node(p).id.clone();
                            self.finish_early(&mut reports[i], TaskError::Aborted(cause));
                            unfinished[node.stage] -= 1;
                            progressed = true;
                            continue;
                        }
                        if stopped.contains(&node.stage) {
                            let error = TaskError::StageStopped(graph.stages()[node.stage].clone());
                            self.finish_early(&mut reports[i], error);
                            unfinished[node.stage] -= 1;
                            progressed = true;
                            continue;
                        }
                        if waiting || graph.stage_deps(node.stage).iter().any(|&s| unfinished[s] > 0) {
                            continue;
                        }

                        let inputs = node
                            .def
                            .inputs
                            .iter()
                            .zip(&node.producers)
                            .filter_map(|(input, &p)| reports[p].as_ref()?.outputs.get(input.index).cloned())
                            .collect();
                        if let Some(r) = reports[i].as_mut() {
                            r.state = TaskState::Running;
                        }
                        tracing::debug!(task = %node.id, ?mode, "started");
                        running += 1;

                        let job = Job {
                            id: &node.id,
                            namespace: &namespaces[node.stage],
                            def: &node.def,
                            inputs,
                        };
                        let tx = tx.clone();
                        let materializer = &*self.materializer;
                        scope.spawn(move |_| {
                            let start = Instant::now();
                            let result = panic::catch_unwind(AssertUnwindSafe(|| materializer.materialize(job, mode)))
                                .unwrap_or_else(|_| Err(TaskError::Panicked("materializer panicked".into())));
                            // The coordinator outlives every job.
                            let _ = tx.send((i, result, start.elapsed()));
                        });
                        progressed = true;
                    }
                }

                if running == 0 {
                    break;
                }
                let Ok((i, result, elapsed)) = rx.recv() else {
                    break;
                };
                running -= 1;

                let stage = graph.node(i).stage;
                unfinished[stage] -= 1;
                let Some(report) = reports[i].as_mut() else { continue };
                report.elapsed = elapsed;
                match result {
                    Ok(m) => {
                        report.state = match m.source {
                            Source::Executed => TaskState::Succeeded,
                            Source::Cache | Source::Coalesced => TaskState::Skipped,
                        };
                        report.fingerprint = Some(m.fingerprint);
                        report.source = Some(m.source);
                        report.outputs = m.outputs;
                        report.inconsistent_cache = m.inconsistent_cache;
                        tracing::debug!(
                            task = %report.id,
                            state = %report.state,
                            fingerprint = %m.fingerprint.short(),
                            ?elapsed,
                            "finished"
                        );
                    }
                    Err(error) => {
                        tracing::debug!(task = %report.id, %error, "failed");
                        report.state = TaskState::Failed;
                        report.error = Some(error);
                        if self.config.stop_stage_on_failure {
                            stopped.insert(stage);
                        }
                    }
                }
            }
        });

        let tasks: BTreeMap<_, _> = reports.into_iter().flatten().map(|r| (r.id.clone(), r)).collect();
        let successful = tasks.values().all(|r| r.state.is_success());
        let result = RunResult { successful, tasks };
        tracing::info!(
            successful,
            succeeded = result.count(TaskState::Succeeded),
            skipped = result.count(TaskState::Skipped),
            failed = result.count(TaskState::Failed),
            aborted = result.count(TaskState::Aborted),
            elapsed = ?start.elapsed(),
            "run finished"
        );
        result
    }

    fn finish_early(&self, report: &mut Option<TaskReport>, error: TaskError) {
        if let Some(report) = report {
            tracing::debug!(task = %report.id, %error, "aborted");
            report.state = TaskState::Aborted;
            report.error = Some(error);
        }
    }
}
