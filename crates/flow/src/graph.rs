//! Declaring task graphs.
//!
//! Tasks are registered on a [GraphBuilder] one at a time.
//! Registering returns a [TaskHandle] whose [OutputRef]s are the only way
//! to name an input of a later task, so every graph that builds is acyclic
//! and every input refers to a declared output.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use tabflow_frame::{Artifact, ArtifactKind};

use crate::context::TaskContext;
use crate::errors::GraphError;

/// Identity of a task: the stage it is registered in and its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display(fmt = "{}/{}", stage, name)]
pub struct TaskId {
    pub stage: String,
    pub name: String,
}

impl TaskId {
    pub fn new(stage: &str, name: &str) -> Self {
        Self {
            stage: stage.to_owned(),
            name: name.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Determinism {
    /// Equal fingerprints produce equal outputs.
    #[default]
    Deterministic,
    /// Always runs. Outputs are stored under fresh addresses,
    /// so everything downstream runs too.
    NonCacheable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub name: String,
    pub kind: ArtifactKind,
}

/// A typed handle to one output of a registered task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputRef {
    pub task: TaskId,
    pub index: usize,
    pub name: String,
    pub kind: ArtifactKind,
}

pub type TaskFn = Arc<dyn Fn(&TaskContext) -> anyhow::Result<Vec<Artifact>> + Send + Sync>;

/// A task waiting to be registered.
#[derive(Clone)]
pub struct TaskDef {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) inputs: Vec<OutputRef>,
    pub(crate) outputs: Vec<OutputSpec>,
    /// `outputs` holds only the implicit table, replaced by the first [TaskDef::output].
    implicit_output: bool,
    pub(crate) params: BTreeMap<String, String>,
    pub(crate) seed: Option<u64>,
    pub(crate) determinism: Determinism,
    pub(crate) func: TaskFn,
}

impl TaskDef {
    /// A task producing a single table named after the task,
    /// unless outputs are declared with [TaskDef::output].
    pub fn new<F>(name: &str, version: &str, func: F) -> Self
    where
        F: Fn(&TaskContext) -> anyhow::Result<Vec<Artifact>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_owned(),
            version: version.to_owned(),
            inputs: Vec::new(),
            outputs: vec![OutputSpec {
                name: name.to_owned(),
                kind: ArtifactKind::Table,
            }],
            implicit_output: true,
            params: BTreeMap::new(),
            seed: None,
            determinism: Determinism::Deterministic,
            func: Arc::new(func),
        }
    }

    pub fn input(mut self, input: &OutputRef) -> Self {
        self.inputs.push(input.clone());
        self
    }

    pub fn inputs<'a>(mut self, inputs: impl IntoIterator<Item = &'a OutputRef>) -> Self {
        self.inputs.extend(inputs.into_iter().cloned());
        self
    }

    pub fn output(mut self, name: &str, kind: ArtifactKind) -> Self {
        if std::mem::take(&mut self.implicit_output) {
            self.outputs.clear();
        }
        self.outputs.push(OutputSpec {
            name: name.to_owned(),
            kind,
        });
        self
    }

    /// A literal the task body reads with [TaskContext::param].
    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_owned(), value.to_string());
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn non_cacheable(mut self) -> Self {
        self.determinism = Determinism::NonCacheable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn input_refs(&self) -> &[OutputRef] {
        &self.inputs
    }

    pub fn outputs_spec(&self) -> &[OutputSpec] {
        &self.outputs
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn declared_seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn determinism(&self) -> Determinism {
        self.determinism
    }
}

impl fmt::Debug for TaskDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDef")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("params", &self.params)
            .field("seed", &self.seed)
            .field("determinism", &self.determinism)
            .finish_non_exhaustive()
    }
}

/// What [GraphBuilder::add] hands back: the task's id and its outputs.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: TaskId,
    pub outputs: Vec<OutputRef>,
}

impl TaskHandle {
    /// The first output, which is the only one for most tasks.
    pub fn out(&self) -> &OutputRef {
        &self.outputs[0]
    }

    pub fn output(&self, name: &str) -> Option<&OutputRef> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

#[derive(Debug)]
pub struct TaskNode {
    pub(crate) id: TaskId,
    pub(crate) stage: usize,
    pub(crate) def: TaskDef,
    /// Node index of each input's producer, parallel to `def.inputs`.
    pub(crate) producers: Vec<usize>,
}

impl TaskNode {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn def(&self) -> &TaskDef {
        &self.def
    }
}

#[derive(Debug, Default)]
pub struct GraphBuilder {
    stages: Vec<String>,
    nodes: Vec<TaskNode>,
    index: HashMap<TaskId, usize>,
    outputs: HashSet<(String, String)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the next stage. Stages run in declaration order.
    pub fn stage(&mut self, name: &str) -> Result<&mut Self, GraphError> {
        if self.stages.iter().any(|s| s == name) {
            return Err(GraphError::DuplicateStage(name.to_owned()));
        }
        self.stages.push(name.to_owned());
        Ok(self)
    }

    pub fn add(&mut self, stage: &str, def: TaskDef) -> Result<TaskHandle, GraphError> {
        let stage_index = self
            .stages
            .iter()
            .position(|s| s == stage)
            .ok_or_else(|| GraphError::UnknownStage(stage.to_owned()))?;
        let id = TaskId::new(stage, &def.name);
        if self.index.contains_key(&id) {
            return Err(GraphError::DuplicateTask(id));
        }

        let mut producers = Vec::with_capacity(def.inputs.len());
        for input in &def.inputs {
            let unknown = || GraphError::UnknownInput {
                task: id.clone(),
                input: input.task.clone(),
            };
            let &producer = self.index.get(&input.task).ok_or_else(unknown)?;
            let node = &self.nodes[producer];
            match node.def.outputs.get(input.index) {
                Some(spec) if spec.name == input.name && spec.kind == input.kind => {}
                _ => return Err(unknown()),
            }
            if node.stage > stage_index {
                return Err(GraphError::StageOrder {
                    task: id.clone(),
                    input: input.task.clone(),
                });
            }
            producers.push(producer);
        }

        let mut claimed = HashSet::new();
        for spec in &def.outputs {
            let key = (stage.to_owned(), spec.name.clone());
            if self.outputs.contains(&key) || !claimed.insert(key) {
                return Err(GraphError::DuplicateOutput {
                    stage: stage.to_owned(),
                    name: spec.name.clone(),
                });
            }
        }
        self.outputs.extend(claimed);

        let outputs = def
            .outputs
            .iter()
            .enumerate()
            .map(|(index, spec)| OutputRef {
                task: id.clone(),
                index,
                name: spec.name.clone(),
                kind: spec.kind,
            })
            .collect();

        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(TaskNode {
            id: id.clone(),
            stage: stage_index,
            def,
            producers,
        });
        Ok(TaskHandle { id, outputs })
    }

    pub fn build(self) -> Graph {
        let mut dag = DiGraph::with_capacity(self.nodes.len(), 0);
        for i in 0..self.nodes.len() {
            dag.add_node(i);
        }
        let mut stage_graph = DiGraph::<usize, ()>::new();
        for i in 0..self.stages.len() {
            stage_graph.add_node(i);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            for &p in &node.producers {
                dag.update_edge(NodeIndex::new(p), NodeIndex::new(i), ());
                let from = self.nodes[p].stage;
                if from != node.stage {
                    stage_graph.update_edge(NodeIndex::new(from), NodeIndex::new(node.stage), ());
                }
            }
        }

        let stage_deps = (0..self.stages.len())
            .map(|s| {
                (0..s)
                    .filter(|&t| has_path_connecting(&stage_graph, NodeIndex::new(t), NodeIndex::new(s), None))
                    .collect()
            })
            .collect();

        Graph {
            stages: self.stages,
            nodes: self.nodes,
            index: self.index,
            dag,
            stage_deps,
        }
    }
}

/// An immutable task graph, ready to be run by [crate::Flow].
///
/// Tasks are stored in registration order, which is a topological order.
#[derive(Debug)]
pub struct Graph {
    stages: Vec<String>,
    nodes: Vec<TaskNode>,
    index: HashMap<TaskId, usize>,
    dag: DiGraph<usize, ()>,
    /// For each stage, the earlier stages it transitively reads from.
    stage_deps: Vec<BTreeSet<usize>>,
}

impl Graph {
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskNode> + '_ {
        self.nodes.iter()
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub(crate) fn node(&self, i: usize) -> &TaskNode {
        &self.nodes[i]
    }

    pub(crate) fn position(&self, id: &TaskId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// The tasks reading an output of task `i`.
    pub(crate) fn dependents(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.dag
            .neighbors_directed(NodeIndex::new(i), Direction::Outgoing)
            .map(|n| n.index())
    }

    /// The stages `stage` waits for.
    pub fn upstream_stages(&self, stage: &str) -> Vec<&str> {
        let Some(s) = self.stages.iter().position(|x| x == stage) else {
            return Vec::new();
        };
        self.stage_deps[s].iter().map(|&t| self.stages[t].as_str()).collect()
    }

    pub(crate) fn stage_deps(&self, stage: usize) -> &BTreeSet<usize> {
        &self.stage_deps[stage]
    }

    /// Every task `targets` transitively read from, excluding the targets.
    pub fn ancestors(&self, targets: &[TaskId]) -> Result<BTreeSet<TaskId>, GraphError> {
        let starts = targets
            .iter()
            .map(|t| self.position(t).ok_or_else(|| GraphError::UnknownTarget(t.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let reversed = Reversed(&self.dag);
        let mut seen = BTreeSet::new();
        for &start in &starts {
            let mut dfs = Dfs::new(reversed, NodeIndex::new(start));
            while let Some(n) = dfs.next(reversed) {
                seen.insert(n.index());
            }
        }
        Ok(seen
            .into_iter()
            .filter(|i| !starts.contains(i))
            .map(|i| self.nodes[i].id.clone())
            .collect())
    }
}
