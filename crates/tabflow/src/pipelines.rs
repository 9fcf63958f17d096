//! The bundled pipelines.
//!
//! Each one is a verb chain over the synthetic tables, a hand-written SQLite
//! query computing the same thing for the raw backend, and the reduction
//! the backends are compared under.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use tabflow_backends::{BackendKind, Query, RawQuery};
use tabflow_flow::{BackendRegistry, Graph, GraphBuilder, OutputRef, Reduction, RunConfig, TaskDef, TaskId};
use tabflow_verbs::{Chain, asc, coalesce, col, count_rows, lag, lit, mean, row_number};

use crate::data::{self, CABINS, PASSENGERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    /// Passengers left joined with their cabins, with a derived total fare.
    JoinDerive,
    /// Passengers with a known age, bucketed by decade.
    AgeBucket,
    /// Rank and fare gap of each passenger within their class.
    FareWindow,
}

impl Pipeline {
    pub const ALL: [Self; 3] = [Self::JoinDerive, Self::AgeBucket, Self::FareWindow];

    pub fn name(self) -> &'static str {
        match self {
            Self::JoinDerive => "join-derive",
            Self::AgeBucket => "age-bucket",
            Self::FareWindow => "fare-window",
        }
    }

    pub fn about(self) -> &'static str {
        match self {
            Self::JoinDerive => "left join passengers to cabins and derive the total fare",
            Self::AgeBucket => "count passengers and average their fare per age decade",
            Self::FareWindow => "number passengers by fare within their class, with the gap to the previous fare",
        }
    }

    pub fn chain(self) -> anyhow::Result<Chain> {
        let passengers = Chain::source(PASSENGERS, data::passenger_schema()?);
        let chain = match self {
            Self::JoinDerive => {
                let cabins = Chain::source(CABINS, data::cabin_schema()?);
                passengers
                    .left_join(&cabins, &[("pk", "pk")])?
                    .mutate([("total", col("fare") + coalesce([col("surcharge"), lit(0.0)]))])?
            }
            Self::AgeBucket => passengers
                .filter(col("age").is_not_null())?
                .mutate([("bucket", col("age").round(-1))])?
                .group_by(&["bucket"])?
                .summarise([("n", count_rows()), ("mean_fare", mean(col("fare")))])?
                .order_by([asc("bucket")])?,
            Self::FareWindow => passengers
                .window("rn", row_number(), &["class"], [asc("fare")])?
                .window("prev", lag(col("fare"), 1), &["class"], [asc("fare")])?
                .mutate([("gap", col("fare") - col("prev"))])?
                .order_by([asc("class"), asc("rn")])?
                .select(&["pk", "class", "fare", "rn", "gap"])?,
        };
        Ok(chain)
    }

    /// The same computation, written by hand.
    ///
    /// Ties are broken by the `__ord` column the raw backend adds to every input,
    /// as the verb chains break them by input order.
    pub fn oracle(self) -> &'static str {
        match self {
            Self::JoinDerive => {
                "SELECT p.pk AS pk, p.class AS class, p.age AS age, p.fare AS fare, \
                 c.deck AS deck, c.surcharge AS surcharge, p.fare + COALESCE(c.surcharge, 0.0) AS total \
                 FROM {passengers} AS p LEFT JOIN {cabins} AS c ON p.pk = c.pk ORDER BY p.__ord"
            }
            Self::AgeBucket => {
                "SELECT ROUND(age / 10.0) * 10.0 AS bucket, COUNT(*) AS n, AVG(fare) AS mean_fare \
                 FROM {passengers} WHERE age IS NOT NULL GROUP BY bucket ORDER BY bucket"
            }
            Self::FareWindow => {
                "SELECT pk, class, fare, \
                 ROW_NUMBER() OVER (PARTITION BY class ORDER BY fare, __ord) AS rn, \
                 fare - LAG(fare) OVER (PARTITION BY class ORDER BY fare, __ord) AS gap \
                 FROM {passengers} ORDER BY class, rn"
            }
        }
    }

    /// Aggregated outputs are small, compare them whole. Wide outputs by the one column that matters.
    pub fn reduction(self) -> Reduction {
        match self {
            Self::JoinDerive => Reduction::Sum("total".into()),
            Self::AgeBucket | Self::FareWindow => Reduction::Summary,
        }
    }

    fn reads(self) -> &'static [&'static str] {
        match self {
            Self::JoinDerive => &[PASSENGERS, CABINS],
            Self::AgeBucket | Self::FareWindow => &[PASSENGERS],
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pipeline {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|p| p.name() == s).ok_or_else(|| {
            let known: Vec<_> = Self::ALL.iter().map(|p| p.name()).collect();
            anyhow::anyhow!("unknown pipeline `{s}`, expected one of: {}", known.join(", "))
        })
    }
}

/// How the synthetic input is drawn.
#[derive(Debug, Clone, Copy)]
pub struct Input {
    pub rows: usize,
    pub seed: u64,
}

/// The ids of the interesting tasks of a built [Graph].
pub struct Built {
    pub graph: Graph,
    pub transforms: Vec<TaskId>,
    pub check: TaskId,
}

fn load_passengers(input: Input) -> TaskDef {
    TaskDef::new(PASSENGERS, "1", move |ctx| {
        let mut rng: StdRng = ctx.rng()?;
        Ok(vec![data::passengers(&mut rng, input.rows)?.into()])
    })
    .seed(input.seed)
    .param("rows", input.rows)
}

fn load_cabins(input: Input) -> TaskDef {
    // A different stream from the passengers', from the same seed.
    TaskDef::new(CABINS, "1", move |ctx| {
        let mut rng: StdRng = ctx.rng()?;
        Ok(vec![data::cabins(&mut rng, input.rows)?.into()])
    })
    .seed(input.seed.wrapping_add(1))
    .param("rows", input.rows)
}

/// `load` the inputs, `transform` them on every configured backend, `check` the backends agree.
pub fn build(pipeline: Pipeline, input: Input, config: &RunConfig, registry: &BackendRegistry) -> anyhow::Result<Built> {
    let chain = pipeline.chain()?;
    let mut b = GraphBuilder::new();
    b.stage("load")?.stage("transform")?.stage("check")?;

    let mut loaded = Vec::new();
    for &table in pipeline.reads() {
        let def = match table {
            CABINS => load_cabins(input),
            _ => load_passengers(input),
        };
        loaded.push((table, b.add("load", def)?));
    }
    let bindings: Vec<(&str, &OutputRef)> = loaded.iter().map(|(t, h)| (*t, h.out())).collect();

    let mut transforms = Vec::new();
    for backend in registry.select(config)? {
        let query: Query = match backend.kind() {
            BackendKind::Raw => RawQuery::new(pipeline.name(), pipeline.oracle())
                .with_schema(chain.schema().clone())
                .into(),
            BackendKind::Eager | BackendKind::LazyCompiled => chain.clone().into(),
        };
        let name = backend.name().to_owned();
        let def = tabflow_flow::transform_task(&name, "1", backend, query, &bindings)?;
        transforms.push((name, b.add("transform", def)?));
    }

    let outputs: Vec<(&str, &OutputRef)> = transforms.iter().map(|(n, h)| (n.as_str(), h.out())).collect();
    let check = b.add(
        "check",
        tabflow_flow::equivalence_task(pipeline.name(), "1", pipeline.reduction(), config.tolerance, &outputs),
    )?;

    Ok(Built {
        transforms: transforms.iter().map(|(_, h)| h.id.clone()).collect(),
        check: check.id,
        graph: b.build(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tabflow_artifacts::MemoryArtifactStore;
    use tabflow_flow::{Flow, TaskState};

    const INPUT: Input = Input { rows: 60, seed: 42 };

    #[test]
    fn names_round_trip() {
        for p in Pipeline::ALL {
            assert_eq!(p.name().parse::<Pipeline>().unwrap(), p);
        }
        assert!("titanic".parse::<Pipeline>().is_err());
    }

    #[test]
    fn every_pipeline_agrees_on_every_backend() {
        let config = RunConfig::default();
        let registry = BackendRegistry::with_defaults();
        for p in Pipeline::ALL {
            let built = build(p, INPUT, &config, &registry).unwrap();
            let flow = Flow::new(Arc::new(MemoryArtifactStore::new()), config.clone()).unwrap();
            let run = flow.run(&built.graph);
            assert!(run.successful, "{p}: {:?}", run.failures().collect::<Vec<_>>());
            assert_eq!(built.transforms.len(), 3);

            let reference = run.table(&built.transforms[0]).unwrap();
            for id in &built.transforms[1..] {
                let table = run.table(id).unwrap();
                assert_eq!(table.num_rows(), reference.num_rows(), "{p} {id}");
                assert_eq!(
                    table.schema().names().collect::<Vec<_>>(),
                    reference.schema().names().collect::<Vec<_>>(),
                    "{p} {id}"
                );
            }
        }
    }

    #[test]
    fn second_run_is_served_from_the_cache() {
        let config = RunConfig::default();
        let built = build(Pipeline::AgeBucket, INPUT, &config, &BackendRegistry::with_defaults()).unwrap();
        let flow = Flow::new(Arc::new(MemoryArtifactStore::new()), config).unwrap();
        assert!(flow.run(&built.graph).successful);

        let again = flow.run(&built.graph);
        assert!(again.successful);
        assert_eq!(again.count(TaskState::Skipped), built.graph.len());
    }

    #[test]
    fn more_rows_reload_the_input() {
        let config = RunConfig {
            backends: vec!["eager".into()],
            ..RunConfig::default()
        };
        let registry = BackendRegistry::with_defaults();
        let flow = Flow::new(Arc::new(MemoryArtifactStore::new()), config.clone()).unwrap();
        let first = build(Pipeline::FareWindow, INPUT, &config, &registry).unwrap();
        assert!(flow.run(&first.graph).successful);

        let bigger = Input { rows: 61, ..INPUT };
        let second = build(Pipeline::FareWindow, bigger, &config, &registry).unwrap();
        let run = flow.run(&second.graph);
        assert_eq!(run.state(&TaskId::new("load", PASSENGERS)), Some(TaskState::Succeeded));
        assert_eq!(run.table(&second.transforms[0]).unwrap().num_rows(), 61);
    }
}
