use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use tabflow_artifacts::MemoryArtifactStore;
use tabflow_flow::{BackendRegistry, Flow, RunConfig};

use crate::pipelines::{self, Input, Pipeline};
use crate::render;

pub fn cli() -> Command {
    Command::new("run")
        .about("Runs a bundled pipeline on every configured backend and checks that they agree")
        .arg(
            Arg::new("pipeline")
                .required(true)
                .value_parser(value_parser!(Pipeline))
                .help("The pipeline to run, see `tabflow list`"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_parser(value_parser!(PathBuf))
                .help("A TOML run configuration"),
        )
        .arg(
            Arg::new("backends")
                .long("backends")
                .short('b')
                .value_delimiter(',')
                .help("The backends to compare, overriding the configuration"),
        )
        .arg(
            Arg::new("rows")
                .long("rows")
                .default_value("200")
                .value_parser(value_parser!(usize))
                .help("How many synthetic passengers to draw"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .default_value("1912")
                .value_parser(value_parser!(u64))
                .help("The seed the synthetic input is drawn from"),
        )
        .arg(
            Arg::new("times")
                .long("times")
                .short('n')
                .default_value("1")
                .value_parser(value_parser!(u32).range(1..))
                .help("Run the pipeline this many times against the same cache"),
        )
        .arg(
            Arg::new("ignore_cache")
                .long("ignore-cache")
                .action(ArgAction::SetTrue)
                .help("Recompute every task, replacing what is cached"),
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .default_value("10")
                .value_parser(value_parser!(usize))
                .help("How many rows of each output to print"),
        )
}

fn config(args: &ArgMatches) -> anyhow::Result<RunConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => RunConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(backends) = args.get_many::<String>("backends") {
        config.backends = backends.cloned().collect();
    }
    if args.get_flag("ignore_cache") {
        config.ignore_cache = true;
    }
    config.validate()?;
    Ok(config)
}

pub fn exec(args: &ArgMatches) -> anyhow::Result<()> {
    let pipeline = *args.get_one::<Pipeline>("pipeline").context("missing pipeline")?;
    let input = Input {
        rows: *args.get_one::<usize>("rows").context("missing --rows")?,
        seed: *args.get_one::<u64>("seed").context("missing --seed")?,
    };
    let times = *args.get_one::<u32>("times").context("missing --times")?;
    let limit = *args.get_one::<usize>("limit").context("missing --limit")?;
    let config = config(args)?;

    let registry = BackendRegistry::with_defaults();
    let built = pipelines::build(pipeline, input, &config, &registry)?;
    tracing::info!(
        rows = input.rows,
        seed = input.seed,
        backends = ?config.backends,
        tasks = built.graph.len(),
        "built {pipeline}"
    );
    let flow = Flow::new(Arc::new(MemoryArtifactStore::new()), config)?;

    let mut last = None;
    for attempt in 1..=times {
        tracing::info!(%pipeline, attempt, "running");
        let run = flow.run(&built.graph);
        println!("run {attempt} of {pipeline}");
        println!("{}\n", render::run_report(&run));
        last = Some(run);
    }
    let Some(run) = last else {
        return Ok(());
    };

    if let Some(reference) = built.transforms.first().and_then(|id| run.table(id)) {
        println!("{}\n", render::table(reference, limit));
    }
    match run.table(&built.check) {
        Some(summary) => println!("{}", render::table(summary, usize::MAX)),
        None => {
            let failures: Vec<String> = run
                .failures()
                .map(|r| match &r.error {
                    Some(e) => format!("{}: {e}", r.id),
                    None => format!("{}: {}", r.id, r.state),
                })
                .collect();
            anyhow::bail!("{pipeline} failed:\n{}", failures.join("\n"));
        }
    }
    Ok(())
}
