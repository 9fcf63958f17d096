use clap::{ArgMatches, Command};
use itertools::Itertools;
use tabflow_flow::BackendRegistry;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::pipelines::Pipeline;

pub fn cli() -> Command {
    Command::new("list").about("Lists the bundled pipelines and the available backends")
}

#[derive(Tabled)]
struct PipelineRow {
    pipeline: &'static str,
    about: &'static str,
}

pub fn exec(_args: &ArgMatches) -> anyhow::Result<()> {
    let rows = Pipeline::ALL.into_iter().map(|p| PipelineRow {
        pipeline: p.name(),
        about: p.about(),
    });
    println!("{}", Table::new(rows).with(Style::psql()));
    println!("\nbackends: {}", BackendRegistry::with_defaults().names().join(", "));
    Ok(())
}
