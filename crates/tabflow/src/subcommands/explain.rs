use anyhow::Context;
use clap::{Arg, ArgMatches, Command, value_parser};
use tabflow_compiler::{Dialect, Postgres, Sqlite, compile};

use crate::pipelines::Pipeline;

pub fn cli() -> Command {
    Command::new("explain")
        .about("Prints a pipeline's verb chain and the SQL it compiles to")
        .arg(
            Arg::new("pipeline")
                .required(true)
                .value_parser(value_parser!(Pipeline))
                .help("The pipeline to explain, see `tabflow list`"),
        )
}

pub fn exec(args: &ArgMatches) -> anyhow::Result<()> {
    let pipeline = *args.get_one::<Pipeline>("pipeline").context("missing pipeline")?;
    let chain = pipeline.chain()?;
    println!("{chain}\n");

    let dialects: [&dyn Dialect; 2] = [&Sqlite, &Postgres];
    for dialect in dialects {
        let query = compile(&chain, dialect)?;
        println!("-- {}\n{query}\n", query.dialect);
    }
    println!("-- raw\n{}", pipeline.oracle());
    Ok(())
}
