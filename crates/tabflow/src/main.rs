mod data;
mod pipelines;
mod render;
mod startup;
mod subcommands;

use clap::{ArgMatches, Command};
use subcommands::{explain, list, run};

fn main() -> anyhow::Result<()> {
    startup::configure_logging();
    let matches = get_command().get_matches();
    let (cmd, args) = matches.subcommand().ok_or_else(|| anyhow::anyhow!("no subcommand"))?;
    exec_subcommand(cmd, args)
}

fn get_command() -> Command {
    Command::new("tabflow")
        .about("Runs tabular pipelines on several backends and checks that they agree")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommands([run::cli(), explain::cli(), list::cli()])
}

fn exec_subcommand(cmd: &str, args: &ArgMatches) -> anyhow::Result<()> {
    match cmd {
        "run" => run::exec(args),
        "explain" => explain::exec(args),
        "list" => list::exec(args),
        unknown => Err(anyhow::anyhow!("Invalid subcommand: {}", unknown)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_well_formed() {
        get_command().debug_assert();
    }

    #[test]
    fn run_arguments_parse() {
        let matches = get_command()
            .try_get_matches_from(["tabflow", "run", "age-bucket", "-b", "eager,sqlite", "--times", "2"])
            .unwrap();
        let (cmd, args) = matches.subcommand().unwrap();
        assert_eq!(cmd, "run");
        assert_eq!(*args.get_one::<pipelines::Pipeline>("pipeline").unwrap(), pipelines::Pipeline::AgeBucket);
        let backends: Vec<&String> = args.get_many::<String>("backends").unwrap().collect();
        assert_eq!(backends, ["eager", "sqlite"]);
        assert_eq!(*args.get_one::<u32>("times").unwrap(), 2);

        assert!(get_command().try_get_matches_from(["tabflow", "run", "titanic"]).is_err());
        assert!(get_command().try_get_matches_from(["tabflow", "run", "age-bucket", "--times", "0"]).is_err());
    }
}
