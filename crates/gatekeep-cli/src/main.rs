mod cli;
mod collaborators;
mod commands;

use anyhow::Result;
use clap::Parser;

use crate::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let operation = cli.command.operation();
    commands::run(cli).inspect_err(|err| commands::report_error(operation, err))
}
