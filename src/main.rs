mod app;
mod cli;
mod config;
mod db;
mod engine;
mod logging;
mod paths;

use anyhow::Result;
use clap::Parser;

use crate::cli::Command;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let fullscreen = matches!(cli.command, None | Some(Command::Tui));
    logging::init(cli.verbose, fullscreen);
    app::run(cli)
}
