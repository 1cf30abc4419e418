mod cli;
mod commands;
mod config;
mod paths;
mod progress;
mod runner;
mod sudo;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::{AgentConfig, HostFacts};
use converge::ChangeRequest;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Elevation requested by config and not disabled on the command line
    pub elevate: bool,
    pub config: AgentConfig,
    pub facts: HostFacts,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    // Commands that don't touch a configuration root
    match &cli.command {
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "stagehand", &mut io::stdout());
            return Ok(());
        }
        Command::Fingerprint { operation, unit } => {
            return commands::fingerprint::run(operation, unit);
        }
        _ => {}
    }

    let config = AgentConfig::load()?;
    let facts = HostFacts::resolve(&config, cli.root.clone())?;
    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        elevate: facts.elevate && !cli.no_elevate,
        config,
        facts,
    };

    match cli.command {
        Command::Add {
            unit,
            source,
            force,
        } => commands::apply::run(&ctx, &ChangeRequest::add(&unit, source).forced(force)),
        Command::Remove { unit, force } => {
            commands::apply::run(&ctx, &ChangeRequest::remove(&unit).forced(force))
        }
        Command::Sync { unit, force } => commands::apply::run(
            &ctx,
            &ChangeRequest::synchronize(unit.as_deref().unwrap_or_default()).forced(force),
        ),
        Command::Request { file } => commands::apply::run_file(&ctx, &file),
        Command::Runlist(cmd) => commands::runlist::run(&ctx, cmd),
        Command::Status => commands::status::run(&ctx),
        Command::Doctor => commands::doctor::run(&ctx),
        Command::Repair { clear } => commands::repair::run(&ctx, clear),
        Command::Completions { .. } | Command::Fingerprint { .. } => Ok(()),
    }
}
