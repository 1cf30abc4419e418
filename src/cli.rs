use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Staged, idempotent configuration changes for chef-solo hosts", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration root to operate on (overrides config and host facts)
    #[arg(long, global = true, env = "STAGEHAND_CONFIG_ROOT")]
    pub root: Option<PathBuf>,

    /// Run without sudo, even if the config enables elevation
    #[arg(long, global = true)]
    pub no_elevate: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install a unit from an overlay directory and activate it
    Add {
        /// Unit (cookbook) name
        unit: String,

        /// Overlay directory holding cookbooks/<unit>/...
        #[arg(short, long)]
        source: PathBuf,

        /// Re-apply even if already applied
        #[arg(short, long)]
        force: bool,
    },

    /// Uninstall a unit and drop it from the run list
    Remove {
        /// Unit (cookbook) name
        unit: String,

        /// Re-apply even if already applied
        #[arg(short, long)]
        force: bool,
    },

    /// Re-converge the host against the current run list
    Sync {
        /// Unit the run is for (used for progress and fingerprinting)
        unit: Option<String>,

        /// Re-apply even if already applied
        #[arg(short, long)]
        force: bool,
    },

    /// Apply a change request from a JSON file ("-" for stdin)
    Request {
        /// Path to the request JSON
        file: PathBuf,
    },

    /// Inspect and plan run lists without changing anything
    #[command(subcommand)]
    Runlist(RunlistCommand),

    /// Print the fingerprint of an operation on a unit
    Fingerprint {
        /// ADD, REMOVE, or SYNCHRONIZE
        operation: String,

        /// Unit name
        #[arg(default_value = "")]
        unit: String,
    },

    /// Show the configuration root, applied changes, and backups
    Status,

    /// Run health checks
    Doctor,

    /// Recover after a failed promotion lost the configuration root
    Repair {
        /// Remove the fatal marker once the root has been restored
        #[arg(long)]
        clear: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum RunlistCommand {
    /// Print the current run list
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the run list with units merged in, grouped by category
    Merge {
        /// Units to add
        units: Vec<String>,
    },

    /// Order the run list so a unit and its dependencies converge first
    Sort {
        /// Unit being installed
        unit: String,

        /// Dependencies, in install order
        #[arg(short, long, value_delimiter = ',')]
        deps: Vec<String>,
    },
}
