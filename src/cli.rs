//! CLI argument parsing for the release workflow.
//!
//! The CLI only wires arguments to the flows in `workflow`; every policy
//! decision lives in the config file.
use crate::entity::Session;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "snapshot",
    version,
    about = "Build versioned, de-identified BIDS releases",
    after_help = "Commands:\n  stage --input <dir> --output <dir>       Stage new units from every site\n  release --input <dir> --output <dir>     Copy admitted baseline data per store\n  tables --output <dir>                    Regenerate derived tables\n  init --output <dir>                      Initialise archival datasets\n  update --output <dir>                    Save store changes\n  add-remote --output <dir> <url>          Register a RIA store\n  archive --output <dir> <ria>             Push and export archives\n  config --out <file>                      Write the default config\n\nExamples:\n  snapshot stage --input /data/sites --output /data/release --max-units 10\n  snapshot release --input /data/staged --output /data/release --store bids\n  snapshot add-remote --output /data/release ria+file:///data/ria --store bids",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Config file (defaults to the user config dir, then built-in defaults)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Stage(StageArgs),
    Release(ReleaseArgs),
    Tables(TablesArgs),
    Init(StoreCommandArgs),
    Update(StoreCommandArgs),
    AddRemote(AddRemoteArgs),
    Archive(ArchiveArgs),
    Config(ConfigArgs),
}

/// Options shared by the commands that regenerate tables.
#[derive(Args, Debug)]
pub struct CohortArgs {
    /// Enrollment table of admitted subjects (overrides sources.roster)
    #[arg(long, value_name = "FILE")]
    pub roster: Option<PathBuf>,

    /// Worker threads for linking and defacing (overrides parallelism)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: Option<u16>,
}

impl CohortArgs {
    pub fn parallelism(&self, default: usize) -> usize {
        self.jobs.map(usize::from).unwrap_or(default)
    }
}

#[derive(Parser, Debug)]
#[command(about = "Stage complete units from every site into the release tree")]
pub struct StageArgs {
    /// Root holding `{site}/{job}/{unit}` pipeline outputs
    #[arg(long, value_name = "DIR")]
    pub input: PathBuf,

    /// Release tree root
    #[arg(long, value_name = "DIR")]
    pub output: PathBuf,

    /// Site code to stage (repeatable; defaults to every site)
    #[arg(long = "site", value_name = "CODE")]
    pub sites: Vec<String>,

    /// Job that must be complete for a unit (repeatable; defaults to every job)
    #[arg(long = "job", value_name = "NAME")]
    pub jobs_required: Vec<String>,

    /// Stop after this many units across all sites
    #[arg(long, value_name = "N")]
    pub max_units: Option<usize>,

    /// Only stage one visit (V1 or V3)
    #[arg(long, value_name = "SES")]
    pub session: Option<Session>,

    #[command(flatten)]
    pub cohort: CohortArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Copy admitted baseline data of each store into the release tree")]
pub struct ReleaseArgs {
    /// Root holding one directory per store
    #[arg(long, value_name = "DIR")]
    pub input: PathBuf,

    /// Release tree root
    #[arg(long, value_name = "DIR")]
    pub output: PathBuf,

    /// Store to copy (repeatable; defaults to every store)
    #[arg(long = "store", value_name = "NAME")]
    pub stores: Vec<String>,

    #[command(flatten)]
    pub cohort: CohortArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Regenerate participants, sessions, scans, events and derivative tables")]
pub struct TablesArgs {
    /// Release tree root
    #[arg(long, value_name = "DIR")]
    pub output: PathBuf,

    /// Derivative tables root (overrides sources.tables_root)
    #[arg(long, value_name = "DIR")]
    pub tables: Option<PathBuf>,

    /// Store to regenerate (repeatable; defaults to stores present)
    #[arg(long = "store", value_name = "NAME")]
    pub stores: Vec<String>,

    #[command(flatten)]
    pub cohort: CohortArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Run an archival command on each store dataset")]
pub struct StoreCommandArgs {
    /// Release tree root
    #[arg(long, value_name = "DIR")]
    pub output: PathBuf,

    /// Store dataset (repeatable; defaults to stores present)
    #[arg(long = "store", value_name = "NAME")]
    pub stores: Vec<String>,

    /// Parallel transfer jobs
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub jobs: usize,
}

#[derive(Parser, Debug)]
#[command(about = "Register a RIA store as the remote of each store dataset")]
pub struct AddRemoteArgs {
    /// Release tree root
    #[arg(long, value_name = "DIR")]
    pub output: PathBuf,

    /// RIA store URL, e.g. ria+file:///data/ria
    #[arg(value_name = "URL")]
    pub url: String,

    /// Store dataset (repeatable; defaults to stores present)
    #[arg(long = "store", value_name = "NAME")]
    pub stores: Vec<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Push each store to its RIA remote and export an archive")]
pub struct ArchiveArgs {
    /// Release tree root
    #[arg(long, value_name = "DIR")]
    pub output: PathBuf,

    /// Local RIA store directory
    #[arg(value_name = "RIA")]
    pub ria: PathBuf,

    /// Store dataset (repeatable; defaults to stores present)
    #[arg(long = "store", value_name = "NAME")]
    pub stores: Vec<String>,

    /// Parallel transfer jobs
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub jobs: usize,
}

#[derive(Parser, Debug)]
#[command(about = "Write the built-in config so it can be edited")]
pub struct ConfigArgs {
    /// Destination file
    #[arg(long, value_name = "FILE")]
    pub out: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}
