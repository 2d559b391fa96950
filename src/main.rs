use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod archive;
mod cli;
mod cohort;
mod config;
mod deface;
mod eligibility;
mod entity;
mod error;
mod locate;
mod materialize;
mod nifti;
mod table;
mod util;
mod workflow;

use cli::{Command, RootArgs};
use config::ReleaseConfig;

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.verbose);

    let (config, source) = config::resolve_config(args.config.as_deref())?;
    match &source {
        Some(path) => tracing::debug!(path = %path.display(), "config loaded"),
        None => tracing::debug!("using built-in config"),
    }

    match args.command {
        Command::Stage(args) => cmd_stage(&config, args),
        Command::Release(args) => cmd_release(&config, args),
        Command::Tables(args) => cmd_tables(&config, args),
        Command::Init(args) => cmd_init(&config, args),
        Command::Update(args) => cmd_update(&config, args),
        Command::AddRemote(args) => cmd_add_remote(&config, args),
        Command::Archive(args) => cmd_archive(&config, args),
        Command::Config(args) => workflow::write_default_config(&args.out, args.force),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_stage(config: &ReleaseConfig, args: cli::StageArgs) -> Result<()> {
    let roster = workflow::load_roster(config, args.cohort.roster.as_deref())?;
    let sites = if args.sites.is_empty() {
        config.sites.iter().collect()
    } else {
        args.sites
            .iter()
            .map(|code| config.site(code))
            .collect::<Result<Vec<_>, _>>()?
    };
    let request = workflow::StageRequest {
        input_root: &args.input,
        release_root: &args.output,
        sites,
        jobs: config.select_jobs(&args.jobs_required)?,
        session: args.session,
        max_units: args.max_units,
        parallelism: args.cohort.parallelism(config.parallelism),
    };
    let defacer = deface::CommandDefacer::from_config(&config.defacer)?;
    let summary = workflow::stage(config, &request, &roster, &defacer)?;
    println!(
        "staged {} units ({} volumes defaced, {} files linked, {} already present)",
        summary.units.len(),
        summary.defaced,
        summary.linked,
        summary.skipped_existing
    );
    Ok(())
}

fn cmd_release(config: &ReleaseConfig, args: cli::ReleaseArgs) -> Result<()> {
    let roster = workflow::load_roster(config, args.cohort.roster.as_deref())?;
    let request = workflow::ReleaseRequest {
        input_root: &args.input,
        release_root: &args.output,
        stores: config.select_stores(&args.stores, |_| true)?,
        parallelism: args.cohort.parallelism(config.parallelism),
    };
    let report = workflow::release(config, &request, &roster)?;
    println!(
        "released {} files ({} already present, {} broken links skipped, {} failed)",
        report.linked,
        report.skipped_existing,
        report.skipped_broken,
        report.failed.len()
    );
    Ok(())
}

fn cmd_tables(config: &ReleaseConfig, args: cli::TablesArgs) -> Result<()> {
    let roster = workflow::load_roster(config, args.cohort.roster.as_deref())?;
    let stores = workflow::present_stores(config, &args.output, &args.stores)?;
    let tables_root: Option<PathBuf> = args.tables.or_else(|| config.sources.tables_root.clone());
    let tables_root = tables_root.unwrap_or_else(|| args.output.clone());
    workflow::regenerate_tables(config, &args.output, &stores, &roster, &tables_root)?;
    println!("regenerated tables for {} stores", stores.len());
    Ok(())
}

fn cmd_init(config: &ReleaseConfig, args: cli::StoreCommandArgs) -> Result<()> {
    let stores = workflow::present_stores(config, &args.output, &args.stores)?;
    let datalad = archive::Datalad::locate()?;
    workflow::init_stores(&datalad, &args.output, &stores, args.jobs)
}

fn cmd_update(config: &ReleaseConfig, args: cli::StoreCommandArgs) -> Result<()> {
    let stores = workflow::present_stores(config, &args.output, &args.stores)?;
    let datalad = archive::Datalad::locate()?;
    workflow::update_stores(&datalad, &args.output, &stores, args.jobs)
}

fn cmd_add_remote(config: &ReleaseConfig, args: cli::AddRemoteArgs) -> Result<()> {
    workflow::check_remote_url(&args.url)?;
    let stores = workflow::present_stores(config, &args.output, &args.stores)?;
    let datalad = archive::Datalad::locate()?;
    workflow::add_remote(&datalad, &args.output, &args.url, &stores)
}

fn cmd_archive(config: &ReleaseConfig, args: cli::ArchiveArgs) -> Result<()> {
    let stores = workflow::present_stores(config, &args.output, &args.stores)?;
    let datalad = archive::Datalad::locate()?;
    workflow::archive_stores(&datalad, &args.output, &args.ria, &stores, args.jobs)
}
