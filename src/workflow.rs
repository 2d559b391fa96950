//! Command flows for building and archiving a release.
//!
//! Each flow takes its collaborators (config, roster, defacer, archive store)
//! explicitly so the CLI stays a thin dispatcher.
use crate::cohort::Roster;
use crate::config::{self, ReleaseConfig, StoreSpec};
use crate::error::SnapshotError;
use anyhow::{Context, Result};
use std::path::Path;

mod archive;
mod release;
mod stage;

pub use archive::{add_remote, archive_stores, check_remote_url, init_stores, update_stores};
pub use release::{regenerate_tables, release, ReleaseRequest};
pub use stage::{stage, StageRequest, StageSummary};

/// The roster named on the command line, else the configured one.
pub fn load_roster(config: &ReleaseConfig, explicit: Option<&Path>) -> Result<Roster> {
    let path = explicit
        .or(config.sources.roster.as_deref())
        .ok_or_else(|| {
            SnapshotError::InvalidConfig(
                "no roster configured; pass --roster or set sources.roster".into(),
            )
        })?;
    let roster = Roster::load(path)?;
    if roster.is_empty() {
        tracing::warn!(path = %path.display(), "roster admits no subjects");
    }
    tracing::info!(path = %path.display(), subjects = roster.len(), "roster loaded");
    Ok(roster)
}

/// Stores whose directory already exists under the release root.
pub fn present_stores<'a>(
    config: &'a ReleaseConfig,
    release_root: &Path,
    names: &[String],
) -> Result<Vec<&'a StoreSpec>> {
    let stores = config.select_stores(names, |store| {
        release_root.join(&store.output_dir).is_dir()
    })?;
    Ok(stores)
}

pub fn write_default_config(out: &Path, force: bool) -> Result<()> {
    if out.exists() && !force {
        return Err(anyhow::anyhow!(
            "config already exists at {} (use --force to overwrite)",
            out.display()
        ));
    }
    config::write_config(out, &config::default_config())
        .with_context(|| format!("write default config to {}", out.display()))?;
    println!("wrote {}", out.display());
    Ok(())
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
