//! Merge staged units into the release tree and rebuild derived metadata.
//!
//! Every derived artifact is a pure function of the roster, the current
//! release tree and the external logs, so regeneration can run any number of
//! times and produce the same bytes.
use crate::cohort::Roster;
use crate::config::{SourcesConfig, StoreSpec, TableSpec};
use crate::materialize::{LinkReport, Materializer};
use anyhow::Result;
use std::path::{Path, PathBuf};

mod dataset;
mod derivatives;
mod events;
mod merge;
mod participants;
mod scans;
mod sessions;
mod sidecars;

pub use sidecars::clean_sidecars;

/// External inputs shared by the table writers.
pub struct Sources<'a> {
    config: &'a SourcesConfig,
}

impl<'a> Sources<'a> {
    pub fn new(config: &'a SourcesConfig) -> Self {
        Self { config }
    }

    /// A configured source path; unconfigured sources skip their table.
    fn table(&self, label: &str, path: Option<&'a PathBuf>) -> Option<&'a Path> {
        match path {
            Some(path) => Some(path.as_path()),
            None => {
                tracing::info!(source = label, "source not configured; skipping");
                None
            }
        }
    }

    fn imaging_log(&self) -> Option<&'a Path> {
        self.table("imaging_log", self.config.imaging_log.as_ref())
    }

    fn qc_log(&self) -> Option<&'a Path> {
        self.table("qc_log", self.config.qc_log.as_ref())
    }

    fn demographics(&self) -> Option<&'a Path> {
        self.table("demographics", self.config.demographics.as_ref())
    }

    fn device_serials(&self) -> Option<&'a Path> {
        self.config.device_serials.as_deref()
    }

    fn applied_pressures(&self) -> Option<&'a Path> {
        self.config.applied_pressures.as_deref()
    }

    /// A resource file, if the resource dir is configured and holds it.
    fn resource(&self, name: &str) -> Option<PathBuf> {
        let dir = self.config.resources_dir.as_ref()?;
        let path = dir.join(name);
        if path.is_file() {
            Some(path)
        } else {
            tracing::warn!(path = %path.display(), "resource missing; not copied");
            None
        }
    }
}

/// Merges scratch trees and regenerates the release's derived artifacts.
pub struct Aggregator<'a> {
    release_root: &'a Path,
    roster: &'a Roster,
    sources: Sources<'a>,
}

impl<'a> Aggregator<'a> {
    pub fn new(release_root: &'a Path, roster: &'a Roster, sources: &'a SourcesConfig) -> Self {
        Self {
            release_root,
            roster,
            sources: Sources::new(sources),
        }
    }

    /// Merge one scratch site tree into each store, then regenerate the
    /// derived tables for those stores.
    pub fn aggregate(
        &self,
        scratch_site_root: &Path,
        stores: &[&StoreSpec],
        materializer: &Materializer,
        tables_root: Option<&Path>,
    ) -> Result<LinkReport> {
        let mut report = LinkReport::default();
        for store in stores {
            let store_root = self.release_root.join(&store.output_dir);
            let merged = merge::merge_store(scratch_site_root, &store_root, store, materializer)?;
            tracing::info!(
                store = %store.name,
                linked = merged.linked,
                skipped_existing = merged.skipped_existing,
                "merged scratch into store"
            );
            report.merge(merged);
        }
        self.regenerate(stores, &[], tables_root)?;
        Ok(report)
    }

    /// Rewrite every derived artifact for `stores` plus the `idp` tables.
    pub fn regenerate(
        &self,
        stores: &[&StoreSpec],
        idp_tables: &[TableSpec],
        tables_root: Option<&Path>,
    ) -> Result<()> {
        for store in stores {
            let store_root = self.release_root.join(&store.output_dir);
            if !store_root.is_dir() {
                tracing::debug!(store = %store.name, "store not present; nothing to regenerate");
                continue;
            }
            dataset::write_dataset_files(&store_root, store, &self.sources)?;
            if store.bids_tables {
                self.regenerate_rawdata(&store_root)?;
            }
            if store.merge_dwiqc {
                sidecars::merge_dwiqc(&store_root)?;
            }
            if let Some(tables_root) = tables_root {
                for table in &store.tables {
                    derivatives::write_derivative_table(
                        tables_root,
                        self.release_root,
                        table,
                        self.roster,
                        &self.sources,
                    )?;
                }
            }
        }
        if let Some(tables_root) = tables_root {
            for table in idp_tables {
                derivatives::write_derivative_table(
                    tables_root,
                    self.release_root,
                    table,
                    self.roster,
                    &self.sources,
                )?;
            }
        }
        Ok(())
    }

    fn regenerate_rawdata(&self, rawdata: &Path) -> Result<()> {
        if let (Some(imaging_log), Some(demographics)) =
            (self.sources.imaging_log(), self.sources.demographics())
        {
            participants::write_participants(rawdata, self.roster, imaging_log, demographics)?;
        }
        if let Some(imaging_log) = self.sources.imaging_log() {
            let serials = self.sources.device_serials();
            sessions::write_sessions(rawdata, self.roster, imaging_log, serials)?;
        }
        if let Some(qc_log) = self.sources.qc_log() {
            scans::update_scans(rawdata, self.roster, qc_log)?;
        }
        events::write_events(rawdata, self.roster, self.sources.applied_pressures())?;
        dataset::copy_rawdata_resources(rawdata, &self.sources)?;
        clean_sidecars(rawdata)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "aggregate_tests.rs"]
mod tests;
