use crate::aggregate::Aggregator;
use crate::cohort::{excluded_subjects, exclusion_patterns, filter_copy, Roster};
use crate::config::{ReleaseConfig, StoreSpec};
use crate::materialize::{worker_pool, LinkReport, Materializer};
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;

pub struct ReleaseRequest<'a> {
    /// Root holding one directory per store, named after the store.
    pub input_root: &'a Path,
    pub release_root: &'a Path,
    pub stores: Vec<&'a StoreSpec>,
    pub parallelism: usize,
}

/// Copy each store's admitted baseline data into the release tree, then
/// regenerate the derived tables.
pub fn release(
    config: &ReleaseConfig,
    request: &ReleaseRequest<'_>,
    roster: &Roster,
) -> Result<LinkReport> {
    let pool = worker_pool(request.parallelism)?;
    let materializer = Materializer::new(config.release_link_mode, pool);
    let mut report = LinkReport::default();
    for store in &request.stores {
        let start = Instant::now();
        let tree = request.input_root.join(&store.name);
        if !tree.is_dir() {
            tracing::info!(
                store = %store.name,
                path = %tree.display(),
                "store input missing; skipping"
            );
            continue;
        }
        let excluded = excluded_subjects(&tree, &store.locate_pattern, roster)
            .with_context(|| format!("scan subjects of {}", store.name))?;
        let patterns = exclusion_patterns(&excluded);
        let dest = request.release_root.join(&store.output_dir);
        let copied = filter_copy(&tree, &dest, &patterns, &materializer)
            .with_context(|| format!("copy store {}", store.name))?;
        tracing::info!(
            store = %store.name,
            excluded = excluded.len(),
            linked = copied.linked,
            skipped_existing = copied.skipped_existing,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "store copied"
        );
        report.merge(copied);
    }
    let tables_root = config
        .sources
        .tables_root
        .as_deref()
        .unwrap_or(request.input_root);
    regenerate_tables(config, request.release_root, &request.stores, roster, tables_root)?;
    Ok(report)
}

/// Rewrite every derived table of `stores` plus the configured idp tables.
pub fn regenerate_tables(
    config: &ReleaseConfig,
    release_root: &Path,
    stores: &[&StoreSpec],
    roster: &Roster,
    tables_root: &Path,
) -> Result<()> {
    let start = Instant::now();
    let aggregator = Aggregator::new(release_root, roster, &config.sources);
    aggregator.regenerate(stores, &config.idp_tables, Some(tables_root))?;
    tracing::info!(
        stores = stores.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "tables regenerated"
    );
    Ok(())
}
