use super::Sources;
use crate::cohort::{filter_rows, Roster};
use crate::config::TableSpec;
use crate::table::Table;
use crate::util::{copy_atomic, display_path};
use anyhow::{Context, Result};
use std::path::Path;

/// Filter a pipeline table to admitted baseline rows and write it with its
/// sidecar. A missing source table is logged and skipped.
pub(super) fn write_derivative_table(
    tables_root: &Path,
    release_root: &Path,
    spec: &TableSpec,
    roster: &Roster,
    sources: &Sources<'_>,
) -> Result<()> {
    let source = tables_root.join(&spec.source);
    if !source.is_file() {
        tracing::warn!(path = %source.display(), "derivative table missing; skipping");
        return Ok(());
    }
    let table = Table::read(&source)?;
    let session_column = table.column_index("ses").map(|_| "ses");
    let filtered = filter_rows(table, "sub", session_column, roster)
        .with_context(|| format!("filter {}", source.display()))?;
    let dest = release_root.join(&spec.dest);
    if filtered.is_empty() {
        tracing::warn!(path = %source.display(), "no admitted rows in derivative table");
    }
    filtered.write_tsv(&dest)?;
    tracing::info!(
        path = %display_path(&dest, Some(release_root)),
        rows = filtered.len(),
        "derivative table"
    );
    if let Some(sidecar) = spec.sidecar.as_deref().and_then(|name| sources.resource(name)) {
        copy_atomic(&sidecar, &dest.with_extension("json"))?;
    }
    Ok(())
}
