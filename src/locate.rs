//! Candidate unit discovery inside job trees.
use crate::config::Site;
use crate::entity::Session;
use crate::error::SnapshotError;
use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Compile a relative glob where `*` never crosses a `/`.
fn matcher(pattern: &str) -> Result<GlobMatcher, SnapshotError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|err| SnapshotError::InvalidConfig(format!("pattern {pattern:?}: {err}")))
}

/// Entries under `root` whose relative path matches `pattern`, sorted.
///
/// The pattern's segment count fixes the search depth. A missing root is an
/// empty result, not an error.
pub fn locate(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = matcher(pattern)?;
    if !root.is_dir() {
        tracing::debug!(root = %root.display(), "job tree absent");
        return Ok(Vec::new());
    }
    let depth = pattern.split('/').filter(|seg| !seg.is_empty()).count();
    let mut found = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(depth)
        .max_depth(depth)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(
                    root = %root.display(),
                    error = %err,
                    "unreadable entry while locating"
                );
                continue;
            }
        };
        let rel = entry
            .path()
            .strip_prefix(root)
            .context("strip job root prefix")?;
        if matcher.is_match(rel) {
            found.push(entry.path().to_path_buf());
        }
    }
    Ok(found)
}

/// The unit-directory pattern for one site, e.g. `NS*V[13]`.
pub fn site_unit_pattern(site: &Site, session: Option<Session>) -> String {
    match session {
        Some(session) => format!("{}*{}", site.code, session),
        None => format!("{}*V[13]", site.code),
    }
}

/// Unit directories of one job under a site namespace:
/// `{input_root}/{site.name}/{job}/{site.code}*V[13]`.
pub fn locate_site_units(
    input_root: &Path,
    site: &Site,
    job: &str,
    session: Option<Session>,
) -> Result<Vec<PathBuf>> {
    let root = input_root.join(&site.name).join(job);
    let units = locate(&root, &site_unit_pattern(site, session))?;
    Ok(units.into_iter().filter(|path| path.is_dir()).collect())
}
