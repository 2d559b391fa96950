use super::Sources;
use crate::config::StoreSpec;
use crate::util::{copy_atomic, write_atomic_json, write_atomic_text};
use anyhow::Result;
use std::path::Path;

/// Top-level `rawdata` files copied from the resource dir when present.
const RAWDATA_RESOURCES: [&str; 7] = [
    "dataset_description.json",
    "README",
    "CHANGES",
    "participants.json",
    "sessions.json",
    "scans.json",
    "events.json",
];

/// README, dataset description, `.bidsignore`, static look-up tables and
/// sidecars at the store root.
pub(super) fn write_dataset_files(
    store_root: &Path,
    store: &StoreSpec,
    sources: &Sources<'_>,
) -> Result<()> {
    if let Some(readme) = &store.dataset.readme {
        write_atomic_text(&store_root.join("README"), readme)?;
    }
    if let Some(description) = &store.dataset.description {
        write_atomic_json(&store_root.join("dataset_description.json"), description)?;
    }
    if let Some(bidsignore) = &store.dataset.bidsignore {
        write_atomic_text(&store_root.join(".bidsignore"), bidsignore)?;
    }
    for name in store.static_files.iter().chain(&store.sidecars) {
        if let Some(resource) = sources.resource(name) {
            copy_atomic(&resource, &store_root.join(name))?;
        }
    }
    Ok(())
}

pub(super) fn copy_rawdata_resources(rawdata: &Path, sources: &Sources<'_>) -> Result<()> {
    let Some(dir) = sources.config.resources_dir.as_ref() else {
        return Ok(());
    };
    for name in RAWDATA_RESOURCES {
        let resource = dir.join(name);
        if resource.is_file() {
            copy_atomic(&resource, &rawdata.join(name))?;
        }
    }
    Ok(())
}
