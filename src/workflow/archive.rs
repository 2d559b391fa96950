use crate::archive::{ArchiveStore, GITATTRIBUTES, RIA_SIBLING, SAVE_MESSAGE};
use crate::config::StoreSpec;
use crate::error::SnapshotError;
use crate::util::write_atomic_text;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Turn each store directory into a versioned dataset and record its
/// current content.
pub fn init_stores(
    archive: &dyn ArchiveStore,
    release_root: &Path,
    stores: &[&StoreSpec],
    jobs: usize,
) -> Result<()> {
    for store in stores {
        let path = release_root.join(&store.output_dir);
        archive
            .create(&path)
            .with_context(|| format!("create dataset {}", path.display()))?;
        write_atomic_text(&path.join(".gitattributes"), GITATTRIBUTES)?;
        archive
            .save(&path, Some(SAVE_MESSAGE), jobs)
            .with_context(|| format!("save {}", path.display()))?;
        tracing::info!(store = %store.name, path = %path.display(), "dataset initialised");
    }
    Ok(())
}

pub fn update_stores(
    archive: &dyn ArchiveStore,
    release_root: &Path,
    stores: &[&StoreSpec],
    jobs: usize,
) -> Result<()> {
    for store in stores {
        let path = release_root.join(&store.output_dir);
        archive
            .save(&path, None, jobs)
            .with_context(|| format!("save {}", path.display()))?;
        tracing::info!(store = %store.name, "dataset saved");
    }
    Ok(())
}

pub fn check_remote_url(url: &str) -> Result<(), SnapshotError> {
    if url.starts_with("ria+") {
        Ok(())
    } else {
        Err(SnapshotError::InvalidConfig(format!(
            "remote must begin with ria+, found {url}"
        )))
    }
}

/// Register the RIA store at `url` as a remote of each store, aliased by
/// the store name.
pub fn add_remote(
    archive: &dyn ArchiveStore,
    release_root: &Path,
    url: &str,
    stores: &[&StoreSpec],
) -> Result<()> {
    check_remote_url(url)?;
    for store in stores {
        let path = release_root.join(&store.output_dir);
        archive
            .create_remote(&path, url, &store.name)
            .with_context(|| format!("add remote to {}", path.display()))?;
        tracing::info!(store = %store.name, url, "remote added");
    }
    Ok(())
}

/// Push each store to the RIA store at `ria_root`, export its archive, then
/// drop the loose annex objects the archive now holds.
pub fn archive_stores(
    archive: &dyn ArchiveStore,
    release_root: &Path,
    ria_root: &Path,
    stores: &[&StoreSpec],
    jobs: usize,
) -> Result<()> {
    for store in stores {
        let path = release_root.join(&store.output_dir);
        let ria_dir = ria_root.join("alias").join(&store.name);
        archive
            .push(&path, RIA_SIBLING, jobs)
            .with_context(|| format!("push {}", path.display()))?;
        archive
            .export_archive(&path, &ria_dir.join("archives").join("archive.7z"))
            .with_context(|| format!("export archive of {}", path.display()))?;
        let objects = ria_dir.join("annex").join("objects");
        if objects.exists() {
            fs::remove_dir_all(&objects)
                .with_context(|| format!("remove {}", objects.display()))?;
        }
        tracing::info!(store = %store.name, ria = %ria_dir.display(), "archived");
    }
    Ok(())
}
