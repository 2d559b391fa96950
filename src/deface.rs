//! Anonymization of staged images.
//!
//! Each staged unit carries a fixed list of (volume, mask) pairs. Missing
//! inputs skip a pair; a transform that yields no output aborts the run.
use crate::config::{render_template, MaskPairTemplate};
use crate::entity::UnitKey;
use crate::error::SnapshotError;
use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::fs;
use std::path::{Path, PathBuf};

mod command;

pub use command::CommandDefacer;

/// One unit of anonymization work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskPair {
    pub target: PathBuf,
    pub mask: PathBuf,
    pub make_mask: bool,
}

/// The masking transform itself.
///
/// Implementations read `volume` and `mask` and write the masked image to
/// `output`, which lives in a private directory next to `volume`. When
/// `make_mask` is set the mask is thresholded (>0) before use.
pub trait Defacer: Send + Sync {
    fn transform(&self, volume: &Path, mask: &Path, make_mask: bool, output: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaceOutcome {
    Defaced,
    MissingTarget,
    MissingMask,
}

/// Resolve the configured templates for one staged unit.
///
/// A pair's fallback mask is used only when its primary mask is absent.
pub fn mask_pairs_for_unit(
    site_root: &Path,
    unit: &str,
    key: &UnitKey,
    templates: &[MaskPairTemplate],
) -> Vec<MaskPair> {
    templates
        .iter()
        .map(|template| {
            let primary = site_root.join(render_template(&template.mask, unit, key));
            let mask = match &template.fallback_mask {
                Some(fallback) if !primary.exists() => {
                    site_root.join(render_template(fallback, unit, key))
                }
                _ => primary,
            };
            MaskPair {
                target: site_root.join(render_template(&template.target, unit, key)),
                mask,
                make_mask: template.make_mask,
            }
        })
        .collect()
}

/// Mask `pair.target` in place.
///
/// The transform writes into a temp dir beside the target and the result is
/// renamed over the target's directory entry, so a linked source file is
/// never modified and a crash leaves either the old or the new image.
pub fn deface(defacer: &dyn Defacer, pair: &MaskPair) -> Result<DefaceOutcome> {
    if !pair.target.exists() {
        tracing::warn!(path = %pair.target.display(), "deface target missing; skipping");
        return Ok(DefaceOutcome::MissingTarget);
    }
    if !pair.mask.exists() {
        tracing::warn!(
            path = %pair.target.display(),
            mask = %pair.mask.display(),
            "deface mask missing; skipping"
        );
        return Ok(DefaceOutcome::MissingMask);
    }
    let parent = pair
        .target
        .parent()
        .ok_or_else(|| SnapshotError::DefaceFailed {
            volume: pair.target.clone(),
        })?;
    let file_name = pair
        .target
        .file_name()
        .ok_or_else(|| SnapshotError::DefaceFailed {
            volume: pair.target.clone(),
        })?;
    let workdir = tempfile::Builder::new()
        .prefix(".deface-")
        .tempdir_in(parent)
        .with_context(|| format!("create deface workdir in {}", parent.display()))?;
    let output = workdir.path().join(file_name);

    defacer
        .transform(&pair.target, &pair.mask, pair.make_mask, &output)
        .with_context(|| format!("deface {}", pair.target.display()))?;
    if !output.is_file() {
        return Err(SnapshotError::DefaceFailed {
            volume: pair.target.clone(),
        }
        .into());
    }
    fs::rename(&output, &pair.target)
        .with_context(|| format!("replace {}", pair.target.display()))?;
    tracing::debug!(path = %pair.target.display(), make_mask = pair.make_mask, "defaced");
    Ok(DefaceOutcome::Defaced)
}

/// Deface every pair of one unit on the worker pool.
///
/// All pairs run to completion before returning; the first failure is
/// reported.
pub fn deface_unit(pool: &ThreadPool, defacer: &dyn Defacer, pairs: &[MaskPair]) -> Result<usize> {
    let results: Vec<Result<DefaceOutcome>> =
        pool.install(|| pairs.par_iter().map(|pair| deface(defacer, pair)).collect());
    let mut defaced = 0;
    for result in results {
        if result? == DefaceOutcome::Defaced {
            defaced += 1;
        }
    }
    Ok(defaced)
}

#[cfg(test)]
#[path = "deface_tests.rs"]
mod tests;
