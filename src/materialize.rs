//! Link-based materialization of job-output subtrees.
//!
//! Every tree copy in a release run goes through [`Materializer`]: staging a
//! unit into scratch, promoting scratch into the release tree, and filtered
//! whole-dataset copies. All share one contract: an existing destination
//! entry is never replaced, only logged and skipped.
use anyhow::{anyhow, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

/// How a file reaches its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    Hardlink,
    Symlink,
    Copy,
}

impl LinkMode {
    pub fn strategy(self) -> Box<dyn LinkStrategy> {
        match self {
            LinkMode::Hardlink => Box::new(HardLink),
            LinkMode::Symlink => Box::new(SymLink),
            LinkMode::Copy => Box::new(ByteCopy),
        }
    }
}

/// One way of placing a resolved source file at a destination path.
///
/// Implementations may assume the destination's parent exists and that no
/// entry exists at the destination yet.
pub trait LinkStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn place(&self, resolved_source: &Path, dest: &Path) -> io::Result<()>;
}

struct HardLink;

impl LinkStrategy for HardLink {
    fn name(&self) -> &'static str {
        "hardlink"
    }

    fn place(&self, resolved_source: &Path, dest: &Path) -> io::Result<()> {
        fs::hard_link(resolved_source, dest)
    }
}

struct SymLink;

impl LinkStrategy for SymLink {
    fn name(&self) -> &'static str {
        "symlink"
    }

    fn place(&self, resolved_source: &Path, dest: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(resolved_source, dest)
    }
}

struct ByteCopy;

impl LinkStrategy for ByteCopy {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn place(&self, resolved_source: &Path, dest: &Path) -> io::Result<()> {
        fs::copy(resolved_source, dest).map(|_| ())
    }
}

/// Names (single path components) excluded from a tree copy.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl IgnoreSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).with_context(|| format!("ignore pattern {pattern:?}"))?;
            builder.add(glob);
            kept.push(pattern.to_string());
        }
        let set = builder.build().context("build ignore set")?;
        Ok(Self {
            patterns: kept,
            set,
        })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.set.is_match(name)
    }
}

/// Result of placing a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    SkippedExisting,
    SkippedBroken,
    Failed(String),
}

/// Counts over one tree operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkReport {
    pub linked: usize,
    pub skipped_existing: usize,
    pub skipped_broken: usize,
    pub failed: Vec<String>,
}

impl LinkReport {
    fn record(&mut self, outcome: LinkOutcome) {
        match outcome {
            LinkOutcome::Linked => self.linked += 1,
            LinkOutcome::SkippedExisting => self.skipped_existing += 1,
            LinkOutcome::SkippedBroken => self.skipped_broken += 1,
            LinkOutcome::Failed(detail) => self.failed.push(detail),
        }
    }

    pub fn merge(&mut self, other: LinkReport) {
        self.linked += other.linked;
        self.skipped_existing += other.skipped_existing;
        self.skipped_broken += other.skipped_broken;
        self.failed.extend(other.failed);
    }

    fn into_result(self, src: &Path) -> Result<Self> {
        if let Some(first) = self.failed.first() {
            return Err(anyhow!(
                "{} of {} files under {} could not be placed; first: {first}",
                self.failed.len(),
                self.failed.len() + self.linked + self.skipped_existing + self.skipped_broken,
                src.display()
            ));
        }
        Ok(self)
    }
}

/// Whether the source tree is persistent or scratch that will be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Source,
    Scratch,
}

pub struct Materializer {
    strategy: Box<dyn LinkStrategy>,
    pool: Arc<ThreadPool>,
}

impl Materializer {
    pub fn new(mode: LinkMode, pool: Arc<ThreadPool>) -> Self {
        Self {
            strategy: mode.strategy(),
            pool,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Mirror `src` under `dst`, skipping ignored names.
    ///
    /// Directories are created serially before any file is placed; files are
    /// then placed on the worker pool and joined before returning.
    pub fn link_tree(&self, src: &Path, dst: &Path, ignore: &IgnoreSet) -> Result<LinkReport> {
        self.mirror(src, dst, ignore, Origin::Source)
    }

    /// Like [`Materializer::link_tree`] for a scratch tree about to be removed.
    ///
    /// Scratch entries that are symlinks are re-placed against their resolved
    /// target with the configured strategy; regular files (defaced images)
    /// are hard linked when possible and copied otherwise, so nothing in the
    /// release tree points into scratch.
    pub fn promote_tree(&self, src: &Path, dst: &Path) -> Result<LinkReport> {
        self.mirror(src, dst, &IgnoreSet::empty(), Origin::Scratch)
    }

    /// Place a single scratch file at `dst`.
    pub fn promote_file(&self, src: &Path, dst: &Path) -> Result<LinkOutcome> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let outcome = self.place_one(src, dst, Origin::Scratch);
        if let LinkOutcome::Failed(detail) = outcome {
            return Err(anyhow!(detail));
        }
        Ok(outcome)
    }

    fn mirror(
        &self,
        src: &Path,
        dst: &Path,
        ignore: &IgnoreSet,
        origin: Origin,
    ) -> Result<LinkReport> {
        let start = Instant::now();
        let mut report = LinkReport::default();
        let files = self.create_directories(src, dst, ignore, &mut report)?;

        let outcomes: Vec<LinkOutcome> = self.pool.install(|| {
            files
                .par_iter()
                .map(|(from, to)| self.place_one(from, to, origin))
                .collect()
        });
        for outcome in outcomes {
            report.record(outcome);
        }

        tracing::debug!(
            src = %src.display(),
            dst = %dst.display(),
            strategy = self.strategy.name(),
            linked = report.linked,
            skipped_existing = report.skipped_existing,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "tree materialized"
        );
        report.into_result(src)
    }

    fn create_directories(
        &self,
        src: &Path,
        dst: &Path,
        ignore: &IgnoreSet,
        report: &mut LinkReport,
    ) -> Result<Vec<(PathBuf, PathBuf)>> {
        if !src.is_dir() {
            return Err(anyhow!("source tree {} is not a directory", src.display()));
        }
        let mut files = Vec::new();
        let walker = WalkDir::new(src)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| ignore.is_ignored(name))
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(|p| p.display().to_string()).unwrap_or_default();
                    tracing::warn!(path = %path, error = %err, "skipping unreadable entry");
                    report.skipped_broken += 1;
                    continue;
                }
            };
            let rel = entry
                .path()
                .strip_prefix(src)
                .context("strip source prefix")?;
            let target = dst.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)
                    .with_context(|| format!("create {}", target.display()))?;
            } else {
                files.push((entry.path().to_path_buf(), target));
            }
        }
        Ok(files)
    }

    fn place_one(&self, src: &Path, dst: &Path, origin: Origin) -> LinkOutcome {
        if fs::symlink_metadata(dst).is_ok() {
            tracing::info!(
                src = %src.display(),
                dst = %dst.display(),
                "destination exists; leaving it unchanged"
            );
            return LinkOutcome::SkippedExisting;
        }
        let is_link = fs::symlink_metadata(src)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        let resolved = match fs::canonicalize(src) {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::warn!(src = %src.display(), error = %err, "broken link; skipping");
                return LinkOutcome::SkippedBroken;
            }
        };
        let placed = if origin == Origin::Scratch && !is_link {
            fs::hard_link(&resolved, dst).or_else(|_| fs::copy(&resolved, dst).map(|_| ()))
        } else {
            self.strategy.place(&resolved, dst)
        };
        match placed {
            Ok(()) => LinkOutcome::Linked,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                tracing::info!(dst = %dst.display(), "destination appeared concurrently; skipping");
                LinkOutcome::SkippedExisting
            }
            Err(err) => LinkOutcome::Failed(format!(
                "{} -> {}: {err}",
                resolved.display(),
                dst.display()
            )),
        }
    }
}

/// Build the bounded worker pool shared by linking and defacing.
pub fn worker_pool(parallelism: usize) -> Result<Arc<ThreadPool>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.max(1))
        .thread_name(|idx| format!("snapshot-worker-{idx}"))
        .build()
        .context("build worker pool")?;
    Ok(Arc::new(pool))
}

#[cfg(test)]
#[path = "materialize_tests.rs"]
mod tests;
