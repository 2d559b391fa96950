use crate::config::{MatchKind, MergeRule, Rename, StoreSpec};
use crate::entity::UnitKey;
use crate::locate::locate;
use crate::materialize::{LinkOutcome, LinkReport, Materializer};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

fn kind_matches(kind: MatchKind, path: &Path) -> bool {
    match kind {
        MatchKind::File => path.is_file(),
        MatchKind::Dir => path.is_dir(),
        MatchKind::Any => path.exists(),
    }
}

fn destination_name(rule: &MergeRule, scratch_root: &Path, matched: &Path) -> Result<String> {
    match rule.rename {
        Rename::Keep => matched
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("{} has no file name", matched.display())),
        Rename::Unit => {
            let rel = matched.strip_prefix(scratch_root).unwrap_or(matched);
            let key = UnitKey::from_path(rel)?;
            Ok(format!("{}{}", key.join_name(), rule.suffix))
        }
    }
}

fn rule_matches(scratch_root: &Path, rule: &MergeRule) -> Result<Vec<(PathBuf, String)>> {
    let mut matches = Vec::new();
    for path in locate(scratch_root, &rule.source)? {
        if !kind_matches(rule.kind, &path) {
            continue;
        }
        let name = destination_name(rule, scratch_root, &path)?;
        matches.push((path, name));
    }
    Ok(matches)
}

/// Apply every merge rule of `store`, scratch site root to store root.
pub(super) fn merge_store(
    scratch_root: &Path,
    store_root: &Path,
    store: &StoreSpec,
    materializer: &Materializer,
) -> Result<LinkReport> {
    let mut report = LinkReport::default();
    for rule in &store.merge {
        for (source, name) in rule_matches(scratch_root, rule)? {
            let dest = store_root.join(&name);
            if source.is_dir() {
                let merged = materializer
                    .promote_tree(&source, &dest)
                    .with_context(|| format!("merge {} into {}", source.display(), store.name))?;
                report.merge(merged);
            } else {
                match materializer.promote_file(&source, &dest)? {
                    LinkOutcome::Linked => report.linked += 1,
                    LinkOutcome::SkippedExisting => report.skipped_existing += 1,
                    LinkOutcome::SkippedBroken => report.skipped_broken += 1,
                    LinkOutcome::Failed(detail) => report.failed.push(detail),
                }
            }
        }
    }
    Ok(report)
}
