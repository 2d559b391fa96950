//! Roster-based filtering of tables and whole-tree copies.
use crate::entity::{self, Session};
use crate::locate::locate;
use crate::materialize::{IgnoreSet, LinkReport, Materializer};
use crate::table::Table;
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Admitted record IDs for one release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    ids: BTreeSet<u32>,
}

impl Roster {
    /// Load from the enrollment table's `record_id` column (first column when
    /// absent). Null or non-numeric cells are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let table = Table::read(path).with_context(|| format!("load roster {}", path.display()))?;
        if table.columns.is_empty() {
            return Ok(Self::default());
        }
        let column = table.column_index("record_id").unwrap_or(0);
        let ids = table
            .rows
            .iter()
            .filter_map(|row| table.value(row, column))
            .filter_map(parse_subject_cell)
            .collect();
        Ok(Self { ids })
    }

    pub fn contains(&self, subject: u32) -> bool {
        self.ids.contains(&subject)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<u32> for Roster {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Subject ID from a table cell: `10001`, `10001.0` or `sub-10001`.
pub fn parse_subject_cell(cell: &str) -> Option<u32> {
    let cell = cell.trim();
    if let Ok(id) = cell.parse::<u32>() {
        return Some(id);
    }
    if let Some(id) = cell
        .parse::<f64>()
        .ok()
        .filter(|value| value.fract() == 0.0 && *value > 0.0 && *value <= f64::from(u32::MAX))
    {
        return Some(id as u32);
    }
    entity::subject_in_text(cell)
}

/// Keep rows whose subject is in the roster and, when a session column is
/// given, whose session label carries the baseline marker.
pub fn filter_rows(
    mut table: Table,
    subject_column: &str,
    session_column: Option<&str>,
    roster: &Roster,
) -> Result<Table> {
    let subject_idx = table.require_column(subject_column)?;
    let session_idx = session_column
        .map(|column| table.require_column(column))
        .transpose()?;
    let baseline = Session::V1.as_str();
    table.retain(|row| {
        let admitted = row
            .get(subject_idx)
            .and_then(|cell| cell.as_deref())
            .and_then(parse_subject_cell)
            .is_some_and(|id| roster.contains(id));
        let baseline_row = match session_idx {
            None => true,
            Some(idx) => row
                .get(idx)
                .and_then(|cell| cell.as_deref())
                .is_some_and(|ses| ses.contains(baseline)),
        };
        admitted && baseline_row
    });
    Ok(table)
}

/// True when `dir` holds exactly one `ses*` child and it is a follow-up visit.
pub fn follow_up_only(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    let sessions: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("ses"))
        .collect();
    sessions.len() == 1 && sessions[0].contains(Session::V3.as_str())
}

/// Deepest level at which job trees hold `sub-*` directories below a unit,
/// e.g. `{unit}/{branch}/fmriprep/sub-*`.
const SUBJECT_SEARCH_DEPTH: usize = 3;

/// First `sub-*` directory under `unit_dir` whose only session is a
/// follow-up. Subject directories themselves are not descended into.
pub fn follow_up_only_subject(unit_dir: &Path) -> Option<PathBuf> {
    let mut entries = WalkDir::new(unit_dir)
        .min_depth(1)
        .max_depth(SUBJECT_SEARCH_DEPTH)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = entries.next() {
        let Ok(entry) = entry else {
            continue;
        };
        let is_subject = entry.file_type().is_dir()
            && entry.file_name().to_string_lossy().starts_with("sub-");
        if !is_subject {
            continue;
        }
        entries.skip_current_dir();
        if follow_up_only(entry.path()) {
            return Some(entry.into_path());
        }
    }
    None
}

/// Subjects found in `tree` (via `locate_pattern`) that must not be copied:
/// absent from the roster, or present only with a follow-up session.
pub fn excluded_subjects(
    tree: &Path,
    locate_pattern: &str,
    roster: &Roster,
) -> Result<BTreeSet<u32>> {
    let mut excluded = BTreeSet::new();
    for path in locate(tree, locate_pattern)? {
        let subject = entity::parse_subject(&path)?;
        if !roster.contains(subject) {
            excluded.insert(subject);
            continue;
        }
        if follow_up_only(&path) {
            tracing::info!(path = %path.display(), "follow-up only; excluding subject");
            excluded.insert(subject);
        }
    }
    Ok(excluded)
}

/// One wildcard per excluded subject plus the blanket follow-up wildcard.
pub fn exclusion_patterns(excluded: &BTreeSet<u32>) -> Vec<String> {
    let mut patterns = vec![format!("*{}*", Session::V3)];
    patterns.extend(excluded.iter().map(|subject| format!("*{subject}*")));
    patterns
}

/// Copy `tree` into `dest`, leaving out every name matched by `exclude_patterns`.
pub fn filter_copy(
    tree: &Path,
    dest: &Path,
    exclude_patterns: &[String],
    materializer: &Materializer,
) -> Result<LinkReport> {
    if !tree.is_dir() {
        return Err(anyhow!("release input {} is not a directory", tree.display()));
    }
    let ignore = IgnoreSet::new(exclude_patterns)?;
    materializer.link_tree(tree, dest, &ignore)
}

#[cfg(test)]
#[path = "cohort_tests.rs"]
mod tests;
