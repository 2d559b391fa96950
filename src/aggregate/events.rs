use crate::cohort::{parse_subject_cell, Roster};
use crate::entity::{self, Session};
use crate::nifti;
use crate::table::Table;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const BOLD_SUFFIX: &str = "bold.nii.gz";
const EVENTS_SUFFIX: &str = "events.tsv";

type PressureKey = (u32, Session, String);

fn pressure_lookup(path: &Path) -> Result<BTreeMap<PressureKey, Vec<Option<String>>>> {
    let table = Table::read(path)?;
    let record = table.require_column("record_id")?;
    let visit = table.require_column("visit")?;
    let scan = table.require_column("scan")?;
    let pressure = table.require_column("applied_pressure")?;
    let mut lookup: BTreeMap<PressureKey, Vec<Option<String>>> = BTreeMap::new();
    for row in &table.rows {
        let key = table
            .value(row, record)
            .and_then(parse_subject_cell)
            .zip(table.value(row, visit).and_then(entity::session_in_text))
            .zip(table.value(row, scan));
        if let Some(((subject, session), scan)) = key {
            lookup
                .entry((subject, session, scan.to_string()))
                .or_default()
                .push(table.value(row, pressure).map(str::to_string));
        }
    }
    Ok(lookup)
}

enum RunKind {
    Task(&'static str),
    Rest,
}

fn run_kind(name: &str) -> RunKind {
    if name.contains("cuff_run-01") {
        RunKind::Task("CUFF1")
    } else if name.contains("cuff_run-02") {
        RunKind::Task("CUFF2")
    } else if name.contains("rest") {
        RunKind::Rest
    } else {
        RunKind::Task("")
    }
}

fn events_path(bold: &Path) -> Option<PathBuf> {
    let name = bold.file_name()?.to_str()?;
    let stem = name.strip_suffix(BOLD_SUFFIX)?;
    Some(bold.with_file_name(format!("{stem}{EVENTS_SUFFIX}")))
}

/// Events rows for one run: one per tabulated pressure, or a single row
/// with a null pressure when the lookup misses.
fn events_table(duration: u64, pressures: Option<&Vec<Option<String>>>) -> Table {
    let mut table = Table::new(vec![
        "onset".into(),
        "duration".into(),
        "applied_pressure".into(),
    ]);
    let values: Vec<Option<String>> = match pressures {
        Some(values) if !values.is_empty() => values.clone(),
        _ => vec![None],
    };
    for pressure in values {
        table.push(vec![Some("0".into()), Some(duration.to_string()), pressure]);
    }
    table
}

/// Write `*_events.tsv` beside every baseline task BOLD run of admitted
/// subjects and delete stale events files of resting-state runs.
pub(super) fn write_events(
    rawdata: &Path,
    roster: &Roster,
    pressures: Option<&Path>,
) -> Result<()> {
    let lookup = match pressures {
        Some(path) => pressure_lookup(path)
            .with_context(|| format!("load applied pressures {}", path.display()))?,
        None => BTreeMap::new(),
    };
    for entry in WalkDir::new(rawdata)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(BOLD_SUFFIX) {
            continue;
        }
        let bold = entry.path();
        let Some(events) = events_path(bold) else {
            continue;
        };
        let rel = bold.strip_prefix(rawdata).unwrap_or(bold);
        let key = entity::parse_subject(rel).ok().zip(entity::parse_session(rel).ok());
        let Some((subject, session)) = key else {
            tracing::warn!(path = %bold.display(), "BOLD run without subject/session; skipping");
            continue;
        };
        if !roster.contains(subject) || !session.is_baseline() {
            continue;
        }
        let scan = match run_kind(&name) {
            RunKind::Rest => {
                if fs::symlink_metadata(&events).is_ok() {
                    fs::remove_file(&events)
                        .with_context(|| format!("remove {}", events.display()))?;
                }
                continue;
            }
            RunKind::Task(scan) => scan,
        };
        let duration = match nifti::volume_count(bold) {
            Ok(duration) => duration,
            Err(err) => {
                tracing::warn!(
                    path = %bold.display(),
                    error = %err,
                    "unreadable BOLD header; no events written"
                );
                continue;
            }
        };
        let table = events_table(duration, lookup.get(&(subject, session, scan.to_string())));
        table.write_tsv(&events)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_path_replaces_bold_suffix() {
        let bold = Path::new("func/sub-10001_ses-V1_task-cuff_run-01_bold.nii.gz");
        assert_eq!(
            events_path(bold),
            Some(PathBuf::from("func/sub-10001_ses-V1_task-cuff_run-01_events.tsv"))
        );
    }

    #[test]
    fn lookup_miss_writes_single_null_row() {
        let table = events_table(450, None);
        assert_eq!(table.to_tsv(), "onset\tduration\tapplied_pressure\n0\t450\tn/a\n");
    }

    #[test]
    fn pressures_are_keyed_by_subject_visit_and_scan() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pressures.csv");
        fs::write(
            &path,
            "record_id,visit,scan,applied_pressure\n10001,V1,CUFF1,120\n10001,V1,CUFF2,140\n",
        )
        .expect("write");

        let lookup = pressure_lookup(&path).expect("lookup");
        let table = events_table(10, lookup.get(&(10001, Session::V1, "CUFF2".to_string())));

        assert_eq!(table.to_tsv(), "onset\tduration\tapplied_pressure\n0\t10\t140\n");
    }
}
