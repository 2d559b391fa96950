use crate::cohort::{parse_subject_cell, Roster};
use crate::entity::{self, Session};
use crate::table::Table;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use walkdir::WalkDir;

fn scan_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new("fmap|anat|dwi|cuff_run-01|cuff_run-02|rest_run-01|rest_run-02")
            .expect("valid scan regex")
    })
}

/// QC scan type for a `filename` cell; field maps have none.
pub(super) fn scan_type(filename: &str) -> Option<&'static str> {
    match scan_pattern().find(filename)?.as_str() {
        "anat" => Some("T1w"),
        "dwi" => Some("DWI"),
        "cuff_run-01" => Some("CUFF1"),
        "cuff_run-02" => Some("CUFF2"),
        "rest_run-01" => Some("REST1"),
        "rest_run-02" => Some("REST2"),
        _ => None,
    }
}

type QcKey = (u32, Session, &'static str);

fn qc_lookup(path: &Path) -> Result<BTreeMap<QcKey, Option<String>>> {
    let table = Table::read(path)?;
    let sub = table.require_column("sub")?;
    let ses = table.require_column("ses")?;
    let scan = table.require_column("scan")?;
    let rating = table.require_column("rating")?;
    let mut lookup = BTreeMap::new();
    for row in &table.rows {
        let Some(subject) = table.value(row, sub).and_then(parse_subject_cell) else {
            continue;
        };
        let Some(session) = table.value(row, ses).and_then(entity::session_in_text) else {
            continue;
        };
        let Some(scan) = table.value(row, scan).and_then(canonical_scan) else {
            continue;
        };
        lookup
            .entry((subject, session, scan))
            .or_insert_with(|| table.value(row, rating).map(str::to_string));
    }
    Ok(lookup)
}

fn canonical_scan(raw: &str) -> Option<&'static str> {
    ["T1w", "DWI", "CUFF1", "CUFF2", "REST1", "REST2"]
        .into_iter()
        .find(|known| *known == raw.trim())
}

/// Rebuild one scans table: baseline rows only, `rating` joined from QC.
fn rated_scans(scans: &Table, qc: &BTreeMap<QcKey, Option<String>>) -> Result<Table> {
    let filename = scans.require_column("filename")?;
    let mut table = Table::new(vec!["filename".into(), "rating".into()]);
    for row in &scans.rows {
        let Some(name) = scans.value(row, filename) else {
            continue;
        };
        let session = entity::session_in_text(name);
        if session.is_some_and(|session| !session.is_baseline()) {
            continue;
        }
        let key = entity::subject_in_text(name)
            .zip(session)
            .zip(scan_type(name))
            .map(|((subject, session), scan)| (subject, session, scan));
        let rating = key.and_then(|key| qc.get(&key).cloned().flatten());
        table.push(vec![Some(name.to_string()), rating]);
    }
    Ok(table)
}

/// Rewrite every `*sub*scans.tsv` under `rawdata` for admitted subjects.
pub(super) fn update_scans(rawdata: &Path, roster: &Roster, qc_log: &Path) -> Result<()> {
    let qc = qc_lookup(qc_log).with_context(|| format!("load QC log {}", qc_log.display()))?;
    for entry in WalkDir::new(rawdata)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if !(name.contains("sub") && name.ends_with("scans.tsv")) {
            continue;
        }
        let path = entry.path();
        let rel = path.strip_prefix(rawdata).unwrap_or(path);
        let Ok(subject) = entity::parse_subject(rel) else {
            tracing::warn!(path = %path.display(), "scans table without subject; skipping");
            continue;
        };
        if !roster.contains(subject) {
            continue;
        }
        let scans = Table::read(path)?;
        let table = rated_scans(&scans, &qc)
            .with_context(|| format!("rate {}", path.display()))?;
        table.write_tsv(path)?;
        let sidecar = path.with_extension("json");
        if fs::symlink_metadata(&sidecar).is_ok() {
            fs::remove_file(&sidecar).with_context(|| format!("remove {}", sidecar.display()))?;
        }
    }
    Ok(())
}
