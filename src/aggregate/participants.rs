use crate::cohort::{parse_subject_cell, Roster};
use crate::entity::{self, Session};
use crate::table::{Row, Table};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

const COLUMNS: [&str; 5] = ["sub", "sex", "age", "handedness", "site"];

fn coded(value: Option<&str>) -> Option<i64> {
    let value = value?.trim();
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().filter(|v| v.fract() == 0.0).map(|v| v as i64))
}

fn sex_label(value: Option<&str>) -> Option<String> {
    match coded(value)? {
        1 => Some("male".into()),
        2 => Some("female".into()),
        4 => Some("other".into()),
        _ => None,
    }
}

fn handedness_label(value: Option<&str>) -> Option<String> {
    match coded(value)? {
        1 => Some("right".into()),
        2 => Some("left".into()),
        3 => Some("ambidextrous".into()),
        _ => None,
    }
}

/// Subjects with a `sub-*` directory directly under `rawdata`.
pub(super) fn subjects_present(rawdata: &Path) -> Result<BTreeSet<u32>> {
    let mut present = BTreeSet::new();
    let entries = fs::read_dir(rawdata).with_context(|| format!("read {}", rawdata.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read {}", rawdata.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("sub-") || !entry.path().is_dir() {
            continue;
        }
        if let Some(subject) = entity::subject_in_text(&name) {
            present.insert(subject);
        }
    }
    Ok(present)
}

/// One row per admitted subject that has imaging data and a baseline visit
/// in the imaging log, left-joined to demographics.
fn participants_table(
    present: &BTreeSet<u32>,
    roster: &Roster,
    imaging_log: &Table,
    demographics: &Table,
) -> Result<Table> {
    let log_subject = imaging_log.require_column("subject_id")?;
    let log_visit = imaging_log.require_column("visit")?;
    let log_site = imaging_log.require_column("site")?;
    let mut sites: BTreeMap<u32, Option<String>> = BTreeMap::new();
    for row in &imaging_log.rows {
        let baseline = imaging_log
            .value(row, log_visit)
            .is_some_and(|visit| visit.contains(Session::V1.as_str()));
        let Some(subject) = imaging_log.value(row, log_subject).and_then(parse_subject_cell) else {
            continue;
        };
        if baseline && roster.contains(subject) && present.contains(&subject) {
            sites
                .entry(subject)
                .or_insert_with(|| imaging_log.value(row, log_site).map(str::to_string));
        }
    }

    let demo_id = demographics.require_column("record_id")?;
    let demo_sex = demographics.column_index("sex");
    let demo_age = demographics.column_index("age");
    let demo_hand = demographics.column_index("dom_hand");
    let mut demo: BTreeMap<u32, &Row> = BTreeMap::new();
    for row in &demographics.rows {
        if let Some(id) = demographics.value(row, demo_id).and_then(parse_subject_cell) {
            demo.entry(id).or_insert(row);
        }
    }

    let mut table = Table::new(COLUMNS.iter().map(|c| c.to_string()).collect());
    for (subject, site) in sites {
        let row = demo.get(&subject).copied();
        let field = |idx: Option<usize>| {
            row.zip(idx)
                .and_then(|(row, idx)| demographics.value(row, idx))
        };
        table.push(vec![
            Some(subject.to_string()),
            sex_label(field(demo_sex)),
            field(demo_age).map(str::to_string),
            handedness_label(field(demo_hand)),
            site,
        ]);
    }
    Ok(table)
}

pub(super) fn write_participants(
    rawdata: &Path,
    roster: &Roster,
    imaging_log: &Path,
    demographics: &Path,
) -> Result<()> {
    let present = subjects_present(rawdata)?;
    let log = Table::read(imaging_log)?;
    let demo = Table::read(demographics)?;
    let table = participants_table(&present, roster, &log, &demo)
        .with_context(|| format!("build participants from {}", imaging_log.display()))?;
    tracing::info!(rows = table.len(), "participants table");
    table.write_tsv(&rawdata.join("participants.tsv"))
}
