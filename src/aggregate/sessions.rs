use crate::cohort::{parse_subject_cell, Roster};
use crate::entity::{self, Session};
use crate::table::Table;
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use walkdir::WalkDir;

/// Output column, imaging-log column.
const MAPPED_COLUMNS: [(&str, &str); 27] = [
    ("face_mask", "Face Mask"),
    ("magnet", "Magnet Name"),
    ("acquisition_week", "acquisition_week"),
    ("t1_tech_rating", "fMRI T1 Tech Rating"),
    ("cuff1_pressure_from_qst", "Cuff1 QST Pressure"),
    ("cuff1_recalibrated_pressure", "Cuff1 Recalibrated Pressure"),
    ("cuff1_applied_pressure", "Cuff1 Applied Pressure"),
    ("surgical_site_pain_rest", "Surgical site pain rest"),
    ("body_pain_rest", "Body pain rest"),
    ("surgical_site_pain_after_first_scan", "Surgical site pain after first scan"),
    ("body_pain_after_first_scan", "Body pain after first scan"),
    ("cuff_pain_after_first_scan", "Cuff pain after first scan"),
    ("cuff_pain_cuff1_beginning", "Cuff pain cuff1 beginning"),
    ("cuff_pain_cuff1_middle", "Cuff pain cuff1 middle"),
    ("cuff_pain_cuff1_end", "Cuff pain cuff1 end"),
    ("cuff_pain_cuff2_beginning", "Cuff pain cuff2 beginning"),
    ("cuff_pain_cuff2_middle", "Cuff pain cuff2 middle"),
    ("cuff_pain_cuff2_end", "Cuff pain cuff2 end"),
    ("cuff_pain_rest_beginning", "Cuff pain rest beginning"),
    ("cuff_pain_rest_middle", "Cuff pain rest middle"),
    ("cuff_pain_rest_end", "Cuff pain rest end"),
    ("surgical_site_pain_after_last_scan", "Surgical site pain after last scan"),
    ("body_pain_after_last_scan", "Body pain after last scan"),
    ("cuff_contraindicated", "Cuff contraindicated"),
    ("surgery_week", "Surgery Week"),
    ("cuff_leg", "Cuff Leg"),
    ("site", "site"),
];

const BOOLEAN_COLUMNS: [&str; 2] = ["face_mask", "cuff_contraindicated"];
const DATE_COLUMNS: [&str; 2] = ["acquisition_week", "surgery_week"];
const DROPPED_COLUMNS: [&str; 2] = ["magnet", "site"];

const DATE_OUTPUT: &str = "%Y-%m-%dT%H:%M:%S";
const DATETIME_INPUTS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y-%m-%d %H:%M",
];
const DATE_INPUTS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    for format in DATETIME_INPUTS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.format(DATE_OUTPUT).to_string());
        }
    }
    for format in DATE_INPUTS {
        if let Ok(parsed) = NaiveDate::parse_from_str(raw, format) {
            return parsed
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.format(DATE_OUTPUT).to_string());
        }
    }
    tracing::warn!(value = raw, "unparseable date; writing n/a");
    None
}

fn to_bool(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let truth = match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" => true,
        "false" | "no" => false,
        other => other.parse::<f64>().ok()?.abs() > 0.0,
    };
    Some(if truth { "True" } else { "False" }.to_string())
}

/// Magnet 1 is labelled scanner 2 and vice versa.
fn scanner_suffix(magnet: Option<&str>) -> &'static str {
    let code = magnet
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .map(|code| code.round() as i64);
    match code {
        Some(1) => "2",
        Some(2) => "1",
        _ => "",
    }
}

fn serial_lookup(path: &Path) -> Result<BTreeMap<(u32, Session), String>> {
    let table = Table::read(path)?;
    let sub = table.require_column("sub")?;
    let ses = table.require_column("ses")?;
    let serial = table.require_column("serial_number")?;
    let mut lookup = BTreeMap::new();
    for row in &table.rows {
        let key = table
            .value(row, sub)
            .and_then(parse_subject_cell)
            .zip(table.value(row, ses).and_then(|s| s.parse::<Session>().ok()));
        if let (Some(key), Some(serial)) = (key, table.value(row, serial)) {
            lookup.entry(key).or_insert_with(|| serial.to_string());
        }
    }
    Ok(lookup)
}

fn columns() -> Vec<String> {
    let mut columns = vec!["session_id".to_string(), "sub".to_string()];
    columns.extend(
        MAPPED_COLUMNS
            .iter()
            .map(|(out, _)| *out)
            .filter(|out| !DROPPED_COLUMNS.contains(out))
            .map(str::to_string),
    );
    columns.extend(["scanner", "protocol", "device_serial_number"].map(str::to_string));
    columns
}

/// Baseline sessions table for one subject.
fn sessions_table(
    subject: u32,
    imaging_log: &Table,
    serials: &BTreeMap<(u32, Session), String>,
) -> Result<Table> {
    let log_subject = imaging_log.require_column("subject_id")?;
    let log_visit = imaging_log.require_column("visit")?;
    let sources: BTreeMap<&str, Option<usize>> = MAPPED_COLUMNS
        .iter()
        .map(|(out, source)| (*out, imaging_log.column_index(source)))
        .collect();

    let mut table = Table::new(columns());
    for row in &imaging_log.rows {
        if imaging_log.value(row, log_subject).and_then(parse_subject_cell) != Some(subject) {
            continue;
        }
        let Some(visit) = imaging_log.value(row, log_visit) else {
            continue;
        };
        if !visit.contains(Session::V1.as_str()) {
            continue;
        }
        let session = visit.parse::<Session>().unwrap_or(Session::V1);
        let value = |column: &str| {
            sources
                .get(column)
                .copied()
                .flatten()
                .and_then(|idx| imaging_log.value(row, idx))
        };
        let mut out = vec![
            Some(visit.replacen('V', "ses-V", 1)),
            Some(subject.to_string()),
        ];
        for (column, _) in MAPPED_COLUMNS {
            if DROPPED_COLUMNS.contains(&column) {
                continue;
            }
            let raw = value(column);
            let cell = if BOOLEAN_COLUMNS.contains(&column) {
                raw.and_then(to_bool)
            } else if DATE_COLUMNS.contains(&column) {
                raw.and_then(normalize_date)
            } else {
                raw.map(str::to_string)
            };
            out.push(cell);
        }
        out.push(value("site").map(|site| format!("{site}{}", scanner_suffix(value("magnet")))));
        out.push(Some(session.protocol().to_string()));
        out.push(serials.get(&(subject, session)).cloned());
        table.push(out);
    }
    Ok(table)
}

/// Write `sub-X/sub-X_sessions.tsv` for every admitted subject holding a
/// session directory.
pub(super) fn write_sessions(
    rawdata: &Path,
    roster: &Roster,
    imaging_log: &Path,
    device_serials: Option<&Path>,
) -> Result<()> {
    let log = Table::read(imaging_log)?;
    let serials = match device_serials {
        Some(path) => serial_lookup(path)
            .with_context(|| format!("load device serials {}", path.display()))?,
        None => BTreeMap::new(),
    };
    let mut subjects = BTreeSet::new();
    for entry in WalkDir::new(rawdata)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        let path = entry.path();
        let is_session_dir = entry.file_type().is_dir()
            && entry.file_name().to_string_lossy().starts_with("ses")
            && path
                .parent()
                .and_then(|parent| parent.file_name())
                .is_some_and(|name| name.to_string_lossy().starts_with("sub"));
        if !is_session_dir {
            continue;
        }
        let rel = path.strip_prefix(rawdata).unwrap_or(path);
        let subject = entity::parse_subject(rel)?;
        if roster.contains(subject) {
            subjects.insert(subject);
        }
    }
    for subject in subjects {
        let table = sessions_table(subject, &log, &serials)?;
        let dest = rawdata
            .join(format!("sub-{subject}"))
            .join(format!("sub-{subject}_sessions.tsv"));
        table.write_tsv(&dest)?;
    }
    Ok(())
}
