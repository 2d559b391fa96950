use crate::util::write_atomic;
use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Identifying fields stripped from every raw sidecar.
const FIELDS_TO_REMOVE: [&str; 1] = ["InstitutionAddress"];

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

/// Serialize with sorted keys and two-space indent.
fn render(value: &Value) -> Result<Vec<u8>> {
    // serde_json's Map is a BTreeMap unless `preserve_order` is enabled.
    let mut bytes = serde_json::to_vec_pretty(value).context("serialize sidecar")?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Remove identifying fields from every JSON sidecar under `root`.
///
/// Returns the number of files rewritten; untouched files keep their bytes.
pub fn clean_sidecars(root: &Path) -> Result<usize> {
    let mut rewritten = 0;
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_name().to_string_lossy().ends_with(".json") {
            continue;
        }
        let path = entry.path();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unreadable sidecar");
                continue;
            }
        };
        let mut value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "invalid sidecar JSON");
                continue;
            }
        };
        let Some(object) = value.as_object_mut() else {
            continue;
        };
        let mut removed = false;
        for field in FIELDS_TO_REMOVE {
            if object.get(field).is_some_and(is_truthy) {
                object.remove(field);
                removed = true;
            }
        }
        if removed {
            write_atomic(path, &render(&value)?)?;
            rewritten += 1;
        }
    }
    if rewritten > 0 {
        tracing::info!(root = %root.display(), rewritten, "sidecars cleaned");
    }
    Ok(rewritten)
}

/// Merge per-unit `sub-*_ses-*.json` QC reports into `dwiqc.json`.
///
/// The merged file keeps the first report's top-level fields and collects
/// the first `subjects` entry of every report, in file-name order.
pub(super) fn merge_dwiqc(store_root: &Path) -> Result<()> {
    let mut reports: Vec<_> = fs::read_dir(store_root)
        .with_context(|| format!("read {}", store_root.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| {
                    name.starts_with("sub-") && name.contains("_ses-") && name.ends_with(".json")
                })
        })
        .collect();
    if reports.is_empty() {
        return Ok(());
    }
    reports.sort();

    let mut merged: Option<Map<String, Value>> = None;
    let mut subjects = Vec::new();
    for path in &reports {
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let report: Value =
            serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
        let first = report
            .get("subjects")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .ok_or_else(|| anyhow!("{} has no subjects entry", path.display()))?;
        subjects.push(first.clone());
        if merged.is_none() {
            let mut base = report.as_object().cloned().unwrap_or_default();
            base.remove("subjects");
            merged = Some(base);
        }
    }
    let mut merged = merged.unwrap_or_default();
    merged.insert("subjects".into(), Value::Array(subjects));
    write_atomic(&store_root.join("dwiqc.json"), &render(&Value::Object(merged))?)?;
    Ok(())
}
