use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    if let Some(base) = base {
        if let Ok(relative) = path.strip_prefix(base) {
            return relative.display().to_string();
        }
    }
    path.display().to_string()
}

/// Replace `dest` with `bytes` through a sibling temp file and a rename.
///
/// Release trees hold hard links and symlinks into the source job trees, so
/// writing in place would modify the source. Renaming swaps the directory
/// entry and leaves whatever it used to point at untouched.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", dest.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("staged");
    let tmp_path = parent.join(format!(".{file_name}.tmp"));
    fs::write(&tmp_path, bytes).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, dest).with_context(|| format!("publish {}", dest.display()))?;
    Ok(())
}

pub fn write_atomic_text(dest: &Path, text: &str) -> Result<()> {
    write_atomic(dest, text.as_bytes())
}

pub fn write_atomic_json<T: serde::Serialize>(dest: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("serialize JSON")?;
    write_atomic(dest, &bytes)
}

/// Copy a resource file verbatim, replacing any existing destination entry.
pub fn copy_atomic(source: &Path, dest: &Path) -> Result<()> {
    let bytes = fs::read(source).with_context(|| format!("read {}", source.display()))?;
    write_atomic(dest, &bytes)
}

/// True when `dir` exists and has at least one entry.
pub fn dir_has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
