//! Config loading, validation and persistence.
use super::{default_config, ReleaseConfig, CONFIG_FILE_NAME, CONFIG_SCHEMA_VERSION};
use crate::error::SnapshotError;
use anyhow::{Context, Result};
use globset::Glob;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<ReleaseConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: ReleaseConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    validate_config(&config).with_context(|| format!("validate {}", path.display()))?;
    Ok(config)
}

/// Pick the config for this process: an explicit path, then the user config
/// dir, then the built-in defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<(ReleaseConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        return Ok((load_config(path)?, Some(path.to_path_buf())));
    }
    if let Some(path) = user_config_path().filter(|path| path.is_file()) {
        return Ok((load_config(&path)?, Some(path)));
    }
    Ok((default_config(), None))
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("snapshot").join(CONFIG_FILE_NAME))
}

/// Persist a config in a stable JSON format.
pub fn write_config(path: &Path, config: &ReleaseConfig) -> Result<()> {
    let mut text = serde_json::to_string_pretty(config).context("serialize config")?;
    text.push('\n');
    crate::util::write_atomic_text(path, &text)
}

pub fn validate_config(config: &ReleaseConfig) -> Result<(), SnapshotError> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(invalid(format!(
            "unsupported schema_version {} (expected {CONFIG_SCHEMA_VERSION})",
            config.schema_version
        )));
    }
    if config.parallelism == 0 {
        return Err(invalid("parallelism must be at least 1".into()));
    }
    unique("site code", config.sites.iter().map(|site| site.code.as_str()))?;
    unique("job", config.jobs.iter().map(|job| job.name.as_str()))?;
    unique("store", config.stores.iter().map(|store| store.name.as_str()))?;
    for site in &config.sites {
        if site.code.is_empty() || site.name.is_empty() {
            return Err(invalid("site entries need a code and a name".into()));
        }
    }
    for store in &config.stores {
        validate_relative(&store.output_dir, "output_dir")?;
        validate_glob(&store.locate_pattern)?;
        for rule in &store.merge {
            validate_glob(&rule.source)?;
        }
        for table in &store.tables {
            validate_relative(&table.source, "table source")?;
            validate_relative(&table.dest, "table dest")?;
        }
        if let Some(presence) = &store.presence {
            validate_relative(&presence.template, "presence template")?;
        }
    }
    for table in &config.idp_tables {
        validate_relative(&table.source, "table source")?;
        validate_relative(&table.dest, "table dest")?;
    }
    for pattern in &config.ignore {
        validate_glob(pattern)?;
    }
    for pair in &config.mask_pairs {
        validate_relative(&pair.target, "mask-pair target")?;
        validate_relative(&pair.mask, "mask-pair mask")?;
    }
    let command = shell_words::split(&config.defacer.command)
        .map_err(|err| invalid(format!("defacer command: {err}")))?;
    for placeholder in ["{volume}", "{mask}", "{output}"] {
        if !command.iter().any(|arg| arg.contains(placeholder)) {
            return Err(invalid(format!("defacer command lacks {placeholder}")));
        }
    }
    shell_words::split(&config.defacer.binarize_args)
        .map_err(|err| invalid(format!("defacer binarize_args: {err}")))?;
    Ok(())
}

fn invalid(message: String) -> SnapshotError {
    SnapshotError::InvalidConfig(message)
}

fn unique<'a>(label: &str, names: impl Iterator<Item = &'a str>) -> Result<(), SnapshotError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(invalid(format!("duplicate {label} {name:?}")));
        }
    }
    Ok(())
}

fn validate_glob(pattern: &str) -> Result<(), SnapshotError> {
    validate_relative(pattern, "pattern")?;
    Glob::new(pattern)
        .map(|_| ())
        .map_err(|err| invalid(format!("pattern {pattern:?}: {err}")))
}

fn validate_relative(rel: &str, label: &str) -> Result<(), SnapshotError> {
    let path = Path::new(rel);
    let escapes = path
        .components()
        .any(|component| matches!(component, std::path::Component::ParentDir));
    if rel.trim().is_empty() || path.is_absolute() || escapes {
        return Err(invalid(format!(
            "{label} entries must be relative paths without '..' (got {rel:?})"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "load_tests.rs"]
mod tests;
