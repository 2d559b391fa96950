//! Release configuration: sites, job and store descriptors, mask templates.
//!
//! The config is a single JSON document loaded once per process and passed
//! by reference. Descriptor tables replace per-category code paths so a new
//! job or store is a config edit.
use crate::entity::UnitKey;
use crate::error::SnapshotError;
use crate::materialize::LinkMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod defaults;
mod load;

pub use defaults::default_config;
pub use load::{load_config, resolve_config, validate_config, write_config};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReleaseConfig {
    pub schema_version: u32,
    pub sites: Vec<Site>,
    pub jobs: Vec<JobSpec>,
    pub stores: Vec<StoreSpec>,
    pub mask_pairs: Vec<MaskPairTemplate>,
    /// Placement used when staging units into scratch.
    pub stage_link_mode: LinkMode,
    /// Placement used by the whole-dataset release copy.
    pub release_link_mode: LinkMode,
    /// Names skipped while staging (`work`, `*_wf`, `sourcedata`).
    pub ignore: Vec<String>,
    pub defacer: DefacerConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Pass-through tables written outside any store directory.
    #[serde(default)]
    pub idp_tables: Vec<TableSpec>,
    pub parallelism: usize,
    /// Parent for per-site scratch directories; system temp dir when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

/// Two-letter site code and the long name used for input directories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Site {
    pub code: String,
    pub name: String,
}

/// An input job category as produced by the site pipelines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub name: String,
    /// Subdirectories of a unit dir that must each be non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub submodalities: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// `sub-X/ses-Y` directories.
    Nested,
    /// A single flat marker (`sub-X_ses-Y` dir or report file).
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Presence {
    /// Path relative to the release root proving the unit was released.
    pub template: String,
    pub layout: Layout,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    File,
    Dir,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Rename {
    #[default]
    Keep,
    /// `sub-{sub}_ses-{ses}{suffix}`.
    Unit,
}

/// How one scratch glob lands in a store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MergeRule {
    /// Glob relative to the scratch site root.
    pub source: String,
    #[serde(default)]
    pub kind: MatchKind,
    #[serde(default)]
    pub rename: Rename,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suffix: String,
}

/// Top-level BIDS files written at the store root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct DatasetFiles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bidsignore: Option<String>,
}

/// A derivative table re-emitted under the release tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    /// Relative to the derivative tables root.
    pub source: String,
    /// Relative to the release root.
    pub dest: String,
    /// Resource file copied next to `dest` as its JSON sidecar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StoreSpec {
    pub name: String,
    /// Relative to the release root.
    pub output_dir: String,
    /// Subject-level entries searched by the whole-dataset release copy.
    pub locate_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<Presence>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merge: Vec<MergeRule>,
    #[serde(default)]
    pub dataset: DatasetFiles,
    /// Resource files copied verbatim into the store root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableSpec>,
    /// Resource JSON sidecars copied into the store root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidecars: Vec<String>,
    /// Regenerate participants/sessions/scans/events under this store.
    #[serde(default)]
    pub bids_tables: bool,
    /// Merge per-unit `sub-*_ses-*.json` QC reports into `dwiqc.json`.
    #[serde(default)]
    pub merge_dwiqc: bool,
}

/// Volume/mask pair templates relative to the scratch site root.
///
/// Placeholders: `{unit}` (input unit dir name), `{sub}`, `{ses}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MaskPairTemplate {
    pub target: String,
    pub mask: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_mask: Option<String>,
    #[serde(default)]
    pub make_mask: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DefacerConfig {
    /// Command line with `{volume}`, `{mask}` and `{output}` placeholders.
    pub command: String,
    /// Extra arguments inserted after the program when the mask must be
    /// thresholded first.
    #[serde(default)]
    pub binarize_args: String,
}

/// External tables and resources consumed by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roster: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imaging_log: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qc_log: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demographics: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_serials: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_pressures: Option<PathBuf>,
    /// Directory holding sidecar JSON, README and look-up tables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_dir: Option<PathBuf>,
    /// Root of the derivative tables (`cat12/cluster_volumes.tsv`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables_root: Option<PathBuf>,
}

impl ReleaseConfig {
    pub fn site(&self, code: &str) -> Result<&Site, SnapshotError> {
        self.sites
            .iter()
            .find(|site| site.code == code)
            .ok_or_else(|| SnapshotError::UnknownSite(code.to_string()))
    }

    pub fn job(&self, name: &str) -> Result<&JobSpec, SnapshotError> {
        self.jobs
            .iter()
            .find(|job| job.name == name)
            .ok_or_else(|| SnapshotError::UnknownJob(name.to_string()))
    }

    pub fn store(&self, name: &str) -> Result<&StoreSpec, SnapshotError> {
        self.stores
            .iter()
            .find(|store| store.name == name)
            .ok_or_else(|| SnapshotError::UnknownStore(name.to_string()))
    }

    /// Resolve requested job names, defaulting to every configured job.
    pub fn select_jobs(&self, names: &[String]) -> Result<Vec<&JobSpec>, SnapshotError> {
        if names.is_empty() {
            return Ok(self.jobs.iter().collect());
        }
        names.iter().map(|name| self.job(name)).collect()
    }

    /// Resolve requested store names; `default` picks stores when none are named.
    pub fn select_stores(
        &self,
        names: &[String],
        default: impl Fn(&StoreSpec) -> bool,
    ) -> Result<Vec<&StoreSpec>, SnapshotError> {
        if names.is_empty() {
            return Ok(self.stores.iter().filter(|store| default(store)).collect());
        }
        names.iter().map(|name| self.store(name)).collect()
    }
}

/// Fill `{unit}`, `{sub}` and `{ses}` in a path template.
pub fn render_template(template: &str, unit: &str, key: &UnitKey) -> String {
    template
        .replace("{unit}", unit)
        .replace("{sub}", &key.subject.to_string())
        .replace("{ses}", key.session.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Session;

    #[test]
    fn render_template_fills_all_placeholders() {
        let key = UnitKey::new(10001, Session::V1);
        let rendered = render_template(
            "bids/{unit}/sub-{sub}/ses-{ses}/anat/sub-{sub}_ses-{ses}_T1w.nii.gz",
            "NS10001V1",
            &key,
        );
        assert_eq!(
            rendered,
            "bids/NS10001V1/sub-10001/ses-V1/anat/sub-10001_ses-V1_T1w.nii.gz"
        );
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        let config = default_config();
        assert!(matches!(
            config.select_jobs(&["petprep".to_string()]),
            Err(SnapshotError::UnknownJob(name)) if name == "petprep"
        ));
        assert!(matches!(
            config.store("nope"),
            Err(SnapshotError::UnknownStore(_))
        ));
        assert!(matches!(config.site("XX"), Err(SnapshotError::UnknownSite(_))));
    }

    #[test]
    fn empty_selection_defaults_to_all_jobs() {
        let config = default_config();
        let jobs = config.select_jobs(&[]).expect("jobs");
        assert_eq!(jobs.len(), config.jobs.len());
    }

    #[test]
    fn fmriprep_branches_describe_their_source_dataset() {
        let config = default_config();
        for branch in ["anat", "cuff", "rest"] {
            let store = config.store(&format!("fmriprep-{branch}")).expect("store");
            let description = store.dataset.description.as_ref().expect("description");
            assert_eq!(description["DatasetType"], "derivative");
            assert_eq!(
                description["SourceDatasets"][0]["DOI"],
                "TODO: eventually a DOI for the dataset"
            );
            assert_eq!(
                description["SourceDatasets"][0]["URL"],
                "https://doi.org/TODO: eventually a DOI for the dataset"
            );
        }
    }
}
