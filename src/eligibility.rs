//! Completeness evaluation for candidate units.
use crate::cohort::{follow_up_only_subject, Roster};
use crate::config::{render_template, JobSpec, Layout, Site, StoreSpec};
use crate::entity::{Session, UnitKey};
use crate::locate::locate_site_units;
use crate::util::dir_has_entries;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Answers whether a unit is already part of the persistent release.
pub trait StagedIndex {
    fn already_staged(&self, unit: &UnitKey) -> bool;
}

/// In-memory index, used when the release state is known up front.
impl StagedIndex for BTreeSet<UnitKey> {
    fn already_staged(&self, unit: &UnitKey) -> bool {
        self.contains(unit)
    }
}

/// Checks presence templates under the release root.
///
/// A unit counts as staged when every nested-layout store already holds it,
/// or when any flat-layout marker exists.
pub struct ReleaseTreeIndex<'a> {
    release_root: &'a Path,
    nested: Vec<&'a str>,
    flat: Vec<&'a str>,
}

impl<'a> ReleaseTreeIndex<'a> {
    pub fn new(release_root: &'a Path, stores: &'a [StoreSpec]) -> Self {
        let mut nested = Vec::new();
        let mut flat = Vec::new();
        for presence in stores.iter().filter_map(|store| store.presence.as_ref()) {
            match presence.layout {
                Layout::Nested => nested.push(presence.template.as_str()),
                Layout::Flat => flat.push(presence.template.as_str()),
            }
        }
        Self {
            release_root,
            nested,
            flat,
        }
    }

    fn exists(&self, template: &str, unit: &UnitKey) -> bool {
        let rel = render_template(template, "", unit);
        self.release_root.join(rel).exists()
    }
}

impl StagedIndex for ReleaseTreeIndex<'_> {
    fn already_staged(&self, unit: &UnitKey) -> bool {
        let all_nested = !self.nested.is_empty()
            && self.nested.iter().all(|template| self.exists(template, unit));
        all_nested || self.flat.iter().any(|template| self.exists(template, unit))
    }
}

/// A unit directory name found under one site, with its parsed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub key: UnitKey,
}

/// Why a candidate was or was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Eligible,
    NotInRoster { subject: u32 },
    AlreadyStaged,
    MissingJob { job: String, path: PathBuf },
    EmptyModality { job: String, path: PathBuf },
    FollowUpOnly { path: PathBuf },
}

impl Verdict {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Verdict::Eligible)
    }
}

pub struct Evaluator<'a> {
    site_root: PathBuf,
    jobs: &'a [&'a JobSpec],
    roster: &'a Roster,
    index: &'a dyn StagedIndex,
}

impl<'a> Evaluator<'a> {
    /// `site_root` is `{input_root}/{site_long_name}`.
    pub fn new(
        site_root: PathBuf,
        jobs: &'a [&'a JobSpec],
        roster: &'a Roster,
        index: &'a dyn StagedIndex,
    ) -> Self {
        Self {
            site_root,
            jobs,
            roster,
            index,
        }
    }

    /// Roster membership is checked first, so nothing is looked up on disk for
    /// subjects that can never be released.
    pub fn evaluate(&self, candidate: &Candidate) -> Verdict {
        if !self.roster.contains(candidate.key.subject) {
            return Verdict::NotInRoster {
                subject: candidate.key.subject,
            };
        }
        if self.index.already_staged(&candidate.key) {
            return Verdict::AlreadyStaged;
        }
        for job in self.jobs {
            let unit_dir = self.site_root.join(&job.name).join(&candidate.name);
            if !dir_has_entries(&unit_dir) {
                return Verdict::MissingJob {
                    job: job.name.clone(),
                    path: unit_dir,
                };
            }
            for modality in &job.submodalities {
                let modality_dir = unit_dir.join(modality);
                if !dir_has_entries(&modality_dir) {
                    return Verdict::EmptyModality {
                        job: job.name.clone(),
                        path: modality_dir,
                    };
                }
            }
            if let Some(path) = follow_up_only_subject(&unit_dir) {
                return Verdict::FollowUpOnly { path };
            }
        }
        Verdict::Eligible
    }
}

/// Remaining room under an optional unit cap, shared across sites.
#[derive(Debug, Clone, Copy)]
pub struct UnitBudget {
    remaining: Option<usize>,
}

impl UnitBudget {
    pub fn new(cap: Option<usize>) -> Self {
        Self { remaining: cap }
    }

    pub fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    fn take(&mut self) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }
}

/// Candidate unit names across every job of one site, sorted and deduplicated.
pub fn site_candidates(
    input_root: &Path,
    site: &Site,
    jobs: &[&JobSpec],
    session: Option<Session>,
) -> Result<Vec<Candidate>> {
    let mut names: BTreeMap<String, PathBuf> = BTreeMap::new();
    for job in jobs {
        for path in locate_site_units(input_root, site, &job.name, session)? {
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                names.entry(name.to_string()).or_insert(path);
            }
        }
    }
    names
        .into_iter()
        .map(|(name, path)| {
            let key = UnitKey::from_path(&path)?;
            Ok(Candidate { name, key })
        })
        .collect()
}

/// Eligible candidates in name order until the budget runs out.
///
/// Once the cap is reached the remaining candidates are not evaluated.
pub fn select_units(
    candidates: Vec<Candidate>,
    evaluator: &Evaluator<'_>,
    budget: &mut UnitBudget,
) -> Vec<Candidate> {
    let mut selected = Vec::new();
    for candidate in candidates {
        if budget.exhausted() {
            tracing::debug!(unit = %candidate.name, "unit cap reached; skipping");
            break;
        }
        let verdict = evaluator.evaluate(&candidate);
        if verdict.is_eligible() {
            budget.take();
            selected.push(candidate);
            continue;
        }
        match verdict {
            Verdict::Eligible => {}
            Verdict::NotInRoster { subject } => {
                tracing::info!(unit = %candidate.name, subject, "subject not in roster");
            }
            Verdict::AlreadyStaged => {
                tracing::debug!(unit = %candidate.name, "already released");
            }
            Verdict::MissingJob { job, path } => {
                tracing::warn!(
                    unit = %candidate.name,
                    job = %job,
                    path = %path.display(),
                    "job output missing or empty"
                );
            }
            Verdict::EmptyModality { job, path } => {
                tracing::warn!(
                    unit = %candidate.name,
                    job = %job,
                    path = %path.display(),
                    "modality missing or empty"
                );
            }
            Verdict::FollowUpOnly { path } => {
                tracing::info!(unit = %candidate.name, path = %path.display(), "follow-up only");
            }
        }
    }
    selected
}

#[cfg(test)]
#[path = "eligibility_tests.rs"]
mod tests;
