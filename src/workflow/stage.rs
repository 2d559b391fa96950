use crate::aggregate::Aggregator;
use crate::cohort::Roster;
use crate::config::{JobSpec, ReleaseConfig, Site, StoreSpec};
use crate::deface::{deface_unit, mask_pairs_for_unit, Defacer};
use crate::eligibility::{
    select_units, site_candidates, Candidate, Evaluator, ReleaseTreeIndex, UnitBudget,
};
use crate::entity::Session;
use crate::materialize::{worker_pool, IgnoreSet, LinkReport, Materializer};
use anyhow::{Context, Result};
use rayon::ThreadPool;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub struct StageRequest<'a> {
    /// Root holding `{site_long_name}/{job}/{unit}` trees.
    pub input_root: &'a Path,
    pub release_root: &'a Path,
    pub sites: Vec<&'a Site>,
    pub jobs: Vec<&'a JobSpec>,
    pub session: Option<Session>,
    pub max_units: Option<usize>,
    pub parallelism: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub units: Vec<String>,
    pub defaced: usize,
    pub linked: usize,
    pub skipped_existing: usize,
}

struct SiteRun<'a> {
    config: &'a ReleaseConfig,
    request: &'a StageRequest<'a>,
    pool: Arc<ThreadPool>,
    ignore: IgnoreSet,
    stores: Vec<&'a StoreSpec>,
}

/// Stage eligible units from every requested site into the release tree.
///
/// Each site gets its own private scratch directory which is removed once
/// the site's units have been aggregated.
pub fn stage(
    config: &ReleaseConfig,
    request: &StageRequest<'_>,
    roster: &Roster,
    defacer: &dyn Defacer,
) -> Result<StageSummary> {
    let start = Instant::now();
    let run = SiteRun {
        config,
        request,
        pool: worker_pool(request.parallelism)?,
        ignore: IgnoreSet::new(&config.ignore)?,
        stores: config
            .stores
            .iter()
            .filter(|store| !store.merge.is_empty())
            .collect(),
    };
    tracing::debug!(ignore = ?run.ignore.patterns(), "staging ignore patterns");
    let mut budget = UnitBudget::new(request.max_units);
    let mut summary = StageSummary::default();
    for site in &request.sites {
        if budget.exhausted() {
            tracing::info!(site = %site.code, "unit cap reached; remaining sites skipped");
            break;
        }
        let selected = run.select(site, roster, &mut budget)?;
        if selected.is_empty() {
            tracing::info!(site = %site.code, "no eligible units");
            continue;
        }
        run.stage_site(site, &selected, roster, defacer, &mut summary)?;
        summary
            .units
            .extend(selected.into_iter().map(|candidate| candidate.name));
    }
    tracing::info!(
        units = summary.units.len(),
        defaced = summary.defaced,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "stage complete"
    );
    Ok(summary)
}

impl SiteRun<'_> {
    fn select(
        &self,
        site: &Site,
        roster: &Roster,
        budget: &mut UnitBudget,
    ) -> Result<Vec<Candidate>> {
        let request = self.request;
        let candidates =
            site_candidates(request.input_root, site, &request.jobs, request.session)?;
        let index = ReleaseTreeIndex::new(request.release_root, &self.config.stores);
        let site_root = request.input_root.join(&site.name);
        let evaluator = Evaluator::new(site_root, &request.jobs, roster, &index);
        Ok(select_units(candidates, &evaluator, budget))
    }

    fn scratch_parent(&self) -> Result<PathBuf> {
        let parent = self
            .config
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        fs::create_dir_all(&parent)
            .with_context(|| format!("create scratch parent {}", parent.display()))?;
        Ok(parent)
    }

    fn stage_site(
        &self,
        site: &Site,
        units: &[Candidate],
        roster: &Roster,
        defacer: &dyn Defacer,
        summary: &mut StageSummary,
    ) -> Result<()> {
        let start = Instant::now();
        let scratch = tempfile::Builder::new()
            .prefix(&format!("snapshot-{}-", site.code))
            .tempdir_in(self.scratch_parent()?)
            .context("create scratch directory")?;
        let scratch_site = scratch.path().join(&site.name);
        let site_root = self.request.input_root.join(&site.name);

        let linker = Materializer::new(self.config.stage_link_mode, self.pool.clone());
        let promoter = Materializer::new(self.config.release_link_mode, self.pool.clone());
        tracing::debug!(
            site = %site.code,
            stage = linker.strategy_name(),
            release = promoter.strategy_name(),
            scratch = %scratch.path().display(),
            "staging site"
        );
        for unit in units {
            for job in &self.request.jobs {
                let src = site_root.join(&job.name).join(&unit.name);
                if !src.is_dir() {
                    continue;
                }
                let dst = scratch_site.join(&job.name).join(&unit.name);
                linker
                    .link_tree(&src, &dst, &self.ignore)
                    .with_context(|| format!("stage {}", src.display()))?;
            }
            let pairs = mask_pairs_for_unit(
                &scratch_site,
                &unit.name,
                &unit.key,
                &self.config.mask_pairs,
            );
            summary.defaced += deface_unit(&self.pool, defacer, &pairs)
                .with_context(|| format!("deface unit {}", unit.name))?;
            tracing::info!(site = %site.code, unit = %unit.name, "unit staged");
        }

        let aggregator = Aggregator::new(self.request.release_root, roster, &self.config.sources);
        let report: LinkReport = aggregator.aggregate(
            &scratch_site,
            &self.stores,
            &promoter,
            self.config.sources.tables_root.as_deref(),
        )?;
        summary.linked += report.linked;
        summary.skipped_existing += report.skipped_existing;

        let scratch_path = scratch.path().to_path_buf();
        scratch
            .close()
            .with_context(|| format!("remove scratch {}", scratch_path.display()))?;
        tracing::info!(
            site = %site.code,
            units = units.len(),
            linked = report.linked,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "site aggregated"
        );
        Ok(())
    }
}
