//! Built-in descriptors for the multi-site release.
use super::{
    DatasetFiles, DefacerConfig, JobSpec, Layout, MaskPairTemplate, MatchKind, MergeRule,
    Presence, ReleaseConfig, Rename, Site, SourcesConfig, StoreSpec, TableSpec,
    CONFIG_SCHEMA_VERSION,
};
use crate::materialize::LinkMode;
use serde_json::json;

const SITES: [(&str, &str); 6] = [
    ("NS", "NS_northshore"),
    ("UI", "UI_uic"),
    ("UC", "UC_uchicago"),
    ("UM", "UM_umichigan"),
    ("SH", "SH_spectrum_health"),
    ("WS", "WS_wayne_state"),
];

const FMRIPREP_BRANCHES: [&str; 3] = ["anat", "cuff", "rest"];

const STANDARD_SPACE: &str = "space-MNI152NLin2009cAsym";

const FREESURFER_VOLUMES: [&str; 5] = [
    "mri/orig/001.mgz",
    "mri/rawavg.mgz",
    "mri/orig.mgz",
    "mri/orig_nu.mgz",
    "mri/T1.mgz",
];

const README: &str = "A2CPS dataset";

const RAWDATA_BIDSIGNORE: &str = "
*.err
*.out
__pycache__*
sub-*/ses-*/fmap/*.bval
sub-*/ses-*/fmap/*.bvec
";

const FMRIPREP_BIDSIGNORE: &str = "
*.html
logs/
figures/
*_xfm.*
*.surf.gii
*_boldref.nii.gz
*_bold.func.gii
*_mixing.tsv
*_AROMAnoiseICs.csv
*_timeseries.tsv
";

pub fn default_config() -> ReleaseConfig {
    ReleaseConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        sites: SITES
            .iter()
            .map(|(code, name)| Site {
                code: code.to_string(),
                name: name.to_string(),
            })
            .collect(),
        jobs: default_jobs(),
        stores: default_stores(),
        mask_pairs: default_mask_pairs(),
        stage_link_mode: LinkMode::Symlink,
        release_link_mode: LinkMode::Hardlink,
        ignore: vec!["work".into(), "*_wf".into(), "sourcedata".into()],
        defacer: DefacerConfig {
            command: "mri_mask {volume} {mask} {output}".into(),
            binarize_args: "-T 0".into(),
        },
        sources: SourcesConfig::default(),
        idp_tables: Vec::new(),
        parallelism: 4,
        scratch_dir: None,
    }
}

fn job(name: &str, submodalities: &[&str]) -> JobSpec {
    JobSpec {
        name: name.into(),
        submodalities: submodalities.iter().map(|s| s.to_string()).collect(),
    }
}

fn default_jobs() -> Vec<JobSpec> {
    vec![
        job("bids", &[]),
        job("fmriprep", &FMRIPREP_BRANCHES),
        job("cat12", &[]),
        job("mriqc", &FMRIPREP_BRANCHES),
        job("qsiprep", &[]),
        job("fslanat", &[]),
    ]
}

fn rule(source: &str, kind: MatchKind) -> MergeRule {
    MergeRule {
        source: source.into(),
        kind,
        rename: Rename::Keep,
        suffix: String::new(),
    }
}

fn unit_rule(source: &str, kind: MatchKind, suffix: &str) -> MergeRule {
    MergeRule {
        source: source.into(),
        kind,
        rename: Rename::Unit,
        suffix: suffix.into(),
    }
}

fn nested(output_dir: &str) -> Option<Presence> {
    Some(Presence {
        template: format!("{output_dir}/sub-{{sub}}/ses-{{ses}}"),
        layout: Layout::Nested,
    })
}

fn flat(template: &str) -> Option<Presence> {
    Some(Presence {
        template: template.into(),
        layout: Layout::Flat,
    })
}

fn store(name: &str, locate_pattern: &str) -> StoreSpec {
    StoreSpec {
        name: name.into(),
        output_dir: format!("derivatives/{name}"),
        locate_pattern: locate_pattern.into(),
        presence: None,
        merge: Vec::new(),
        dataset: DatasetFiles::default(),
        static_files: Vec::new(),
        tables: Vec::new(),
        sidecars: Vec::new(),
        bids_tables: false,
        merge_dwiqc: false,
    }
}

fn table(source: &str, output_dir: &str, sidecar: &str) -> TableSpec {
    let file = source.rsplit('/').next().unwrap_or(source);
    TableSpec {
        source: source.into(),
        dest: format!("{output_dir}/{file}"),
        sidecar: Some(sidecar.into()),
    }
}

fn fmriprep_description() -> serde_json::Value {
    json!({
        "Name": "fMRIPrep - fMRI PREProcessing workflow",
        "BIDSVersion": "1.8.0",
        "DatasetType": "derivative",
        "GeneratedBy": [{
            "Name": "fMRIPrep",
            "Version": "20.2.3",
            "CodeURL": "https://github.com/nipreps/fmriprep/archive/20.2.3.tar.gz"
        }],
        "SourceDatasets": [{
            "URL": "https://doi.org/TODO: eventually a DOI for the dataset",
            "DOI": "TODO: eventually a DOI for the dataset"
        }]
    })
}

fn default_stores() -> Vec<StoreSpec> {
    let mut stores = Vec::new();

    let mut bids = store("bids", "sub-*");
    bids.output_dir = "rawdata".into();
    bids.presence = nested("rawdata");
    bids.merge = vec![rule("bids/*/sub-*", MatchKind::Dir)];
    bids.dataset = DatasetFiles {
        readme: Some(README.into()),
        description: Some(json!({ "BIDSVersion": "1.8.0", "Name": "A2CPS" })),
        bidsignore: Some(RAWDATA_BIDSIGNORE.into()),
    };
    bids.bids_tables = true;
    stores.push(bids);

    for branch in FMRIPREP_BRANCHES {
        let name = format!("fmriprep-{branch}");
        let mut spec = store(&name, "sub-*");
        spec.presence = nested(&spec.output_dir);
        spec.merge = vec![
            rule(&format!("fmriprep/*/{branch}/fmriprep/sub-*"), MatchKind::Dir),
            unit_rule(
                &format!("fmriprep/*/{branch}/fmriprep/sub-*.html"),
                MatchKind::File,
                ".html",
            ),
        ];
        spec.dataset = DatasetFiles {
            readme: Some(README.into()),
            description: Some(fmriprep_description()),
            bidsignore: Some(FMRIPREP_BIDSIGNORE.into()),
        };
        spec.static_files = vec![
            "desc-aseg_dseg.tsv".into(),
            "desc-aparcaseg_dseg.tsv".into(),
        ];
        stores.push(spec);
    }

    let mut fmriprep = store("fmriprep", "sub-*");
    fmriprep.static_files = vec![
        "desc-aseg_dseg.tsv".into(),
        "desc-aparcaseg_dseg.tsv".into(),
    ];
    stores.push(fmriprep);

    let mut qsiprep = store("qsiprep", "sub-*");
    qsiprep.presence = nested(&qsiprep.output_dir);
    qsiprep.merge = vec![
        rule("qsiprep/*/qsiprep/sub-*", MatchKind::Dir),
        unit_rule("qsiprep/*/qsiprep/sub-*.html", MatchKind::File, ".html"),
        unit_rule("qsiprep/*/qsiprep/dwiqc.json", MatchKind::File, ".json"),
    ];
    qsiprep.merge_dwiqc = true;
    stores.push(qsiprep);
    stores.push(store("qsiprep-V1", "sub-*"));

    let mut mriqc = store("mriqc", "sub-*");
    mriqc.presence = nested(&mriqc.output_dir);
    mriqc.merge = FMRIPREP_BRANCHES
        .iter()
        .map(|branch| rule(&format!("mriqc/*/{branch}/sub*"), MatchKind::Any))
        .collect();
    stores.push(mriqc);

    let mut freesurfer = store("freesurfer", "sub-*");
    freesurfer.presence = flat("derivatives/freesurfer/sub-{sub}_ses-{ses}");
    freesurfer.merge = vec![unit_rule(
        "fmriprep/*/anat/freesurfer/sub-*",
        MatchKind::Dir,
        "",
    )];
    freesurfer.tables = ["aparc", "aseg", "headers"]
        .iter()
        .map(|name| {
            table(
                &format!("freesurfer/{name}.tsv"),
                "derivatives/freesurfer",
                &format!("freesurfer_{name}.json"),
            )
        })
        .collect();
    stores.push(freesurfer);

    let mut cat12 = store("cat12", "report/catreport_sub-*pdf");
    cat12.presence = flat("derivatives/cat12/report/catreport_sub-{sub}_ses-{ses}_T1w.pdf");
    cat12.merge = ["label", "mri", "report", "surf"]
        .iter()
        .map(|dir| rule(&format!("cat12/*/{dir}"), MatchKind::Dir))
        .collect();
    cat12.tables = vec![table(
        "cat12/cluster_volumes.tsv",
        "derivatives/cat12",
        "cat12_cluster_volumes.json",
    )];
    stores.push(cat12);

    let mut fslanat = store("fslanat", "sub-*");
    fslanat.presence = flat("derivatives/fslanat/sub-{sub}_ses-{ses}.anat");
    fslanat.merge = vec![rule("fslanat/*/*", MatchKind::Any)];
    fslanat.tables = vec![table(
        "fslanat/fslanat.tsv",
        "derivatives/fslanat",
        "fslanat.json",
    )];
    stores.push(fslanat);

    let mut fcn = store("fcn", "*cleaned/sub-*");
    fcn.sidecars = vec![
        "acompcor.json".into(),
        "connectivity-confounds.json".into(),
        "connectivity.json".into(),
    ];
    stores.push(fcn);

    let mut signatures = store("signatures", "*cleaned/sub-*");
    signatures.sidecars = [
        "by-part", "by-run", "by-tr", "confounds", "labels", "rawdata",
    ]
    .iter()
    .map(|name| format!("signature-{name}.json"))
    .collect();
    stores.push(signatures);

    for name in ["bedpostx", "brainager", "eddyqc", "gift", "synthstrip"] {
        stores.push(store(name, "sub-*"));
    }
    stores.push(store("postdtifit", "diffusion_regional/sub-*"));
    stores.push(store("postgift", "amplitude/sub=*"));
    stores.push(store("qsirecon_fsl_dtifit", "qsirecon-fsl/sub=*"));

    stores
}

fn pair(
    target: String,
    mask: String,
    fallback_mask: Option<String>,
    make_mask: bool,
) -> MaskPairTemplate {
    MaskPairTemplate {
        target,
        mask,
        fallback_mask,
        make_mask,
    }
}

fn default_mask_pairs() -> Vec<MaskPairTemplate> {
    let fmriprep_anat =
        "fmriprep/{unit}/{branch}/fmriprep/sub-{sub}/ses-{ses}/anat/sub-{sub}_ses-{ses}";
    let shared_mask = fmriprep_anat.replace("{branch}", "anat") + "_desc-brain_mask.nii.gz";

    let mut pairs = vec![pair(
        "bids/{unit}/sub-{sub}/ses-{ses}/anat/sub-{sub}_ses-{ses}_T1w.nii.gz".into(),
        shared_mask.clone(),
        None,
        false,
    )];

    for branch in FMRIPREP_BRANCHES {
        let prefix = fmriprep_anat.replace("{branch}", branch);
        pairs.push(pair(
            format!("{prefix}_desc-preproc_T1w.nii.gz"),
            format!("{prefix}_desc-brain_mask.nii.gz"),
            Some(shared_mask.clone()),
            false,
        ));
        pairs.push(pair(
            format!("{prefix}_{STANDARD_SPACE}_desc-preproc_T1w.nii.gz"),
            format!("{prefix}_{STANDARD_SPACE}_desc-brain_mask.nii.gz"),
            None,
            false,
        ));
    }

    for volume in FREESURFER_VOLUMES {
        pairs.push(pair(
            format!("fmriprep/{{unit}}/anat/freesurfer/sub-{{sub}}/{volume}"),
            shared_mask.clone(),
            None,
            true,
        ));
    }

    let qsiprep = "qsiprep/{unit}/qsiprep/sub-{sub}/anat/sub-{sub}";
    pairs.push(pair(
        format!("{qsiprep}_desc-preproc_T1w.nii.gz"),
        format!("{qsiprep}_desc-brain_mask.nii.gz"),
        None,
        false,
    ));
    pairs.push(pair(
        format!("{qsiprep}_{STANDARD_SPACE}_desc-preproc_T1w.nii.gz"),
        format!("{qsiprep}_{STANDARD_SPACE}_desc-brain_mask.nii.gz"),
        None,
        false,
    ));

    pairs
}
