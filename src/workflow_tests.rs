use super::*;
use crate::archive::ArchiveStore;
use crate::config::default_config;
use crate::deface::Defacer;
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent directory");
    }
    fs::write(path, contents.as_bytes()).expect("write file");
}

/// Writes `defaced:<volume contents>` to the output.
#[derive(Default)]
struct TaggingDefacer {
    calls: AtomicUsize,
}

impl Defacer for TaggingDefacer {
    fn transform(
        &self,
        volume: &Path,
        _mask: &Path,
        _make_mask: bool,
        output: &Path,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let original = fs::read_to_string(volume)?;
        fs::write(output, format!("defaced:{original}"))?;
        Ok(())
    }
}

/// Lays out one complete `bids` + `fmriprep` unit under a site namespace.
fn complete_unit(input: &Path, site: &str, unit: &str, subject: u32) {
    complete_unit_at(input, site, unit, subject, "V1");
}

fn complete_unit_at(input: &Path, site: &str, unit: &str, subject: u32, session: &str) {
    let prefix = format!("sub-{subject}_ses-{session}");
    write_file(
        &input.join(format!(
            "{site}/bids/{unit}/sub-{subject}/ses-{session}/anat/{prefix}_T1w.nii.gz"
        )),
        "raw",
    );
    for branch in ["anat", "cuff", "rest"] {
        let anat = input.join(format!(
            "{site}/fmriprep/{unit}/{branch}/fmriprep/sub-{subject}/ses-{session}/anat"
        ));
        write_file(&anat.join(format!("{prefix}_desc-preproc_T1w.nii.gz")), "preproc");
        if branch == "anat" {
            write_file(&anat.join(format!("{prefix}_desc-brain_mask.nii.gz")), "mask");
        }
    }
    write_file(
        &input.join(format!("{site}/fmriprep/{unit}/anat/work/scratch.txt")),
        "ignored",
    );
}

struct StageFixture {
    _temp: tempfile::TempDir,
    input: PathBuf,
    release: PathBuf,
    config: ReleaseConfig,
}

impl StageFixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = default_config();
        config.scratch_dir = Some(temp.path().join("scratch"));
        Self {
            input: temp.path().join("input"),
            release: temp.path().join("release"),
            config,
            _temp: temp,
        }
    }

    fn run(&self, max_units: Option<usize>, defacer: &dyn Defacer) -> StageSummary {
        let roster: Roster = [10001, 10002, 20003].into_iter().collect();
        self.run_with(&roster, max_units, defacer)
    }

    fn run_with(
        &self,
        roster: &Roster,
        max_units: Option<usize>,
        defacer: &dyn Defacer,
    ) -> StageSummary {
        let request = StageRequest {
            input_root: &self.input,
            release_root: &self.release,
            sites: self.config.sites.iter().collect(),
            jobs: self
                .config
                .select_jobs(&["bids".to_string(), "fmriprep".to_string()])
                .expect("jobs"),
            session: None,
            max_units,
            parallelism: 2,
        };
        stage(&self.config, &request, roster, defacer).expect("stage")
    }
}

#[test]
fn stage_defaces_into_the_release_without_touching_inputs() {
    let fixture = StageFixture::new();
    complete_unit(&fixture.input, "NS_northshore", "NS10001V1", 10001);
    let defacer = TaggingDefacer::default();

    let summary = fixture.run(None, &defacer);

    assert_eq!(summary.units, vec!["NS10001V1".to_string()]);
    assert_eq!(summary.defaced, 4);
    let rawdata_t1 = fixture
        .release
        .join("rawdata/sub-10001/ses-V1/anat/sub-10001_ses-V1_T1w.nii.gz");
    assert_eq!(fs::read_to_string(rawdata_t1).expect("read"), "defaced:raw");
    let input_t1 = fixture.input.join(
        "NS_northshore/bids/NS10001V1/sub-10001/ses-V1/anat/sub-10001_ses-V1_T1w.nii.gz",
    );
    assert_eq!(fs::read_to_string(input_t1).expect("read"), "raw");
    let cuff_preproc = fixture.release.join(
        "derivatives/fmriprep-cuff/sub-10001/ses-V1/anat/sub-10001_ses-V1_desc-preproc_T1w.nii.gz",
    );
    assert_eq!(fs::read_to_string(cuff_preproc).expect("read"), "defaced:preproc");
    assert!(fixture.release.join("rawdata/dataset_description.json").is_file());
}

#[test]
fn stage_removes_scratch_and_skips_ignored_names() {
    let fixture = StageFixture::new();
    complete_unit(&fixture.input, "NS_northshore", "NS10001V1", 10001);

    fixture.run(None, &TaggingDefacer::default());

    let scratch = fixture.config.scratch_dir.clone().expect("scratch");
    assert_eq!(fs::read_dir(&scratch).expect("read scratch").count(), 0);
    let found_work = walkdir::WalkDir::new(&fixture.release)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.file_name() == "work");
    assert!(!found_work);
}

#[test]
fn incomplete_and_released_units_are_not_staged() {
    let fixture = StageFixture::new();
    complete_unit(&fixture.input, "NS_northshore", "NS10001V1", 10001);
    complete_unit(&fixture.input, "NS_northshore", "NS10002V1", 10002);
    write_file(
        &fixture
            .input
            .join("UI_uic/bids/UI20003V1/sub-20003/ses-V1/anat/sub-20003_ses-V1_T1w.nii.gz"),
        "raw",
    );
    fs::create_dir_all(fixture.release.join("derivatives/freesurfer/sub-10002_ses-V1"))
        .expect("mkdir");
    let defacer = TaggingDefacer::default();

    let summary = fixture.run(None, &defacer);

    assert_eq!(summary.units, vec!["NS10001V1".to_string()]);
    assert!(!fixture.release.join("rawdata/sub-20003").exists());
    assert!(!fixture.release.join("rawdata/sub-10002").exists());
}

#[test]
fn stage_releases_only_admitted_baseline_subjects() {
    let fixture = StageFixture::new();
    complete_unit(&fixture.input, "NS_northshore", "NS10001V1", 10001);
    complete_unit(&fixture.input, "NS_northshore", "NS10002V1", 10002);
    complete_unit_at(&fixture.input, "NS_northshore", "NS10003V3", 10003, "V3");
    let roster: Roster = [10001, 10003].into_iter().collect();
    let defacer = TaggingDefacer::default();

    let summary = fixture.run_with(&roster, None, &defacer);

    assert_eq!(summary.units, vec!["NS10001V1".to_string()]);
    assert_eq!(defacer.calls.load(Ordering::SeqCst), 4);
    assert!(fixture.release.join("rawdata/sub-10001/ses-V1").is_dir());
    assert!(!fixture.release.join("rawdata/sub-10002").exists());
    assert!(!fixture.release.join("rawdata/sub-10003").exists());
    assert!(!fixture
        .release
        .join("derivatives/fmriprep-anat/sub-10002")
        .exists());
}

#[test]
fn unit_cap_stops_selection() {
    let fixture = StageFixture::new();
    complete_unit(&fixture.input, "NS_northshore", "NS10001V1", 10001);
    complete_unit(&fixture.input, "NS_northshore", "NS10002V1", 10002);
    let defacer = TaggingDefacer::default();

    let summary = fixture.run(Some(1), &defacer);

    assert_eq!(summary.units, vec!["NS10001V1".to_string()]);
    assert_eq!(defacer.calls.load(Ordering::SeqCst), 4);
    assert!(!fixture.release.join("rawdata/sub-10002").exists());
}

#[test]
fn release_copies_admitted_baseline_subjects_only() {
    let temp = tempfile::tempdir().expect("tempdir");
    let input = temp.path().join("staged");
    let release_root = temp.path().join("release");
    write_file(&input.join("bids/sub-10001/ses-V1/anat/t1.nii.gz"), "a");
    write_file(&input.join("bids/sub-10001/ses-V3/anat/t1.nii.gz"), "b");
    write_file(&input.join("bids/sub-10002/ses-V3/anat/t1.nii.gz"), "c");
    write_file(&input.join("bids/sub-30003/ses-V1/anat/t1.nii.gz"), "d");
    let config = default_config();
    let roster: Roster = [10001, 10002].into_iter().collect();
    let request = ReleaseRequest {
        input_root: &input,
        release_root: &release_root,
        stores: vec![config.store("bids").expect("bids")],
        parallelism: 2,
    };

    let report = release(&config, &request, &roster).expect("release");

    let rawdata = release_root.join("rawdata");
    assert_eq!(report.linked, 1);
    assert!(rawdata.join("sub-10001/ses-V1/anat/t1.nii.gz").is_file());
    assert!(!rawdata.join("sub-10001/ses-V3").exists());
    assert!(!rawdata.join("sub-10002").exists());
    assert!(!rawdata.join("sub-30003").exists());
}

#[test]
fn release_aborts_when_a_file_cannot_be_placed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let input = temp.path().join("staged");
    let release_root = temp.path().join("release");
    write_file(&input.join("bids/sub-10001/ses-V1/anat/t1.nii.gz"), "a");
    write_file(&release_root.join("rawdata/sub-10001/ses-V1"), "not a directory");
    let config = default_config();
    let roster: Roster = [10001].into_iter().collect();
    let request = ReleaseRequest {
        input_root: &input,
        release_root: &release_root,
        stores: vec![config.store("bids").expect("bids")],
        parallelism: 1,
    };

    let err = release(&config, &request, &roster).unwrap_err();

    assert!(format!("{err:#}").contains("copy store bids"));
    assert!(!release_root.join("rawdata/dataset_description.json").exists());
}

#[test]
fn load_roster_requires_a_source() {
    let config = default_config();
    let err = load_roster(&config, None).unwrap_err();
    assert!(err.to_string().contains("no roster configured"));
}

#[derive(Default)]
struct RecordingStore {
    calls: RefCell<Vec<String>>,
}

impl RecordingStore {
    fn record(&self, call: String) -> Result<()> {
        self.calls.borrow_mut().push(call);
        Ok(())
    }
}

impl ArchiveStore for RecordingStore {
    fn create(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        self.record(format!("create {}", path.display()))
    }

    fn save(&self, path: &Path, message: Option<&str>, jobs: usize) -> Result<()> {
        self.record(format!("save {} {message:?} {jobs}", path.display()))
    }

    fn push(&self, path: &Path, remote: &str, jobs: usize) -> Result<()> {
        self.record(format!("push {} {remote} {jobs}", path.display()))
    }

    fn export_archive(&self, path: &Path, target: &Path) -> Result<()> {
        self.record(format!("export {} {}", path.display(), target.display()))
    }

    fn create_remote(&self, path: &Path, url: &str, alias: &str) -> Result<()> {
        self.record(format!("remote {} {url} {alias}", path.display()))
    }
}

#[test]
fn init_writes_attributes_then_saves() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = default_config();
    let stores = vec![config.store("bids").expect("bids")];
    let store = RecordingStore::default();

    init_stores(&store, temp.path(), &stores, 3).expect("init");

    let rawdata = temp.path().join("rawdata");
    assert_eq!(
        fs::read_to_string(rawdata.join(".gitattributes")).expect("attributes"),
        crate::archive::GITATTRIBUTES
    );
    assert_eq!(
        store.calls.borrow().as_slice(),
        [
            format!("create {}", rawdata.display()),
            format!("save {} Some(\"Prepare for Release\") 3", rawdata.display()),
        ]
    );
}

#[test]
fn add_remote_rejects_non_ria_urls() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = default_config();
    let stores = vec![config.store("bids").expect("bids")];
    let store = RecordingStore::default();

    let err = add_remote(&store, temp.path(), "file:///data/ria", &stores).unwrap_err();

    assert!(err.to_string().contains("ria+"));
    assert!(store.calls.borrow().is_empty());

    add_remote(&store, temp.path(), "ria+file:///data/ria", &stores).expect("add remote");
    assert_eq!(
        store.calls.borrow().as_slice(),
        [format!(
            "remote {} ria+file:///data/ria bids",
            temp.path().join("rawdata").display()
        )]
    );
}

#[test]
fn archive_exports_then_drops_loose_objects() {
    let temp = tempfile::tempdir().expect("tempdir");
    let release_root = temp.path().join("release");
    let ria = temp.path().join("ria");
    let objects = ria.join("alias/cat12/annex/objects/xx");
    write_file(&objects.join("key"), "blob");
    let config = default_config();
    let stores = vec![config.store("cat12").expect("cat12")];
    let store = RecordingStore::default();

    archive_stores(&store, &release_root, &ria, &stores, 2).expect("archive");

    let dataset = release_root.join("derivatives/cat12");
    assert_eq!(
        store.calls.borrow().as_slice(),
        [
            format!("push {} ria 2", dataset.display()),
            format!(
                "export {} {}",
                dataset.display(),
                ria.join("alias/cat12/archives/archive.7z").display()
            ),
        ]
    );
    assert!(!ria.join("alias/cat12/annex/objects").exists());
}

#[test]
fn default_config_is_written_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = temp.path().join("config.json");

    write_default_config(&out, false).expect("write");
    let loaded = config::load_config(&out).expect("load");
    assert_eq!(loaded, default_config());
    assert!(write_default_config(&out, false).is_err());
}
