use super::*;
use crate::config::default_config;
use crate::entity::Session;
use crate::materialize::worker_pool;
use std::sync::Mutex;

/// Writes `masked(<make_mask>):<original contents>` to the output.
#[derive(Default)]
struct RecordingDefacer {
    calls: Mutex<Vec<PathBuf>>,
}

impl Defacer for RecordingDefacer {
    fn transform(&self, volume: &Path, _mask: &Path, make_mask: bool, output: &Path) -> Result<()> {
        let original = fs::read_to_string(volume)?;
        fs::write(output, format!("masked({make_mask}):{original}"))?;
        self.calls.lock().expect("lock").push(volume.to_path_buf());
        Ok(())
    }
}

/// Returns success without writing anything.
struct SilentDefacer;

impl Defacer for SilentDefacer {
    fn transform(
        &self,
        _volume: &Path,
        _mask: &Path,
        _make_mask: bool,
        _output: &Path,
    ) -> Result<()> {
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent directory");
    }
    fs::write(path, contents.as_bytes()).expect("write file");
}

#[test]
fn deface_replaces_link_without_touching_source() {
    let temp = tempfile::tempdir().expect("tempdir");
    let source = temp.path().join("source/T1w.nii.gz");
    let staged = temp.path().join("scratch/anat/T1w.nii.gz");
    let mask = temp.path().join("scratch/anat/mask.nii.gz");
    write_file(&source, "face");
    write_file(&mask, "mask");
    fs::create_dir_all(staged.parent().expect("parent")).expect("mkdir");
    std::os::unix::fs::symlink(&source, &staged).expect("symlink");

    let pair = MaskPair {
        target: staged.clone(),
        mask,
        make_mask: false,
    };
    let outcome = deface(&RecordingDefacer::default(), &pair).expect("deface");

    assert_eq!(outcome, DefaceOutcome::Defaced);
    assert_eq!(fs::read_to_string(&source).expect("read"), "face");
    assert_eq!(fs::read_to_string(&staged).expect("read"), "masked(false):face");
    assert!(!fs::symlink_metadata(&staged).expect("meta").file_type().is_symlink());
    let leftovers: Vec<_> = fs::read_dir(staged.parent().expect("parent"))
        .expect("read dir")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".deface-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn missing_inputs_skip_the_pair() {
    let temp = tempfile::tempdir().expect("tempdir");
    let target = temp.path().join("T1w.nii.gz");
    let mask = temp.path().join("mask.nii.gz");
    let defacer = RecordingDefacer::default();

    let missing_target = MaskPair {
        target: target.clone(),
        mask: mask.clone(),
        make_mask: false,
    };
    assert_eq!(
        deface(&defacer, &missing_target).expect("skip"),
        DefaceOutcome::MissingTarget
    );

    write_file(&target, "face");
    assert_eq!(
        deface(&defacer, &missing_target).expect("skip"),
        DefaceOutcome::MissingMask
    );
    assert_eq!(fs::read_to_string(&target).expect("read"), "face");
    assert!(defacer.calls.lock().expect("lock").is_empty());
}

#[test]
fn transform_without_output_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let target = temp.path().join("T1w.nii.gz");
    let mask = temp.path().join("mask.nii.gz");
    write_file(&target, "face");
    write_file(&mask, "mask");
    let pair = MaskPair {
        target: target.clone(),
        mask,
        make_mask: true,
    };

    let err = deface(&SilentDefacer, &pair).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SnapshotError>(),
        Some(SnapshotError::DefaceFailed { volume }) if volume == &target
    ));
    assert_eq!(fs::read_to_string(&target).expect("read"), "face");
}

#[test]
fn deface_unit_propagates_the_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mask = temp.path().join("mask.nii.gz");
    write_file(&mask, "mask");
    let pairs: Vec<MaskPair> = ["a", "b"]
        .iter()
        .map(|name| {
            let target = temp.path().join(format!("{name}.nii.gz"));
            write_file(&target, name);
            MaskPair {
                target,
                mask: mask.clone(),
                make_mask: false,
            }
        })
        .collect();
    let pool = worker_pool(2).expect("pool");

    assert!(deface_unit(&pool, &SilentDefacer, &pairs).is_err());
    assert_eq!(
        deface_unit(&pool, &RecordingDefacer::default(), &pairs).expect("deface"),
        2
    );
}

#[test]
fn default_templates_cover_every_known_target() {
    let config = default_config();
    let key = UnitKey::new(10001, Session::V1);
    let site_root = Path::new("/scratch/NS_northshore");

    let pairs = mask_pairs_for_unit(site_root, "NS10001V1", &key, &config.mask_pairs);

    let shared = site_root.join(
        "fmriprep/NS10001V1/anat/fmriprep/sub-10001/ses-V1/anat/sub-10001_ses-V1_desc-brain_mask.nii.gz",
    );
    assert_eq!(pairs.len(), 1 + 3 * 2 + 5 + 2);
    assert_eq!(
        pairs[0].target,
        site_root.join("bids/NS10001V1/sub-10001/ses-V1/anat/sub-10001_ses-V1_T1w.nii.gz")
    );
    assert_eq!(pairs[0].mask, shared);
    let freesurfer: Vec<_> = pairs.iter().filter(|pair| pair.make_mask).collect();
    assert_eq!(freesurfer.len(), 5);
    assert!(freesurfer.iter().all(|pair| pair.mask == shared));
    assert!(pairs.iter().any(|pair| pair
        .target
        .ends_with("sub-10001/anat/sub-10001_space-MNI152NLin2009cAsym_desc-preproc_T1w.nii.gz")));
}

#[test]
fn branch_mask_falls_back_to_shared_mask() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = default_config();
    let key = UnitKey::new(10001, Session::V1);
    let shared = temp.path().join(
        "fmriprep/NS10001V1/anat/fmriprep/sub-10001/ses-V1/anat/sub-10001_ses-V1_desc-brain_mask.nii.gz",
    );
    write_file(&shared, "mask");

    let pairs = mask_pairs_for_unit(temp.path(), "NS10001V1", &key, &config.mask_pairs);

    let cuff = pairs
        .iter()
        .find(|pair| {
            pair.target
                .ends_with("ses-V1/anat/sub-10001_ses-V1_desc-preproc_T1w.nii.gz")
                && pair.target.to_string_lossy().contains("/cuff/")
        })
        .expect("cuff native pair");
    assert_eq!(cuff.mask, shared);
}
