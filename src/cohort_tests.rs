use super::*;
use crate::materialize::{worker_pool, LinkMode};

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent directory");
    }
    fs::write(path, contents.as_bytes()).expect("write file");
}

fn roster(ids: &[u32]) -> Roster {
    ids.iter().copied().collect()
}

#[test]
fn roster_loads_record_ids_and_skips_nulls() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("roster.csv");
    write_file(&path, "guid,record_id\nA,10001\nB,NA\nC,10003.0\n");

    let loaded = Roster::load(&path).expect("load");

    assert_eq!(loaded, roster(&[10001, 10003]));
}

#[test]
fn filter_rows_keeps_admitted_baseline_rows() {
    let text = "sub\tses\tvolume\n10001\tV1\t1\n10001\tV3\t2\n20002\tV1\t3\nsub-10003\tses-V1\t4\n";
    let table = Table::parse(text, '\t').expect("parse");

    let filtered = filter_rows(table, "sub", Some("ses"), &roster(&[10001, 10003])).expect("filter");

    let volumes: Vec<_> = filtered
        .rows
        .iter()
        .map(|row| row[2].clone().expect("volume"))
        .collect();
    assert_eq!(volumes, vec!["1", "4"]);
}

#[test]
fn filter_rows_without_session_column_only_checks_roster() {
    let table = Table::parse("record_id,age\n1,40\n2,50\n", ',').expect("parse");
    let filtered = filter_rows(table, "record_id", None, &roster(&[2])).expect("filter");
    assert_eq!(filtered.len(), 1);
}

#[test]
fn filter_rows_with_empty_roster_keeps_header() {
    let table = Table::parse("sub\tses\n10001\tV1\n", '\t').expect("parse");
    let filtered = filter_rows(table, "sub", Some("ses"), &Roster::default()).expect("filter");
    assert!(filtered.is_empty());
    assert_eq!(filtered.to_tsv(), "sub\tses\n");
}

#[test]
fn follow_up_only_needs_exactly_one_follow_up_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let only_v3 = temp.path().join("sub-10003");
    fs::create_dir_all(only_v3.join("ses-V3")).expect("mkdir");
    fs::create_dir_all(only_v3.join("figures")).expect("mkdir");
    let both = temp.path().join("sub-10004");
    fs::create_dir_all(both.join("ses-V1")).expect("mkdir");
    fs::create_dir_all(both.join("ses-V3")).expect("mkdir");

    assert!(follow_up_only(&only_v3));
    assert!(!follow_up_only(&both));
    assert!(!follow_up_only(&temp.path().join("missing")));
}

#[test]
fn excluded_subjects_covers_roster_misses_and_follow_up_only() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tree = temp.path().join("fmriprep");
    fs::create_dir_all(tree.join("sub-10001/ses-V1")).expect("mkdir");
    fs::create_dir_all(tree.join("sub-10002/ses-V1")).expect("mkdir");
    fs::create_dir_all(tree.join("sub-10003/ses-V3")).expect("mkdir");
    fs::create_dir_all(tree.join("sub-10004/ses-V1")).expect("mkdir");
    fs::create_dir_all(tree.join("sub-10004/ses-V3")).expect("mkdir");

    let excluded =
        excluded_subjects(&tree, "sub-*", &roster(&[10001, 10003, 10004])).expect("exclusions");

    assert_eq!(excluded.into_iter().collect::<Vec<_>>(), vec![10002, 10003]);
}

#[test]
fn filter_copy_leaves_out_excluded_subjects_and_follow_up_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tree = temp.path().join("input/fmriprep");
    let dest = temp.path().join("release/derivatives/fmriprep");
    write_file(&tree.join("sub-10001/ses-V1/anat/T1w.nii.gz"), "keep");
    write_file(&tree.join("sub-10001/ses-V3/anat/T1w.nii.gz"), "follow-up");
    write_file(&tree.join("sub-10001.html"), "report");
    write_file(&tree.join("sub-10002/ses-V1/anat/T1w.nii.gz"), "excluded");
    write_file(&tree.join("sub-10002.html"), "excluded report");
    write_file(&tree.join("dataset_description.json"), "{}");

    let excluded = excluded_subjects(&tree, "sub-*", &roster(&[10001])).expect("exclusions");
    let patterns = exclusion_patterns(&excluded);
    let materializer = Materializer::new(LinkMode::Hardlink, worker_pool(2).expect("pool"));
    filter_copy(&tree, &dest, &patterns, &materializer).expect("filter copy");

    assert!(dest.join("sub-10001/ses-V1/anat/T1w.nii.gz").is_file());
    assert!(dest.join("sub-10001.html").is_file());
    assert!(dest.join("dataset_description.json").is_file());
    assert!(!dest.join("sub-10001/ses-V3").exists());
    assert!(!dest.join("sub-10002").exists());
    assert!(!dest.join("sub-10002.html").exists());
}

#[test]
fn located_path_without_subject_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join("sub-abc")).expect("mkdir");
    let err = excluded_subjects(temp.path(), "sub-*", &roster(&[1])).unwrap_err();
    assert!(err.to_string().contains("no subject entity"));
}
