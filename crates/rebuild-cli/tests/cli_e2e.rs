//! End-to-end runs of the `rebuild` binary for the archive subcommands.

use std::path::Path;

use assert_cmd::Command;
use predicates::str::contains;
use rebuild_archive::{ZipArchive, ZipEntry};
use tempfile::tempdir;

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut archive = ZipArchive {
        entries: entries
            .iter()
            .map(|(name, body)| {
                let mut e = ZipEntry::new(*name, body.to_vec());
                e.set_modified(1_700_000_000);
                e
            })
            .collect(),
        comment: String::new(),
    };
    std::fs::write(path, archive.write().expect("build zip")).expect("write zip");
}

fn rebuild() -> Command {
    Command::cargo_bin("rebuild").expect("binary built")
}

#[test]
fn stabilize_is_idempotent_through_the_cli() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.zip");
    let once = dir.path().join("once.zip");
    let twice = dir.path().join("twice.zip");
    write_zip(&input, &[("zeta", b"z"), ("alpha", b"a")]);

    rebuild()
        .args(["stabilize", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&once)
        .assert()
        .success();
    rebuild()
        .args(["stabilize", "--input"])
        .arg(&once)
        .arg("--output")
        .arg(&twice)
        .assert()
        .success();

    let a = std::fs::read(&once).unwrap();
    let b = std::fs::read(&twice).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, std::fs::read(&input).unwrap());
}

#[test]
fn diff_reports_match_for_reordered_inputs() {
    let dir = tempdir().unwrap();
    let left_raw = dir.path().join("left.zip");
    let right_raw = dir.path().join("right.zip");
    let left = dir.path().join("left.stable.zip");
    let right = dir.path().join("right.stable.zip");
    write_zip(&left_raw, &[("a", b"same"), ("b", b"same")]);
    write_zip(&right_raw, &[("b", b"same"), ("a", b"same")]);

    for (input, output) in [(&left_raw, &left), (&right_raw, &right)] {
        rebuild()
            .args(["stabilize", "--input"])
            .arg(input)
            .arg("--output")
            .arg(output)
            .assert()
            .success();
    }

    rebuild()
        .arg("diff")
        .arg(&left)
        .arg(&right)
        .assert()
        .success()
        .stdout(contains("archives match"));
}

#[test]
fn diff_lists_changed_and_one_sided_files() {
    let dir = tempdir().unwrap();
    let left = dir.path().join("left.zip");
    let right = dir.path().join("right.zip");
    write_zip(&left, &[("both.txt", b"one"), ("left-only.txt", b"x")]);
    write_zip(&right, &[("both.txt", b"two"), ("right-only.txt", b"y")]);

    rebuild()
        .arg("diff")
        .arg(&left)
        .arg(&right)
        .assert()
        .failure()
        .stdout(contains("~ both.txt"))
        .stdout(contains("- left-only.txt"))
        .stdout(contains("+ right-only.txt"));
}

#[test]
fn custom_exclusions_drop_entries() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.zip");
    let output = dir.path().join("out.zip");
    let rules = dir.path().join("rules.json");
    write_zip(&input, &[("keep.txt", b"k"), ("META-INF/maven/pom.xml", b"m")]);
    std::fs::write(
        &rules,
        r#"[{"reason":"maven metadata is rebuilt on publish",
            "excludePath":{"paths":["META-INF/maven/**"]}}]"#,
    )
    .unwrap();

    rebuild()
        .args(["stabilize", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .arg("--custom-stabilizers")
        .arg(&rules)
        .assert()
        .success();

    let archive = ZipArchive::parse(&std::fs::read(&output).unwrap()).unwrap();
    let names: Vec<&str> = archive.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["keep.txt"]);
}

#[test]
fn disabled_passes_are_skipped() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.zip");
    let output = dir.path().join("out.zip");
    write_zip(&input, &[("b", b"2"), ("a", b"1")]);

    // Disabling the sort pass leaves the original order in place.
    rebuild()
        .args(["stabilize", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .args(["--disable-passes", "zip-file-order"])
        .assert()
        .success();

    let archive = ZipArchive::parse(&std::fs::read(&output).unwrap()).unwrap();
    let names: Vec<&str> = archive.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["b", "a"]);
}
