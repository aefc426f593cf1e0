//! Integration tests for the fwgen binary.
//!
//! These tests invoke the compiled binary as a subprocess against schemas
//! written to temporary directories.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

const SCHEMA: &str = r#"<binary size="64">
  <settings>
    <number name="version" size="1" value="1" duplicates='["/layout/header/version"]'/>
  </settings>
  <layout>
    <group name="header">
      <number name="magic" size="2" value="0x55AA" order="big"/>
      <number name="version" size="1"/>
      <number name="length" size="2" calculate="/layout/body.size"/>
    </group>
    <file name="body" path="body.bin"/>
    <crc name="crc" algorithm="crc32" input="[0:/layout/crc.offset]"/>
  </layout>
</binary>
"#;

fn fwgen(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fwgen"))
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to execute fwgen")
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("image.xml"), SCHEMA).unwrap();
    fs::write(dir.path().join("body.bin"), b"hello").unwrap();
    dir
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "fwgen failed (exit={:?}):\nstdout:\n{}\nstderr:\n{}",
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn build_writes_image_and_maps() {
    let dir = project();
    let output = fwgen(
        dir.path(),
        &[
            "build", "-s", "image.xml", "-o", "image.bin", "--set", "settings/version=4",
            "--map", "map.json", "--info", "info.json",
        ],
    );
    assert_success(&output);

    let image = fs::read(dir.path().join("image.bin")).unwrap();
    assert_eq!(image.len(), 5 + 5 + 4);
    assert_eq!(&image[..5], &[0x55, 0xAA, 4, 5, 0]);
    assert_eq!(&image[5..10], b"hello");
    let crc = crc32fast::hash(&image[..10]);
    assert_eq!(&image[10..], &crc.to_le_bytes());

    let map: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("map.json")).unwrap()).unwrap();
    let crc_entry = &map["children"][0]["children"][2];
    assert_eq!(crc_entry["path"], "/layout/crc");
    assert_eq!(crc_entry["offset"], 10);
    assert!(crc_entry.get("value").is_none());

    let info: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("info.json")).unwrap()).unwrap();
    assert_eq!(info["children"][0]["children"][1]["value"], hex::encode(b"hello"));
}

#[test]
fn schema_defaults_apply_without_overrides() {
    let dir = project();
    let output = fwgen(dir.path(), &["build", "-s", "image.xml", "-o", "image.bin"]);
    assert_success(&output);
    let image = fs::read(dir.path().join("image.bin")).unwrap();
    assert_eq!(&image[..5], &[0x55, 0xAA, 1, 5, 0]);
}

#[test]
fn project_file_supplies_overrides() {
    let dir = project();
    fs::write(
        dir.path().join("fwgen.toml"),
        "[settings]\noverrides = [\"settings/version=9\"]\n",
    )
    .unwrap();
    let output = fwgen(dir.path(), &["-q", "build", "-s", "image.xml", "-o", "out.bin"]);
    assert_success(&output);
    assert!(output.stdout.is_empty());
    assert_eq!(fs::read(dir.path().join("out.bin")).unwrap()[2], 9);
}

#[test]
fn check_lists_placements() {
    let dir = project();
    let output = fwgen(dir.path(), &["check", "-s", "image.xml"]);
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("/layout/header/length"), "{stdout}");
    assert!(stdout.contains("14 bytes"), "{stdout}");
    assert!(!dir.path().join("image.bin").exists());
}

#[test]
fn failures_exit_nonzero_without_output() {
    let dir = project();
    let output = fwgen(
        dir.path(),
        &["build", "-s", "image.xml", "-o", "image.bin", "--set", "settings/version=0x100"],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/settings/version: value error"), "{stderr}");
    assert!(!dir.path().join("image.bin").exists());
}

#[test]
fn offline_flags_must_come_together() {
    let dir = project();
    let output = fwgen(
        dir.path(),
        &["build", "-s", "image.xml", "-o", "image.bin", "--offline-dir", "store"],
    );
    assert!(!output.status.success());
}
