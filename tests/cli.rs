use assert_cmd::prelude::*;
use predicates::str::contains;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn write_scene() -> NamedTempFile {
    let scene = r#"<scene>
  <settings>
    <ssaoSamples>16</ssaoSamples>
  </settings>
  <object>
    <name>Cube</name>
    <type>mesh</type>
    <mesh>cube</mesh>
  </object>
  <object>
    <name>Behind</name>
    <mesh>box</mesh>
    <position>0 0 50</position>
  </object>
  <object>
    <name>Lamp</name>
    <type>light</type>
    <position>0 5 0</position>
    <intensity>1.5</intensity>
  </object>
</scene>
"#;
    let mut tmp = NamedTempFile::new().expect("temp scene");
    tmp.write_all(scene.as_bytes()).expect("write scene");
    tmp
}

#[test]
fn summary_reports_culling_and_shadow_plan() {
    let scene = write_scene();
    let mut cmd = Command::cargo_bin("deferred-pipeline").expect("binary exists");
    cmd.arg(scene.path()).arg("--summary-only");
    cmd.assert()
        .success()
        .stdout(contains("Loaded scene with 3 objects (1 lights)"))
        .stdout(contains("Scene summary:"))
        .stdout(contains(" - nodes: 2"))
        .stdout(contains(" - visible draws: 1"))
        .stdout(contains(" - culled draws: 1"))
        .stdout(contains(" - shadow casters: 1"))
        .stdout(contains(" - ssao kernel: 16 samples"));
}

#[test]
fn demo_scene_summary_without_a_file() {
    let mut cmd = Command::cargo_bin("deferred-pipeline").expect("binary exists");
    cmd.arg("--summary-only").arg("--ssao-samples").arg("8");
    cmd.assert()
        .success()
        .stdout(contains("Loaded scene with 4 objects (1 lights)"))
        .stdout(contains(" - visible draws: 2"))
        .stdout(contains(" - ssao kernel: 8 samples"));
}

#[test]
fn rejects_unknown_flags() {
    let mut cmd = Command::cargo_bin("deferred-pipeline").expect("binary exists");
    cmd.arg("--bogus");
    cmd.assert().failure().stderr(contains("Unknown argument: --bogus"));
}

#[test]
fn rejects_invalid_settings() {
    let mut cmd = Command::cargo_bin("deferred-pipeline").expect("binary exists");
    cmd.arg("--summary-only").arg("--ssao-samples").arg("300");
    cmd.assert().failure().stderr(contains("invalid pipeline settings"));
}

#[test]
fn missing_scene_file_fails() {
    let mut cmd = Command::cargo_bin("deferred-pipeline").expect("binary exists");
    cmd.arg("/nonexistent/scene.xml").arg("--summary-only");
    cmd.assert().failure().stderr(contains("failed to read scene"));
}
