//! CLI integration tests using assert_cmd.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn gradecalc() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("gradecalc").unwrap()
}

fn sample_ledger() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../ledgers/chem-101.toml")
}

/// Load the sample ledger into a fresh state file inside `dir`.
fn loaded_state(dir: &TempDir) -> PathBuf {
    let state = dir.path().join("state.json");
    gradecalc()
        .current_dir(dir.path())
        .arg("load")
        .arg("--ledger")
        .arg(sample_ledger())
        .arg("--state")
        .arg(&state)
        .assert()
        .success();
    state
}

fn recalc(dir: &TempDir, state: &Path) {
    gradecalc()
        .current_dir(dir.path())
        .arg("recalc")
        .arg("--state")
        .arg(state)
        .assert()
        .success();
}

#[test]
fn validate_sample_ledger() {
    gradecalc()
        .arg("validate")
        .arg("--ledger")
        .arg(sample_ledger())
        .assert()
        .success()
        .stdout(predicate::str::contains("Introductory Chemistry (11 tasks, 3 people)"))
        .stdout(predicate::str::contains("All ledgers valid"));
}

#[test]
fn validate_reports_warnings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(
        &path,
        r#"
[ledger]
slug = "broken"

[[categories]]
slug = "lab"

[[tasks]]
slug = "total"
category = "lab"
formula = { type = "wei", args = { weights = [["ghost", 1]] } }
"#,
    )
    .unwrap();

    gradecalc()
        .arg("validate")
        .arg("--ledger")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("[total] WARNING: formula refers to unknown task ghost"))
        .stdout(predicate::str::contains("1 warning(s) found"));
}

#[test]
fn validate_nonexistent_file() {
    gradecalc()
        .arg("validate")
        .arg("--ledger")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn load_reports_what_was_created() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state.json");

    gradecalc()
        .current_dir(dir.path())
        .arg("load")
        .arg("--ledger")
        .arg(sample_ledger())
        .arg("--state")
        .arg(&state)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Loaded chem-101: 11 tasks, 3 people, 33 scores (11 entered), 3 responses",
        ));
    assert!(state.exists());
}

#[test]
fn loading_the_same_ledger_twice_fails() {
    let dir = TempDir::new().unwrap();
    let state = loaded_state(&dir);

    gradecalc()
        .current_dir(dir.path())
        .arg("load")
        .arg("--ledger")
        .arg(sample_ledger())
        .arg("--state")
        .arg(&state)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn recalc_then_scores_shows_calculated_values() {
    let dir = TempDir::new().unwrap();
    let state = loaded_state(&dir);

    gradecalc()
        .current_dir(dir.path())
        .arg("changed")
        .arg("--state")
        .arg(&state)
        .assert()
        .success()
        .stdout("26\n");

    recalc(&dir, &state);

    gradecalc()
        .current_dir(dir.path())
        .arg("scores")
        .arg("--state")
        .arg(&state)
        .arg("--ledger")
        .arg("chem-101")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ada Lovelace"))
        .stdout(predicate::str::contains("82.25"))
        .stdout(predicate::str::contains("82.5"))
        .stdout(predicate::str::contains("NS"));

    gradecalc()
        .current_dir(dir.path())
        .arg("changed")
        .arg("--state")
        .arg(&state)
        .assert()
        .success()
        .stdout("0\n");
}

#[test]
fn pending_scores_render_with_calc_indicator() {
    let dir = TempDir::new().unwrap();
    let state = loaded_state(&dir);

    gradecalc()
        .current_dir(dir.path())
        .arg("scores")
        .arg("--state")
        .arg(&state)
        .arg("--ledger")
        .arg("chem-101")
        .assert()
        .success()
        .stdout(predicate::str::contains("#"));

    gradecalc()
        .current_dir(dir.path())
        .arg("changed")
        .arg("--state")
        .arg(&state)
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::contains("(forced)"))
        .stdout(predicate::str::contains("course"));
}

#[test]
fn recalc_json_report() {
    let dir = TempDir::new().unwrap();
    let state = loaded_state(&dir);

    let output = gradecalc()
        .current_dir(dir.path())
        .arg("recalc")
        .arg("--state")
        .arg(&state)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(report["calculated"].as_u64().unwrap() > 0);
    assert!(report["failures"].as_array().unwrap().is_empty());
    assert!(report["id"].is_string());
}

#[test]
fn set_value_and_recalculate() {
    let dir = TempDir::new().unwrap();
    let state = loaded_state(&dir);
    recalc(&dir, &state);

    gradecalc()
        .current_dir(dir.path())
        .arg("set")
        .arg("--state")
        .arg(&state)
        .arg("--ledger")
        .arg("chem-101")
        .arg("--task")
        .arg("lab1")
        .arg("--person")
        .arg("1001")
        .arg("--value")
        .arg("10")
        .arg("--recalc")
        .assert()
        .success()
        .stdout(predicate::str::contains("recalculated 1 (+3 downstream)"));

    gradecalc()
        .current_dir(dir.path())
        .arg("scores")
        .arg("--state")
        .arg(&state)
        .arg("--ledger")
        .arg("chem-101")
        .assert()
        .success()
        .stdout(predicate::str::contains("85.25"));
}

#[test]
fn set_without_recalc_leaves_scores_pending() {
    let dir = TempDir::new().unwrap();
    let state = loaded_state(&dir);
    recalc(&dir, &state);

    gradecalc()
        .current_dir(dir.path())
        .arg("set")
        .arg("--state")
        .arg(&state)
        .arg("--ledger")
        .arg("chem-101")
        .arg("--task")
        .arg("midterm")
        .arg("--person")
        .arg("Bo Diddley")
        .arg("--value")
        .arg("45")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 score(s) awaiting recalculation"));
}

#[test]
fn set_unknown_person_fails() {
    let dir = TempDir::new().unwrap();
    let state = loaded_state(&dir);

    gradecalc()
        .current_dir(dir.path())
        .arg("set")
        .arg("--state")
        .arg(&state)
        .arg("--ledger")
        .arg("chem-101")
        .arg("--task")
        .arg("lab1")
        .arg("--person")
        .arg("nobody")
        .arg("--value")
        .arg("1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no member of chem-101 matches 'nobody'"));
}

#[test]
fn requeue_flags_calculated_scores() {
    let dir = TempDir::new().unwrap();
    let state = loaded_state(&dir);
    recalc(&dir, &state);

    gradecalc()
        .current_dir(dir.path())
        .arg("requeue")
        .arg("--state")
        .arg(&state)
        .arg("--ledger")
        .arg("chem-101")
        .arg("--deps")
        .assert()
        .success()
        .stdout(predicate::str::contains("Requeued 14 score(s) in chem-101"));
}

#[test]
fn requeue_unknown_ledger_fails() {
    let dir = TempDir::new().unwrap();
    let state = loaded_state(&dir);

    gradecalc()
        .current_dir(dir.path())
        .arg("requeue")
        .arg("--state")
        .arg(&state)
        .arg("--ledger")
        .arg("bio-200")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ledger 'bio-200' not found"));
}

#[test]
fn formula_types_listing() {
    gradecalc()
        .arg("formulas")
        .arg("--types")
        .assert()
        .success()
        .stdout(predicate::str::contains("wei"))
        .stdout(predicate::str::contains("Weighted"))
        .stdout(predicate::str::contains("icli"));
}

#[test]
fn stored_formulas_listing() {
    let dir = TempDir::new().unwrap();
    let state = loaded_state(&dir);

    gradecalc()
        .current_dir(dir.path())
        .arg("formulas")
        .arg("--state")
        .arg(&state)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"src_category":"lab"}"#))
        .stdout(predicate::str::contains("dro"));
}

#[test]
fn recalc_missing_state_fails() {
    let dir = TempDir::new().unwrap();

    gradecalc()
        .current_dir(dir.path())
        .arg("recalc")
        .arg("--state")
        .arg("missing.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("state file not found"));
}

#[test]
fn recalc_missing_config_fails() {
    let dir = TempDir::new().unwrap();
    let state = loaded_state(&dir);

    gradecalc()
        .current_dir(dir.path())
        .arg("recalc")
        .arg("--state")
        .arg(&state)
        .arg("--config")
        .arg("nope.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    gradecalc()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created gradecalc.toml"))
        .stdout(predicate::str::contains("Created ledgers/example.toml"));

    assert!(dir.path().join("gradecalc.toml").exists());
    assert!(dir.path().join("ledgers/example.toml").exists());
    let config =
        gradecalc_core::config::load_config_from(Some(&dir.path().join("gradecalc.toml"))).unwrap();
    assert_eq!(config.calc_indicator, "#");
    assert_eq!(config.no_score_indicator, "NS");

    gradecalc()
        .current_dir(dir.path())
        .arg("validate")
        .arg("--ledger")
        .arg("ledgers/example.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("All ledgers valid"));
}

#[test]
fn init_skips_existing() {
    let dir = TempDir::new().unwrap();

    gradecalc()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    gradecalc()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn help_output() {
    gradecalc()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Gradebook formula and recalculation engine",
        ));
}

#[test]
fn version_output() {
    gradecalc()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("gradecalc"));
}
