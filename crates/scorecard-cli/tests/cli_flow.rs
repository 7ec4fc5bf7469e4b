use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CORPUS: &str = r#"
metrics:
  - { name: Truthfulness }
  - { name: Entities }
prompts:
  - { name: capital_fr, user_prompt: "Capital of France?" }
  - { name: crops, user_prompt: "Tag the crops." }
responses:
  - { name: paris, text: "Paris" }
  - { name: untagged, text: "no pairs here" }
testcases:
  - { name: tc_fr, prompt: capital_fr, strategy: truthfulness_external, response: paris }
  - { name: tc_ner, prompt: crops, strategy: entity_recognition, response: untagged }
runs:
  - name: nightly
    details:
      - testcase: tc_fr
        metric: Truthfulness
        conversation: { prompt_text: "Capital of France?", agent_response: "Answer: Paris." }
  - name: broken
    details:
      - testcase: tc_ner
        metric: Entities
        conversation: { prompt_text: "Tag the crops.", agent_response: "(wheat, CROP)" }
  - name: pending
    status: RUNNING
    details:
      - testcase: tc_fr
        metric: Truthfulness
        conversation: { prompt_text: "q", agent_response: "Paris" }
"#;

fn scorecard() -> Command {
    Command::cargo_bin("scorecard").unwrap()
}

fn imported_db(dir: &TempDir) -> std::path::PathBuf {
    let corpus = dir.path().join("corpus.yaml");
    fs::write(&corpus, CORPUS).unwrap();
    let db = dir.path().join("data/scorecard.db");
    scorecard()
        .arg("import")
        .arg("--db")
        .arg(&db)
        .arg("--corpus")
        .arg(&corpus)
        .assert()
        .success()
        .stderr(contains("imported 2 testcases, 3 runs"));
    db
}

fn analyze(db: &Path, run: &str) -> Command {
    let mut cmd = scorecard();
    cmd.arg("analyze").arg("--db").arg(db).arg("--run").arg(run);
    cmd
}

#[test]
fn version_and_strategy_listing() {
    scorecard()
        .arg("version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));

    scorecard()
        .arg("strategies")
        .assert()
        .success()
        .stdout(contains("truthfulness_external"))
        .stdout(contains("uptime"));
}

#[test]
fn import_then_analyze_writes_summary_and_json() {
    let dir = TempDir::new().unwrap();
    let db = imported_db(&dir);
    let out = dir.path().join("report.json");

    analyze(&db, "nightly")
        .arg("--json")
        .arg(&out)
        .assert()
        .success()
        .stderr(contains("Truthfulness"));

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(report["schema_version"], 1);
    assert_eq!(report["run"]["name"], "nightly");
    assert_eq!(report["summaries"]["Truthfulness"]["mean_score"], 1.0);
}

#[test]
fn strict_mode_fails_on_item_errors_only() {
    let dir = TempDir::new().unwrap();
    let db = imported_db(&dir);

    analyze(&db, "broken")
        .assert()
        .success()
        .stderr(contains("invalid input"));

    analyze(&db, "broken").arg("--strict").assert().code(1);
    analyze(&db, "nightly").arg("--strict").assert().code(0);
}

#[test]
fn preconditions_and_bad_flags_exit_with_config_error() {
    let dir = TempDir::new().unwrap();
    let db = imported_db(&dir);

    analyze(&db, "nope")
        .assert()
        .code(2)
        .stderr(contains("E_RUN_NOT_FOUND"));

    analyze(&db, "pending")
        .assert()
        .code(2)
        .stderr(contains("E_RUN_NOT_COMPLETED"));

    analyze(&db, "nightly")
        .arg("--backend")
        .arg("bogus")
        .assert()
        .code(2)
        .stderr(contains("unknown backend 'bogus'"));
}

#[test]
fn strict_config_rejects_unknown_keys() {
    let dir = TempDir::new().unwrap();
    let db = imported_db(&dir);
    let cfg = dir.path().join("scorecard.yaml");
    fs::write(&cfg, "version: 1\nsettings:\n  paralel: 2\n").unwrap();

    analyze(&db, "nightly")
        .arg("--config")
        .arg(&cfg)
        .assert()
        .success();

    analyze(&db, "nightly")
        .arg("--config")
        .arg(&cfg)
        .arg("--strict")
        .assert()
        .code(2)
        .stderr(contains("settings.paralel"));
}

#[test]
fn init_writes_a_sample_config_once() {
    let dir = TempDir::new().unwrap();
    let cfg = dir.path().join("conf/scorecard.yaml");

    scorecard()
        .arg("init")
        .arg("--config")
        .arg(&cfg)
        .assert()
        .success()
        .stderr(contains("created"));
    assert!(fs::read_to_string(&cfg).unwrap().contains("provider: fake"));

    scorecard()
        .arg("init")
        .arg("--config")
        .arg(&cfg)
        .assert()
        .success()
        .stderr(contains("already exists"));
}
