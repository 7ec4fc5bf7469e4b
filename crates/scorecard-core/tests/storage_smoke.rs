use scorecard_core::model::{DetailStatus, RunStatus};
use scorecard_core::storage::import::Corpus;
use scorecard_core::storage::store::{NewTestCase, Store};
use scorecard_core::storage::RecordSource;
use tempfile::tempdir;

#[test]
fn test_storage_smoke_lifecycle() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("scorecard.db");

    let store = Store::open(&db_path)?;
    store.init_schema()?;

    let prompt = store.insert_prompt("greet", None, "Say hi")?;
    let expected = store.insert_expected_response("greet_answer", "hi")?;
    store.insert_testcase(&NewTestCase {
        name: "tc_greet",
        prompt_id: prompt,
        strategy_name: "exact_match",
        expected_response_id: Some(expected),
        ..Default::default()
    })?;

    let run = store.create_run("smoke", None)?;
    store.transition_run(run, RunStatus::Running)?;
    let conv = store.insert_conversation("Say hi", "Answer: hi.")?;
    store.insert_run_detail(run, "tc_greet", Some(conv), "Truthfulness", DetailStatus::Completed)?;
    store.transition_run(run, RunStatus::Completed)?;
    drop(store);

    // Reopen: everything must have reached disk.
    let store = Store::open(&db_path)?;
    store.init_schema()?;
    let r = store.run_by_name("smoke")?.expect("run persisted");
    assert_eq!(r.status, RunStatus::Completed);

    let details = store.run_details(r.id)?;
    assert_eq!(details.len(), 1);
    let c = store.conversation(details[0].conversation_id.unwrap())?.unwrap();
    assert_eq!(c.agent_response, "Answer: hi.");

    let tc = store.testcase("tc_greet")?.unwrap();
    let exp = store.expected_response(tc.expected_response_id.unwrap())?.unwrap();
    assert_eq!(exp.text, "hi");

    let stats = store.stats_best_effort();
    assert_eq!(stats.runs, Some(1));
    assert_eq!(stats.run_details, Some(1));
    assert_eq!(stats.summaries, Some(0));
    Ok(())
}

#[test]
fn test_corpus_file_import() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let corpus_path = dir.path().join("corpus.json");
    std::fs::write(
        &corpus_path,
        r#"{
  "targets": [{"name": "support-bot", "endpoint": "http://localhost:9000/chat"}],
  "prompts": [{"name": "p", "system_prompt": "be terse", "user_prompt": "2+2?"}],
  "judge_prompts": [{"name": "rubric", "text": "Rate 0-10."}],
  "testcases": [{"name": "t", "prompt": "p", "strategy": "llm_judge", "judge_prompt": "rubric"}],
  "runs": [{"name": "r1", "target": "support-bot", "status": "RUNNING", "details": []}]
}"#,
    )?;

    let store = Store::memory()?;
    store.init_schema()?;
    let stats = store.import_corpus(&Corpus::load(&corpus_path)?)?;
    assert_eq!(stats.testcases, 1);

    let run = store.run_by_name("r1")?.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert!(run.start_ts.is_some());
    assert!(run.end_ts.is_none());
    assert_eq!(run.target_id, store.target_id("support-bot")?);

    let tc = store.testcase("t")?.unwrap();
    let judge = store.judge_prompt(tc.judge_prompt_id.unwrap())?.unwrap();
    assert_eq!(judge.text, "Rate 0-10.");
    let prompt = store.prompt(tc.prompt_id)?.unwrap();
    assert_eq!(prompt.system_prompt.as_deref(), Some("be terse"));
    Ok(())
}
