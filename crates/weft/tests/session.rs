//! Session wiring from configuration.

mod common;

use std::sync::Arc;

use common::{catalog, diamond};
use weft::tracker::ScriptedBackend;
use weft::{RunPhase, Session, WeftConfig};

fn config(dir: &tempfile::TempDir) -> WeftConfig {
    WeftConfig::from_toml(&format!(
        r#"
[planner]
execution_site = "condorpool"
stage_out = false

[tracker]
poll_interval_ms = 5
backend_backoff_ms = 1
runs_dir = "{}"
"#,
        dir.path().display()
    ))
    .unwrap()
}

#[tokio::test]
async fn test_session_runs_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::new());
    let session = Session::new(catalog("f.a"), backend.clone(), &config(&dir));

    let handle = session.run(&diamond(&["-o", "f.d"])).await.unwrap();
    let state = session.wait(&handle).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Succeeded);

    // stage-out disabled by configuration
    assert!(state.task("stage_out_analyze").is_none());
    assert_eq!(backend.submissions().len(), 6);
    assert!(session.analyze(&handle).unwrap().is_empty());
}

#[tokio::test]
async fn test_replan_reruns_changed_job_only() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::new());
    let session = Session::new(catalog("f.a"), backend.clone(), &config(&dir));

    let handle = session.run(&diamond(&["-o", "f.d"])).await.unwrap();
    session.wait(&handle).await.unwrap();

    let resubmission = session
        .replan(&handle, &diamond(&["-v", "-o", "f.d"]))
        .await
        .unwrap();
    assert_eq!(resubmission.tasks, vec!["analyze"]);

    let state = session.wait(&resubmission.handle).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Succeeded);
    assert_eq!(backend.submission_count("analyze"), 2);
    assert_eq!(backend.submission_count("findrange_1"), 1);
}

#[test]
fn test_planning_error_converts() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new(
        catalog("f-problem.a"),
        Arc::new(ScriptedBackend::new()),
        &config(&dir),
    );
    let err = session.plan(&diamond(&[])).unwrap_err();
    assert!(matches!(err, weft::Error::Planning(_)));
    assert!(err.to_string().contains("f.a"));
}
