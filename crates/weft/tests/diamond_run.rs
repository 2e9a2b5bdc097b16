//! The diamond workflow, end to end: plan, run, fail, analyze, fix, restart.

mod common;

use std::sync::Arc;

use common::{LIMIT, catalog, diamond, tracker_config};
use weft::planner::{PlanViolation, TaskKind};
use weft::tracker::{FailureKind, Outcome, ScriptedBackend};
use weft::{Planner, RunPhase, TaskStatus, Tracker};

const ANALYZE_ARGS: &[&str] = &["-a", "analyze", "-T", "60", "-i", "f.c1", "f.c2", "-o", "f.d"];

#[tokio::test]
async fn test_diamond_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::new());
    let tracker = Tracker::new(backend.clone(), tracker_config(&dir));

    let plan = Planner::new(catalog("f.a"))
        .plan(&diamond(ANALYZE_ARGS))
        .unwrap();
    assert_eq!(plan.tasks_of_kind(TaskKind::ContainerPull).count(), 1);

    let handle = tracker.submit(plan).await.unwrap();
    let state = tracker.wait(&handle, LIMIT).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Succeeded);
    assert_eq!(state.summary().succeeded, 7);

    // the image is pulled once for all four compute tasks
    assert_eq!(backend.submission_count("pull_centos-base"), 1);
    assert_eq!(backend.submissions().len(), 7);

    let analyze = state.task("analyze").unwrap();
    for parent in ["findrange_1", "findrange_2"] {
        let finished = state.task(parent).unwrap().finished_at.unwrap();
        assert!(analyze.submitted_at.unwrap() >= finished);
    }
    let submissions = backend.submissions();
    assert_eq!(submissions.last().map(String::as_str), Some("stage_out_analyze"));
}

#[tokio::test]
async fn test_plans_are_byte_identical() {
    let first = Planner::new(catalog("f.a"))
        .plan(&diamond(ANALYZE_ARGS))
        .unwrap();
    let second = Planner::new(catalog("f.a"))
        .plan(&diamond(ANALYZE_ARGS))
        .unwrap();
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
}

#[test]
fn test_misnamed_input_is_reported_before_running() {
    let err = Planner::new(catalog("f-problem.a"))
        .plan(&diamond(ANALYZE_ARGS))
        .unwrap_err();

    assert_eq!(err.unresolved_inputs(), vec!["f.a"]);
    assert_eq!(err.violations.len(), 1);
    assert!(matches!(
        &err.violations[0],
        PlanViolation::UnresolvedInput { job, .. } if job == "preprocess"
    ));

    // fixing the catalog is enough
    assert!(Planner::new(catalog("f.a")).plan(&diamond(ANALYZE_ARGS)).is_ok());
}

#[tokio::test]
async fn test_runtime_missing_input_then_restart() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::new().with_outcome(
        "stage_in_preprocess",
        Outcome::MissingInput {
            file: "f.a".to_string(),
            searched_sites: vec!["local".to_string()],
        },
    ));
    let tracker = Tracker::new(backend.clone(), tracker_config(&dir));
    let plan = Planner::new(catalog("f.a"))
        .plan(&diamond(ANALYZE_ARGS))
        .unwrap();

    let handle = tracker.submit(plan).await.unwrap();
    let state = tracker.wait(&handle, LIMIT).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Failed);
    assert_eq!(state.status("pull_centos-base"), Some(TaskStatus::Succeeded));
    assert_eq!(state.status("preprocess"), Some(TaskStatus::Pending));
    assert_eq!(state.blocked_tasks().len(), 5);

    let diagnostics = tracker.analyze(&handle).unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, FailureKind::MissingInput);
    assert_eq!(diagnostics[0].job_id.as_deref(), Some("preprocess"));
    assert!(diagnostics[0].message.contains("'f.a'"));
    assert!(diagnostics[0].message.contains("local"));

    backend.set_outcome("stage_in_preprocess", Outcome::Succeed);
    let resubmission = tracker.restart(&handle).await.unwrap();
    assert_eq!(
        resubmission.tasks,
        vec![
            "stage_in_preprocess",
            "preprocess",
            "findrange_1",
            "findrange_2",
            "analyze",
            "stage_out_analyze",
        ]
    );

    let state = tracker.wait(&resubmission.handle, LIMIT).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Succeeded);
    assert_eq!(backend.submission_count("pull_centos-base"), 1);
    assert_eq!(backend.submission_count("stage_in_preprocess"), 2);
    assert_eq!(backend.submission_count("preprocess"), 1);

    // a second restart has nothing left to do
    let again = tracker.restart(&resubmission.handle).await.unwrap();
    assert!(again.tasks.is_empty());
    assert_eq!(again.handle, resubmission.handle);
}

#[tokio::test]
async fn test_nonzero_exit_is_explained() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::new().with_outcome(
        "findrange_2",
        Outcome::Exit {
            code: 2,
            stderr_tail: Some("findrange: range is empty".to_string()),
        },
    ));
    let tracker = Tracker::new(backend.clone(), tracker_config(&dir));
    let plan = Planner::new(catalog("f.a"))
        .plan(&diamond(ANALYZE_ARGS))
        .unwrap();

    let handle = tracker.submit(plan).await.unwrap();
    let state = tracker.wait(&handle, LIMIT).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Failed);
    // the sibling is unaffected
    assert_eq!(state.status("findrange_1"), Some(TaskStatus::Succeeded));

    let diagnostics = tracker.analyze(&handle).unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].exit_code, Some(2));
    assert!(diagnostics[0].message.contains("range is empty"));
    assert_eq!(
        diagnostics[0].blocked_dependents,
        vec!["analyze", "stage_out_analyze"]
    );
}

#[tokio::test]
async fn test_attach_after_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::new().with_outcome("findrange_1", Outcome::Hang));
    let plan = Planner::new(catalog("f.a"))
        .plan(&diamond(ANALYZE_ARGS))
        .unwrap();

    let first = Tracker::new(backend.clone(), tracker_config(&dir));
    let handle = first.submit(plan).await.unwrap();
    while first.poll(&handle).unwrap().status("findrange_1") != Some(TaskStatus::Running) {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    first.shutdown().await;
    drop(first);

    backend.complete("findrange_1", Outcome::Succeed);

    let second = Tracker::new(backend.clone(), tracker_config(&dir));
    let attached = second.attach(&handle.run_id).await.unwrap();
    let state = second.wait(&attached, LIMIT).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Succeeded);
    assert_eq!(backend.submission_count("findrange_1"), 1);
    assert_eq!(backend.submission_count("preprocess"), 1);
}
