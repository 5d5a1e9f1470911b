//! Integration tests for orchestrator edge cases.
//!
//! These tests verify:
//! - Idempotent and early deletes
//! - Driver failures (unreachable regions, transient poll errors)
//! - Monitor deadlines, wait timeouts and aborts
//! - NOT_FOUND handling during deletion

use std::sync::Arc;
use std::time::Duration;
use stratus_core::{
    ChildDeclaration, InMemoryDriver, MultiRegionOrchestrator, OrchestratorConfig, RegionId,
    RemoteStackDriver, SimulationConfig, StackStatus, StratusError,
};
use tokio::time::Instant;

fn region_one() -> RegionId {
    RegionId::new("RegionOne")
}

fn region_two() -> RegionId {
    RegionId::new("RegionTwo")
}

fn driver_with(simulation: SimulationConfig) -> Arc<InMemoryDriver> {
    Arc::new(InMemoryDriver::new(["RegionOne", "RegionTwo"], simulation))
}

fn driver() -> Arc<InMemoryDriver> {
    driver_with(SimulationConfig::default())
}

/// Simulation in which creations never finish.
fn stuck() -> SimulationConfig {
    SimulationConfig { create_polls: u32::MAX, ..SimulationConfig::default() }
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig::default().with_poll_interval(Duration::from_secs(1))
}

fn children() -> Vec<ChildDeclaration> {
    vec![
        ChildDeclaration::new("stack_one", "RegionOne").with_parameter("value", "test1"),
        ChildDeclaration::new("stack_two", "RegionTwo").with_parameter("value", "test2"),
    ]
}

fn orchestrator(driver: Arc<InMemoryDriver>, config: OrchestratorConfig) -> MultiRegionOrchestrator {
    MultiRegionOrchestrator::new("multi_region", driver, config).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_delete_all_twice_is_idempotent() {
    let driver = driver();
    let orchestrator = orchestrator(driver.clone(), config());
    orchestrator.create_all(children()).await.unwrap();
    orchestrator.wait_for_create(None).await.unwrap();

    orchestrator.delete_all().await.unwrap();
    orchestrator.delete_all().await.unwrap();
    assert_eq!(orchestrator.wait_for_delete(None).await.unwrap(), StackStatus::DeleteComplete);
    assert_eq!(driver.delete_calls(), 2);

    // Everything is gone: nothing left to do
    orchestrator.delete_all().await.unwrap();
    assert_eq!(orchestrator.wait_for_delete(None).await.unwrap(), StackStatus::DeleteComplete);
    assert_eq!(driver.delete_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_delete_before_create() {
    let driver = driver();
    let orchestrator = orchestrator(driver.clone(), config());

    orchestrator.delete_all().await.unwrap();
    assert_eq!(orchestrator.wait_for_delete(None).await.unwrap(), StackStatus::DeleteComplete);
    assert_eq!(driver.delete_calls(), 0);

    let err = orchestrator.create_all(children()).await.unwrap_err();
    assert!(matches!(err, StratusError::AlreadyCreated { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_delete_while_creating_finds_every_stack() {
    let driver = driver();
    let orchestrator = orchestrator(driver.clone(), config());
    orchestrator.create_all(children()).await.unwrap();

    orchestrator.delete_all().await.unwrap();
    assert_eq!(orchestrator.wait_for_delete(None).await.unwrap(), StackStatus::DeleteComplete);

    assert_eq!(driver.create_calls(), 2);
    assert_eq!(driver.delete_calls(), 2);
    for child in orchestrator.children() {
        assert!(child.remote_id.is_some());
        assert!(child.status.is_gone());
    }
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_region_fails_create() {
    let driver = driver();
    driver.set_unreachable(&region_two(), true).await;

    let orchestrator = orchestrator(driver.clone(), config());
    orchestrator.create_all(children()).await.unwrap();
    assert_eq!(orchestrator.wait_for_create(None).await.unwrap(), StackStatus::CreateFailed);

    let child = orchestrator.child("stack_two").unwrap();
    assert_eq!(child.status, StackStatus::CreateFailed);
    assert!(child.remote_id.is_none());
    assert!(child.error_detail.unwrap().contains("endpoint unreachable"));

    // Never created, so only stack_one needs a delete call
    driver.set_unreachable(&region_two(), false).await;
    orchestrator.delete_all().await.unwrap();
    assert_eq!(orchestrator.wait_for_delete(None).await.unwrap(), StackStatus::DeleteComplete);
    assert_eq!(driver.delete_calls(), 1);
    assert_eq!(orchestrator.child("stack_two").unwrap().status, StackStatus::NotFound);
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_errors_do_not_fail_children() {
    let driver = driver();
    driver.inject_poll_errors(&region_one(), 3).await;

    let orchestrator = orchestrator(driver.clone(), config());
    orchestrator.create_all(children()).await.unwrap();
    assert_eq!(orchestrator.wait_for_create(None).await.unwrap(), StackStatus::CreateComplete);
    assert_eq!(orchestrator.child("stack_one").unwrap().status, StackStatus::CreateComplete);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_deadline_reports_timeout() {
    let orchestrator = orchestrator(
        driver_with(stuck()),
        config().with_monitor_deadline(Some(Duration::from_secs(5))),
    );
    let mut timeouts = orchestrator.subscribe(vec!["child.timed_out".to_string()]);
    orchestrator.create_all(children()).await.unwrap();

    let started = Instant::now();
    let err = orchestrator.wait_for_create(Some(Duration::from_secs(60))).await.unwrap_err();
    assert!(matches!(
        err,
        StratusError::Timeout { last_status: StackStatus::CreateInProgress, .. }
    ));
    assert!(started.elapsed() < Duration::from_secs(60));

    // A deadline never forces a failure
    for child in orchestrator.children() {
        assert_eq!(child.status, StackStatus::CreateInProgress);
    }

    let event = timeouts.recv().await.unwrap();
    assert_eq!(event.event_type, "child.timed_out");
    assert_eq!(event.metadata.get("status").map(String::as_str), Some("CREATE_IN_PROGRESS"));
}

#[tokio::test(start_paused = true)]
async fn test_wait_timeout_cancels_monitors() {
    let driver = driver_with(stuck());
    let orchestrator = orchestrator(driver.clone(), config());
    orchestrator.create_all(children()).await.unwrap();

    let err = orchestrator.wait_for_create(Some(Duration::from_secs(3))).await.unwrap_err();
    assert!(matches!(err, StratusError::Timeout { .. }));

    tokio::time::sleep(Duration::from_millis(10)).await;
    let calls = driver.status_calls();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(driver.status_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_abort_stops_polling() {
    let driver = driver_with(stuck());
    let orchestrator = orchestrator(driver.clone(), config());
    orchestrator.create_all(children()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    orchestrator.abort().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let calls = driver.status_calls();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(driver.status_calls(), calls);

    // Nothing is monitored any more, so the wait gives up immediately
    let err = orchestrator.wait_for_create(None).await.unwrap_err();
    assert!(matches!(err, StratusError::Timeout { .. }));

    // Deleting after an abort still reaches every stack
    orchestrator.delete_all().await.unwrap();
    assert_eq!(orchestrator.wait_for_delete(None).await.unwrap(), StackStatus::DeleteComplete);
}

/// Simulation in which deletions take a while.
fn slow_delete() -> SimulationConfig {
    SimulationConfig { delete_polls: 10, ..SimulationConfig::default() }
}

#[tokio::test(start_paused = true)]
async fn test_delete_all_recovers_after_wait_timeout() {
    let driver = driver_with(slow_delete());
    let orchestrator = orchestrator(driver.clone(), config());
    orchestrator.create_all(children()).await.unwrap();
    orchestrator.wait_for_create(None).await.unwrap();

    orchestrator.delete_all().await.unwrap();
    let err = orchestrator.wait_for_delete(Some(Duration::from_secs(3))).await.unwrap_err();
    assert!(matches!(
        err,
        StratusError::Timeout { last_status: StackStatus::DeleteInProgress, .. }
    ));

    let calls = driver.status_calls();
    orchestrator.delete_all().await.unwrap();
    assert_eq!(
        orchestrator.wait_for_delete(Some(Duration::from_secs(600))).await.unwrap(),
        StackStatus::DeleteComplete
    );
    assert!(driver.status_calls() > calls);

    // Deletes already accepted are only monitored again
    assert_eq!(driver.delete_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_delete_all_recovers_after_abort() {
    let driver = driver_with(slow_delete());
    let orchestrator = orchestrator(driver.clone(), config());
    orchestrator.create_all(children()).await.unwrap();
    orchestrator.wait_for_create(None).await.unwrap();

    orchestrator.delete_all().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    orchestrator.abort().await;

    let err = orchestrator.wait_for_delete(None).await.unwrap_err();
    assert!(matches!(err, StratusError::Timeout { .. }));

    orchestrator.delete_all().await.unwrap();
    assert_eq!(orchestrator.wait_for_delete(None).await.unwrap(), StackStatus::DeleteComplete);
    assert_eq!(driver.delete_calls(), 2);
    for child in orchestrator.children() {
        assert!(child.status.is_gone());
    }
}

#[tokio::test(start_paused = true)]
async fn test_delete_of_vanished_stack_succeeds() {
    let driver = driver();
    let orchestrator = orchestrator(driver.clone(), config());
    orchestrator.create_all(children()).await.unwrap();
    orchestrator.wait_for_create(None).await.unwrap();

    // Someone else removed stack_one behind the orchestrator's back
    let child = orchestrator.child("stack_one").unwrap();
    let remote_id = child.remote_id.unwrap();
    driver.delete(&child.region_id, &remote_id).await.unwrap();
    while driver.get_status(&child.region_id, &remote_id).await.unwrap().status
        != StackStatus::NotFound
    {}

    orchestrator.delete_all().await.unwrap();
    assert_eq!(orchestrator.wait_for_delete(None).await.unwrap(), StackStatus::DeleteComplete);
    assert_eq!(orchestrator.child("stack_one").unwrap().status, StackStatus::NotFound);
    orchestrator
        .wait_for_child_status("stack_one", StackStatus::DeleteComplete, true, None)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_not_found_without_policy_fails_delete() {
    let simulation = SimulationConfig { report_delete_complete: false, ..SimulationConfig::default() };
    let orchestrator =
        orchestrator(driver_with(simulation), config().with_success_on_not_found(false));
    orchestrator.create_all(children()).await.unwrap();
    orchestrator.wait_for_create(None).await.unwrap();

    orchestrator.delete_all().await.unwrap();
    assert_eq!(orchestrator.wait_for_delete(None).await.unwrap(), StackStatus::DeleteFailed);

    let err = orchestrator
        .wait_for_child_status("stack_one", StackStatus::DeleteComplete, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StratusError::UnexpectedStatus { actual: StackStatus::NotFound, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_not_found_with_policy_completes_delete() {
    let simulation = SimulationConfig { report_delete_complete: false, ..SimulationConfig::default() };
    let orchestrator = orchestrator(driver_with(simulation), config());
    orchestrator.create_all(children()).await.unwrap();
    orchestrator.wait_for_create(None).await.unwrap();

    orchestrator.delete_all().await.unwrap();
    assert_eq!(orchestrator.wait_for_delete(None).await.unwrap(), StackStatus::DeleteComplete);
    for child in orchestrator.children() {
        assert_eq!(child.status, StackStatus::NotFound);
    }
}

#[tokio::test(start_paused = true)]
async fn test_child_status_wait_times_out() {
    let orchestrator = orchestrator(driver_with(stuck()), config());
    orchestrator.create_all(children()).await.unwrap();

    let err = orchestrator
        .wait_for_child_status(
            "stack_one",
            StackStatus::CreateComplete,
            false,
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StratusError::Timeout { last_status: StackStatus::CreateInProgress, .. }
    ));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = OrchestratorConfig { poll_interval_ms: 0, ..OrchestratorConfig::default() };
    let result = MultiRegionOrchestrator::new("multi_region", driver(), config);
    assert!(matches!(result, Err(StratusError::InvalidConfig { .. })));
}
