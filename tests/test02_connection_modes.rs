mod common;

use std::collections::HashSet;

use common::{ScriptedDriver, adapter_with};
use sqlserver_adapter::prelude::*;

#[tokio::test]
async fn persistent_mode_reuses_the_connected_handle() {
    let driver = ScriptedDriver::new();
    let adapter = adapter_with(driver.clone(), true);

    for _ in 0..2 {
        adapter
            .find("default", FindRequest::new("user", Criteria::default()))
            .await
            .unwrap();
    }

    assert_eq!(driver.connects(), 1, "no second connect is issued");
    assert_eq!(driver.closes(), 0, "the shared handle stays open");
    let tagged = driver.statements_by_connection();
    assert_eq!(tagged.len(), 2);
    assert_eq!(tagged[0].0, tagged[1].0, "both statements share one handle");
}

#[tokio::test]
async fn transient_mode_opens_and_closes_a_handle_per_operation() {
    let driver = ScriptedDriver::new();
    let adapter = adapter_with(driver.clone(), false);

    adapter
        .find("default", FindRequest::new("user", Criteria::default()))
        .await
        .unwrap();
    adapter
        .find("default", FindRequest::new("user", Criteria::default()))
        .await
        .unwrap();

    assert_eq!(driver.connects(), 2);
    assert_eq!(driver.closes(), 2);
    let handles: HashSet<usize> = driver
        .statements_by_connection()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(handles.len(), 2, "each operation got its own handle");
}

#[tokio::test]
async fn concurrent_transient_operations_get_distinct_handles() {
    let driver = ScriptedDriver::new();
    let adapter = adapter_with(driver.clone(), false);

    let (first, second) = tokio::join!(
        adapter.find("default", FindRequest::new("user", Criteria::default())),
        adapter.find("default", FindRequest::new("account", Criteria::default())),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(driver.connects(), 2);
    assert_eq!(driver.closes(), 2, "closing one never affects the other");
    let handles: HashSet<usize> = driver
        .statements_by_connection()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(handles.len(), 2);
}

#[tokio::test]
async fn transient_handles_are_released_on_the_failure_path_too() {
    let driver = ScriptedDriver::new();
    driver.respond_with(|_| Err(AdapterError::Statement("deadlock victim".to_string())));
    let adapter = adapter_with(driver.clone(), false);

    let err = adapter
        .find("default", FindRequest::new("user", Criteria::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Statement(_)));
    assert_eq!(driver.connects(), 1);
    assert_eq!(driver.closes(), 1, "failure still releases the session");
}

#[tokio::test]
async fn persistent_handles_are_not_closed_on_failure() {
    let driver = ScriptedDriver::new();
    driver.respond_with(|_| Err(AdapterError::Statement("constraint violation".to_string())));
    let adapter = adapter_with(driver.clone(), true);

    adapter
        .find("default", FindRequest::new("user", Criteria::default()))
        .await
        .unwrap_err();
    assert_eq!(driver.closes(), 0);

    // and the same handle serves the next call
    driver.respond_with(|_| Ok(sqlserver_adapter::QueryOutcome::empty()));
    adapter
        .find("default", FindRequest::new("user", Criteria::default()))
        .await
        .unwrap();
    assert_eq!(driver.connects(), 1);
}
