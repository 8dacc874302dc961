mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{ScriptedDriver, adapter_with, row};
use serde_json::json;
use sqlserver_adapter::prelude::*;
use sqlserver_adapter::{
    JoinInstruction, JoinPlan, JoinSource, JoinStitcher, QueryOutcome, SqlServerAdapter,
};

#[tokio::test]
async fn group_by_without_a_calculation_fails_before_any_statement() {
    let driver = ScriptedDriver::new();
    let adapter = adapter_with(driver.clone(), false);

    let criteria = Criteria {
        group_by: vec!["name".to_string()],
        ..Criteria::default()
    };
    let err = adapter
        .find("default", FindRequest::new("user", criteria))
        .await
        .unwrap_err();

    assert!(matches!(err, AdapterError::Validation(_)));
    assert_eq!(driver.connects(), 0, "no connection was opened");
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn find_compiles_aggregates_when_paired_with_a_calculation() {
    let driver = ScriptedDriver::new();
    let adapter = adapter_with(driver.clone(), false);

    let criteria = Criteria {
        group_by: vec!["name".to_string()],
        sum: vec!["id".to_string()],
        ..Criteria::default()
    };
    adapter
        .find("default", FindRequest::new("user", criteria))
        .await
        .unwrap();

    assert_eq!(
        driver.statements()[0],
        "SELECT [name], SUM([id]) AS [id] FROM [user] GROUP BY [name]"
    );
}

/// Stitcher double: records the plan, drives both capabilities, returns
/// whatever the child find produced.
struct RecordingStitcher {
    seen_parent: Mutex<Option<String>>,
    seen_parent_pk: Mutex<Option<String>>,
}

impl RecordingStitcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen_parent: Mutex::new(None),
            seen_parent_pk: Mutex::new(None),
        })
    }
}

#[async_trait]
impl JoinStitcher for RecordingStitcher {
    async fn stitch(
        &self,
        plan: JoinPlan<'_>,
        source: &dyn JoinSource,
    ) -> Result<Vec<Record>, AdapterError> {
        *self.seen_parent.lock().unwrap() = Some(plan.parent_collection.to_string());
        *self.seen_parent_pk.lock().unwrap() = source.primary_key(plan.parent_collection);
        assert!(source.primary_key("").is_none());
        assert!(source.primary_key("ghost").is_none());

        let child = &plan.instructions.joins[0].child;
        source.find(child, Criteria::default()).await
    }
}

fn join_criteria() -> Criteria {
    Criteria {
        select: Some(vec!["name".to_string()]),
        joins: vec![JoinInstruction {
            parent: "user".to_string(),
            parent_key: "id".to_string(),
            child: "account".to_string(),
            child_key: "code".to_string(),
            ..JoinInstruction::default()
        }],
        where_: Some(json!({"id": 1})),
        ..Criteria::default()
    }
}

#[tokio::test]
async fn join_hands_the_plan_and_capabilities_to_the_stitcher() {
    let driver = ScriptedDriver::new();
    driver.respond_with(|_| {
        Ok(QueryOutcome::of_rows(vec![row(&[(
            "code",
            Value::Text("acct-1".into()),
        )])]))
    });
    let stitcher = RecordingStitcher::new();
    let adapter = SqlServerAdapter::builder()
        .driver(driver.clone())
        .stitcher(stitcher.clone())
        .build();
    adapter
        .register_datastore(DatastoreConfig::new("default"), common::collections())
        .unwrap();

    let stitched = adapter
        .join("default", JoinRequest::new(join_criteria()))
        .await
        .unwrap();

    assert_eq!(stitched.len(), 1);
    assert_eq!(
        stitcher.seen_parent.lock().unwrap().as_deref(),
        Some("user")
    );
    assert_eq!(
        stitcher.seen_parent_pk.lock().unwrap().as_deref(),
        Some("id")
    );
    // the capability find ran against the child collection
    assert_eq!(driver.statements(), vec!["SELECT * FROM [account]".to_string()]);
}

#[tokio::test]
async fn join_without_instructions_is_a_validation_error() {
    let driver = ScriptedDriver::new();
    let stitcher = RecordingStitcher::new();
    let adapter = SqlServerAdapter::builder()
        .driver(driver)
        .stitcher(stitcher)
        .build();
    adapter
        .register_datastore(DatastoreConfig::new("default"), common::collections())
        .unwrap();

    let err = adapter
        .join("default", JoinRequest::new(Criteria::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Validation(_)));
}

#[tokio::test]
async fn join_without_a_stitcher_is_unimplemented() {
    let driver = ScriptedDriver::new();
    let adapter = adapter_with(driver, false);
    let err = adapter
        .join("default", JoinRequest::new(join_criteria()))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Unimplemented(_)));
}
