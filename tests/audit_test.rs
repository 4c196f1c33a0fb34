mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FailingActor;
use serde_json::json;
use silk_spark_core::{
    AuditAction, AuditEvent, AuditLogger, AuditOutcome, MemoryTableSource, StaticActor, AUDIT_TABLE,
};
use uuid::Uuid;

fn logger_for(admin_id: Uuid) -> (Arc<MemoryTableSource>, AuditLogger) {
    let source = Arc::new(MemoryTableSource::new());
    let user_agent = Some("Mozilla/5.0 (X11; Linux x86_64)".to_string());
    let actor = Arc::new(StaticActor::new(admin_id, user_agent));
    let logger = AuditLogger::new(source.clone(), actor);
    (source, logger)
}

#[tokio::test]
async fn test_log_writes_one_tagged_row() {
    let admin = Uuid::new_v4();
    let (source, logger) = logger_for(admin);

    let outcome = logger
        .log(
            AuditEvent::new(AuditAction::StatusChange, "orders")
                .target_id("ord_1042")
                .old_data(json!({"status": "pending"}))
                .new_data(json!({"status": "shipped"}))
                .metadata(json!({"carrier": "DHL"})),
        )
        .await;

    assert_eq!(outcome, AuditOutcome::ok());
    let rows = source.rows(AUDIT_TABLE);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["admin_id"], json!(admin));
    assert_eq!(rows[0]["action"], "status_change");
    assert_eq!(rows[0]["target_id"], "ord_1042");
    assert_eq!(rows[0]["user_agent"], "Mozilla/5.0 (X11; Linux x86_64)");
    assert_eq!(rows[0]["metadata"]["carrier"], "DHL");
}

#[tokio::test]
async fn test_write_failure_is_reported_not_raised() {
    let (source, logger) = logger_for(Uuid::new_v4());
    source.fail_with("permission denied for table admin_audit_logs");

    let outcome = logger
        .log_delete("products", Uuid::new_v4(), json!({"name": "Rose Quartz"}))
        .await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.error.as_deref(),
        Some("Remote request failed: permission denied for table admin_audit_logs")
    );
    assert!(source.rows(AUDIT_TABLE).is_empty());
}

#[tokio::test]
async fn test_anonymous_session_is_not_logged() {
    let source = Arc::new(MemoryTableSource::new());
    let logger = AuditLogger::new(source.clone(), Arc::new(StaticActor::anonymous()));

    let outcome = logger.log_create("tags", "moon", json!({"name": "moon"})).await;

    assert_eq!(outcome, AuditOutcome::failed("No authenticated admin"));
    assert!(source.rows(AUDIT_TABLE).is_empty());
}

#[tokio::test]
async fn test_session_lookup_failure_is_reported() {
    let source = Arc::new(MemoryTableSource::new());
    let logger = AuditLogger::new(source, Arc::new(FailingActor));

    let outcome = logger
        .log_update("currencies", "EUR", json!({"rate": 1.0}), json!({"rate": 1.1}))
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("session lookup failed"));
}

#[tokio::test]
async fn test_recent_returns_newest_first() {
    let (_, logger) = logger_for(Uuid::new_v4());

    logger.log_create("products", "p1", json!({})).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    logger.log_update("products", "p1", json!({}), json!({"price": 10})).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    logger.log_delete("products", "p1", json!({"price": 10})).await;

    let entries = logger.recent(2).await.unwrap();
    let actions: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Delete, AuditAction::Update]);
    assert_eq!(entries[0].old_data, Some(json!({"price": 10})));
    assert!(entries[0].new_data.is_none());
}
