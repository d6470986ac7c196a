//! Integration tests for the admission engine
//!
//! Drives classify → route → check → complete through the public API,
//! with file-backed storage and a manual clock.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tiergate::budget::{
    BudgetSnapshot, Clock, JsonSnapshotStore, ManualClock, RecoverySource, SnapshotStore,
};
use tiergate::error::DenialKind;
use tiergate::estimate::EstimatorKind;
use tiergate::router::policy::{DEFAULT_HIGH_RESOURCE, DEFAULT_MID_RESOURCE};
use tiergate::router::{effective_tier, should_escalate};
use tiergate::{
    classify, select_resource, AdmissionEngine, AdmissionError, AuditSink, BudgetConfig,
    BudgetGate, EngineConfig, ErrorClass, FailureDescriptor, JsonlAuditSink, ResourceTier,
    RoutingPolicy, TaskCategory, TaskMeta, TaskOutcome, TaskRequest, Usage,
};

fn noon(day: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
}

fn file_config(dir: &tempfile::TempDir) -> EngineConfig {
    EngineConfig {
        audit_log_path: Some(dir.path().join("audit_log.jsonl")),
        state_path: Some(dir.path().join("budget-state.json")),
        ..Default::default()
    }
}

/// Test: code task at attempt 0 goes to the mid tier and is admitted quietly
#[tokio::test]
async fn test_code_task_end_to_end() {
    let policy = RoutingPolicy::default();
    let category = classify("implement the retry function", &TaskMeta::default());
    assert_eq!(category, TaskCategory::Code);

    let resource = select_resource(category, 0, None, &policy).unwrap();
    assert_eq!(resource.as_deref(), Some(DEFAULT_MID_RESOURCE));

    let gate = BudgetGate::builder(BudgetConfig::default()).open(None).await;
    let check = gate
        .check_budget(category, DEFAULT_MID_RESOURCE, 10_000)
        .await;

    // 7,000 × 0.003/1K + 3,000 × 0.015/1K
    assert!((check.estimated_cost_usd - 0.066).abs() < 1e-9);
    assert!(check.allowed);
    assert!(check.warnings.is_empty());
    assert!(check.reason.is_none());
}

/// Test: heartbeat never needs a resource, whatever the attempt or failure
#[test]
fn test_heartbeat_never_routes() {
    let policy = RoutingPolicy::default();
    let failures = [
        None,
        Some(FailureDescriptor::validation()),
        Some(FailureDescriptor::tool_error(5)),
        Some(FailureDescriptor::uncertainty()),
    ];
    for attempt in 0..10 {
        for failure in &failures {
            let resource =
                select_resource(TaskCategory::Heartbeat, attempt, failure.as_ref(), &policy)
                    .unwrap();
            assert!(resource.is_none(), "attempt {} {:?}", attempt, failure);
        }
    }
}

/// Test: escalating tier never decreases as attempts grow
#[test]
fn test_escalation_is_monotonic() {
    let mut policy = RoutingPolicy::default();
    policy.max_attempts = 10;
    let failure = FailureDescriptor::tool_error(2);
    assert!(should_escalate(Some(&failure), &policy));

    for category in TaskCategory::ALL {
        if category == TaskCategory::Heartbeat {
            continue;
        }
        let mut previous = ResourceTier::None;
        for attempt in 0..policy.max_attempts {
            let tier = effective_tier(category, attempt, Some(&failure), &policy).unwrap();
            assert!(tier >= previous, "{} attempt {}", category, attempt);
            previous = tier;
        }
        assert_eq!(previous, ResourceTier::High);
    }
}

/// Test: a file verb outranks code words in the same request
#[test]
fn test_file_ops_outranks_code() {
    let meta = TaskMeta::default();
    assert_eq!(
        classify("read the function definition", &meta),
        TaskCategory::FileOps
    );
    assert_eq!(
        classify("read the function definition", &meta),
        classify("read the function definition", &meta)
    );
}

/// Test: spend survives a restart through the snapshot file
#[tokio::test]
async fn test_restart_restores_from_snapshot() {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
    let dir = tempfile::TempDir::new().unwrap();
    let config = file_config(&dir);
    let clock = Arc::new(ManualClock::new(noon(9)));

    let engine = AdmissionEngine::from_config_with_clock(&config, clock.clone())
        .await
        .unwrap();
    let admission = engine
        .admit(&TaskRequest::new("design the storage architecture").with_estimate(10_000))
        .await
        .unwrap();
    assert_eq!(admission.resource(), Some(DEFAULT_HIGH_RESOURCE));
    let record = engine
        .complete(&admission, TaskOutcome::succeeded(Usage::new(10_000, 1_000)))
        .await;
    drop(engine);

    let engine = AdmissionEngine::from_config_with_clock(&config, clock)
        .await
        .unwrap();
    assert_eq!(engine.gate().recovery().source, RecoverySource::Snapshot);
    let status = engine.gate().status().await;
    assert!((status.cumulative_spend_usd - record.estimated_cost_usd).abs() < 1e-9);
}

/// Test: without a snapshot, spend is replayed from the audit log
#[tokio::test]
async fn test_restart_replays_audit_log_when_snapshot_missing() {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
    let dir = tempfile::TempDir::new().unwrap();
    let config = file_config(&dir);
    let clock = Arc::new(ManualClock::new(noon(9)));

    let engine = AdmissionEngine::from_config_with_clock(&config, clock.clone())
        .await
        .unwrap();
    for _ in 0..3 {
        let admission = engine
            .admit(&TaskRequest::new("refactor the parser").with_estimate(10_000))
            .await
            .unwrap();
        engine
            .complete(&admission, TaskOutcome::succeeded(Usage::new(7_000, 3_000)))
            .await;
    }
    drop(engine);

    std::fs::remove_file(dir.path().join("budget-state.json")).unwrap();
    let mut log = std::fs::read_to_string(dir.path().join("audit_log.jsonl")).unwrap();
    log.push_str("{\"timestamp\": \"broken\n\n");
    std::fs::write(dir.path().join("audit_log.jsonl"), log).unwrap();

    let engine = AdmissionEngine::from_config_with_clock(&config, clock)
        .await
        .unwrap();
    let report = engine.gate().recovery();
    assert_eq!(report.source, RecoverySource::AuditReplay);
    assert_eq!(report.records_counted, 3);
    assert_eq!(report.lines_skipped, 1);
    assert!((report.spend_usd - 0.198).abs() < 1e-9);

    let snapshot = JsonSnapshotStore::new(dir.path().join("budget-state.json"))
        .load()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.period_key, "2026-03-09");
}

/// Test: yesterday's snapshot is ignored and today's audit entries are replayed
#[tokio::test]
async fn test_stale_snapshot_is_replaced() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = file_config(&dir);
    let store = JsonSnapshotStore::new(config.state_path.as_ref().unwrap());
    store
        .save(&BudgetSnapshot {
            period_key: "2026-03-08".into(),
            cumulative_spend_usd: 24.0,
            last_updated: None,
        })
        .await
        .unwrap();

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(noon(9)));
    let engine = AdmissionEngine::from_config_with_clock(&config, clock)
        .await
        .unwrap();
    assert_eq!(engine.gate().status().await.cumulative_spend_usd, 0.0);
    assert_eq!(store.load().await.unwrap().unwrap().period_key, "2026-03-09");
}

/// Test: the day rolls over between two admissions of a long-running process
#[tokio::test]
async fn test_daily_limit_resets_at_midnight() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = file_config(&dir);
    config.budgets.max_daily_cost_usd = 0.1;
    config.budgets.alert_thresholds.daily_cost_usd = 0.05;
    let clock = Arc::new(ManualClock::new(noon(9)));

    let engine = AdmissionEngine::from_config_with_clock(&config, clock.clone())
        .await
        .unwrap();
    let request = TaskRequest::new("fix the bug in the importer").with_estimate(10_000);
    let admission = engine.admit(&request).await.unwrap();
    engine
        .complete(&admission, TaskOutcome::succeeded(Usage::new(7_000, 3_000)))
        .await;

    let err = engine.admit(&request).await.unwrap_err();
    assert!(matches!(
        err,
        AdmissionError::BudgetDenied {
            kind: DenialKind::DailyCost,
            ..
        }
    ));
    assert_eq!(err.class(), ErrorClass::RetryWithDifferentParameters);

    clock.advance(chrono::Duration::hours(13));
    let admission = engine.admit(&request).await.unwrap();
    assert_eq!(admission.check.as_ref().unwrap().cumulative_spend_usd, 0.0);
    assert_eq!(engine.gate().status().await.period_key, "2026-03-10");
}

/// Test: concurrent admissions overshoot by at most the in-flight estimates
#[tokio::test]
async fn test_concurrent_admissions_are_best_effort() {
    let mut config = EngineConfig::default();
    config.budgets.max_daily_cost_usd = 0.2;
    let engine = Arc::new(
        AdmissionEngine::from_config_with_clock(&config, Arc::new(ManualClock::new(noon(9))))
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let request = TaskRequest::new("debug the scheduler").with_estimate(10_000);
            engine.admit(&request).await
        }));
    }

    let mut admitted = Vec::new();
    for handle in handles {
        if let Ok(admission) = handle.await.unwrap() {
            admitted.push(admission);
        }
    }

    // Nothing recorded yet, so every check saw zero spend
    assert_eq!(admitted.len(), 8);
    for admission in &admitted {
        engine
            .complete(admission, TaskOutcome::succeeded(Usage::new(7_000, 3_000)))
            .await;
    }
    let status = engine.gate().status().await;
    assert!(status.cumulative_spend_usd > config.budgets.max_daily_cost_usd);
    assert!(status.cumulative_spend_usd <= config.budgets.max_daily_cost_usd + 8.0 * 0.066 + 1e-9);
}

/// Test: the audit log written by the engine is readable line by line
#[tokio::test]
async fn test_audit_log_lines() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = EngineConfig {
        estimator: EstimatorKind::WordCount,
        ..file_config(&dir)
    };
    let clock = Arc::new(ManualClock::new(noon(9)));
    let engine = AdmissionEngine::from_config_with_clock(&config, clock)
        .await
        .unwrap();

    let meta = TaskMeta {
        trigger_source: Some("cron".into()),
        session_key: Some("agent:main:cron".into()),
    };
    let request = TaskRequest::new("summarize the overnight alerts").with_meta(meta);
    let first = engine.admit(&request).await.unwrap();
    assert_eq!(first.check.as_ref().unwrap().estimated_units, 6);
    engine
        .complete(&first, TaskOutcome::failed(Some(Usage::new(400, 0)), "schema mismatch"))
        .await;

    let retry = request.retry(&first, FailureDescriptor::validation());
    let second = engine.admit(&retry).await.unwrap();
    engine
        .complete(&second, TaskOutcome::succeeded(Usage::new(400, 120)).with_cache_units(64, 0))
        .await;

    let sink = JsonlAuditSink::new(dir.path().join("audit_log.jsonl"));
    let lines = sink.read_lines().await.unwrap();
    assert_eq!(lines.len(), 2);

    let first_line: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(first_line["trigger"], "cron");
    assert_eq!(first_line["taskType"], "summarize");
    assert_eq!(first_line["sessionKey"], "agent:main:cron");
    assert_eq!(first_line["success"], false);
    assert_eq!(first_line["error"], "schema mismatch");
    assert_eq!(first_line["totalTokens"], 400);

    let second_line: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(second_line["attempt"], 1);
    assert_eq!(second_line["escalation"], true);
    assert_eq!(second_line["model"], DEFAULT_MID_RESOURCE);
    assert_eq!(second_line["cacheReadTokens"], 64);
    assert_eq!(second_line["taskId"], first_line["taskId"]);
}

/// Test: an invalid config is rejected before anything is opened
#[tokio::test]
async fn test_invalid_config_is_an_operator_error() {
    let mut config = EngineConfig::default();
    config.routing.defaults.remove(&ResourceTier::Mid);
    let err = AdmissionEngine::from_config(&config).await.err().unwrap();
    assert_eq!(err.class(), ErrorClass::AlertOperator);
    assert!(err.is_config_defect());
}
