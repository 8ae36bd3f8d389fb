use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use querymon_common::error::{AlertError, Result};
use querymon_common::principal;
use querymon_common::settings::SettingsHandle;
use querymon_common::types::{
    ColumnSchema, CompareOp, Monitor, MonitorType, QueryResponse, Schedule, ScheduleUnit,
    Severity, Trigger, TriggerAction, TriggerCondition, TriggerMode, UserSnapshot,
};
use querymon_notify::{Notifier, PlaceholderTemplateEngine};
use querymon_query::{PqlExecutor, PqlQueryRequest};
use querymon_storage::memory::InMemoryCluster;
use querymon_storage::{AlertStore, BackoffPolicy, MonitorStore};

use crate::clock::Clock;
use crate::runner::MonitorRunner;
use crate::{evaluator, materializer, throttle};

// ── fixtures ──

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn number_trigger(id: &str) -> Trigger {
    Trigger {
        id: id.to_string(),
        name: format!("{id} name"),
        severity: Severity::Warn,
        mode: TriggerMode::ResultSet,
        condition: TriggerCondition::NumberOfResults {
            op: CompareOp::Gt,
            value: 0,
        },
        throttle_duration: None,
        expire_duration: 60,
        actions: vec![],
        last_fired_time: None,
    }
}

fn custom_trigger(id: &str, mode: TriggerMode) -> Trigger {
    Trigger {
        mode,
        condition: TriggerCondition::Custom {
            fragment: "eval flag = number > 7".to_string(),
        },
        ..number_trigger(id)
    }
}

fn monitor_with(triggers: Vec<Trigger>) -> Monitor {
    Monitor {
        id: "m1".to_string(),
        version: 1,
        name: "log watcher".to_string(),
        monitor_type: MonitorType::Pql,
        enabled: true,
        enabled_time: Some(fixed_now()),
        user: None,
        schedule: Schedule {
            interval: 5,
            unit: ScheduleUnit::Minutes,
        },
        look_back_window: None,
        timestamp_field: "@timestamp".to_string(),
        query_language: "pql".to_string(),
        query: "source=logs | head 3".to_string(),
        triggers,
    }
}

fn rows_response(values: &[i64]) -> QueryResponse {
    QueryResponse {
        schema: vec![
            ColumnSchema {
                name: "number".to_string(),
                column_type: "long".to_string(),
            },
            ColumnSchema {
                name: "flag".to_string(),
                column_type: "boolean".to_string(),
            },
        ],
        datarows: values
            .iter()
            .map(|v| vec![serde_json::json!(v), serde_json::json!(*v > 7)])
            .collect(),
        total: values.len() as u64,
        size: values.len() as u64,
    }
}

// ── test doubles ──

#[derive(Default)]
struct ScriptedExecutor {
    responses: Mutex<VecDeque<Result<QueryResponse>>>,
    queries: Mutex<Vec<String>>,
    principals: Mutex<Vec<Option<String>>>,
}

impl ScriptedExecutor {
    fn push(&self, response: Result<QueryResponse>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn principals(&self) -> Vec<Option<String>> {
        self.principals.lock().unwrap().clone()
    }
}

#[async_trait]
impl PqlExecutor for ScriptedExecutor {
    async fn execute(&self, request: &PqlQueryRequest) -> Result<QueryResponse> {
        self.queries.lock().unwrap().push(request.query.clone());
        self.principals
            .lock()
            .unwrap()
            .push(principal::current().map(|u| u.name));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(QueryResponse::default()))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String, String, String)>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<(String, String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        action_id: &str,
        destination_id: &str,
        subject: &str,
        body: &str,
        _principal: Option<&UserSnapshot>,
    ) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((
            action_id.to_string(),
            destination_id.to_string(),
            subject.to_string(),
            body.to_string(),
        ));
        Ok(())
    }
}

struct Harness {
    cluster: Arc<InMemoryCluster>,
    executor: Arc<ScriptedExecutor>,
    notifier: Arc<RecordingNotifier>,
    runner: MonitorRunner,
}

fn harness() -> Harness {
    harness_with_settings(SettingsHandle::default())
}

fn harness_with_settings(settings: SettingsHandle) -> Harness {
    let cluster = Arc::new(InMemoryCluster::new());
    let executor = Arc::new(ScriptedExecutor::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(AlertStore::new(
        cluster.clone(),
        cluster.clone(),
        BackoffPolicy::new(StdDuration::from_millis(1), 3),
    ));
    let runner = MonitorRunner::new(
        executor.clone(),
        store,
        notifier.clone(),
        Arc::new(PlaceholderTemplateEngine),
        Arc::new(FixedClock(fixed_now())),
        settings,
    );
    Harness {
        cluster,
        executor,
        notifier,
        runner,
    }
}

async fn run(h: &Harness, monitor: &Monitor) -> crate::RunResult {
    let period_end = fixed_now();
    h.runner
        .run(
            monitor,
            period_end - Duration::minutes(5),
            period_end,
            false,
            false,
            "exec-1",
        )
        .await
}

// ── throttle gate ──

#[test]
fn throttle_requires_both_duration_and_last_fired() {
    let now = fixed_now();
    let mut trigger = number_trigger("t1");
    assert!(!throttle::is_throttled(&trigger, now, false));

    trigger.throttle_duration = Some(10);
    assert!(!throttle::is_throttled(&trigger, now, false));

    trigger.last_fired_time = Some(now - Duration::minutes(5));
    assert!(throttle::is_throttled(&trigger, now, false));

    trigger.last_fired_time = Some(now - Duration::minutes(11));
    assert!(!throttle::is_throttled(&trigger, now, false));
}

#[test]
fn manual_execution_is_never_throttled() {
    let now = fixed_now();
    let mut trigger = number_trigger("t1");
    trigger.throttle_duration = Some(10);
    trigger.last_fired_time = Some(now - Duration::seconds(30));
    assert!(throttle::is_throttled(&trigger, now, false));
    assert!(!throttle::is_throttled(&trigger, now, true));
}

// ── evaluator ──

#[test]
fn number_of_results_compares_total() {
    let trigger = number_trigger("t1");
    assert!(evaluator::evaluate(&trigger, &rows_response(&[1, 2, 3])).unwrap());
    assert!(!evaluator::evaluate(&trigger, &rows_response(&[])).unwrap());
}

#[test]
fn custom_condition_fires_on_any_truthy_row() {
    let trigger = custom_trigger("t1", TriggerMode::ResultSet);
    assert!(evaluator::evaluate(&trigger, &rows_response(&[5, 10, 7])).unwrap());
    assert!(!evaluator::evaluate(&trigger, &rows_response(&[5, 6, 7])).unwrap());
}

#[test]
fn custom_condition_errors_when_eval_column_is_missing() {
    let trigger = custom_trigger("t1", TriggerMode::ResultSet);
    let mut response = rows_response(&[5]);
    response.schema.retain(|c| c.name != "flag");
    let err = evaluator::evaluate(&trigger, &response).unwrap_err();
    assert!(matches!(err, AlertError::NotFound(_)));
}

#[test]
fn per_result_slices_keep_schema_and_unit_counts() {
    let trigger = custom_trigger("t1", TriggerMode::PerResult);
    let response = rows_response(&[5, 10, 7, 99]);
    let slices = evaluator::result_slices(&trigger, &response, 100_000, 10).unwrap();
    assert_eq!(slices.len(), 2); // 10 and 99
    for slice in &slices {
        assert_eq!(slice.schema, response.schema);
        assert_eq!(slice.total, 1);
        assert_eq!(slice.size, 1);
        assert_eq!(slice.datarows.len(), 1);
    }
}

#[test]
fn per_result_slices_truncate_to_max_alerts() {
    let trigger = custom_trigger("t1", TriggerMode::PerResult);
    let values: Vec<i64> = (10..40).collect();
    let response = rows_response(&values);
    let slices = evaluator::result_slices(&trigger, &response, 100_000, 10).unwrap();
    assert_eq!(slices.len(), 10);
}

// ── materializer ──

#[test]
fn alerts_expire_exactly_expire_duration_after_firing() {
    let monitor = monitor_with(vec![number_trigger("t1")]);
    let now = fixed_now();
    let alerts = materializer::build_alerts(
        &monitor,
        &monitor.triggers[0],
        vec![rows_response(&[1])],
        "exec-1",
        now,
    );
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].triggered_time, now);
    assert_eq!(alerts[0].expiration_time, now + Duration::minutes(60));
    assert_eq!(alerts[0].severity, Severity::Warn);
    assert_eq!(alerts[0].query, monitor.query);
}

#[test]
fn error_alerts_scrub_ip_addresses() {
    let monitor = monitor_with(vec![number_trigger("t1")]);
    let alert = materializer::build_error_alert(
        &monitor,
        &monitor.triggers[0],
        "connect to 10.2.3.4:9200 refused",
        "exec-1",
        fixed_now(),
    );
    assert_eq!(alert.severity, Severity::Error);
    assert!(alert.query_results.datarows.is_empty());
    assert_eq!(
        alert.error_message.as_deref(),
        Some("connect to x.x.x.x:9200 refused")
    );
}

// ── runner ──

#[tokio::test]
async fn fired_number_trigger_writes_one_alert_with_full_results() {
    let h = harness();
    h.executor.push(Ok(rows_response(&[1, 2, 3])));
    let monitor = monitor_with(vec![number_trigger("t1")]);
    h.cluster.index_monitor(&monitor).await.unwrap();

    let result = run(&h, &monitor).await;

    assert!(result.error.is_none());
    assert!(result.trigger_results["t1"].fired);
    let alerts = h.cluster.active_alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].query_results.total, 3);
    assert_eq!(alerts[0].severity, Severity::Warn);
    assert_eq!(alerts[0].execution_id, "exec-1");
}

#[tokio::test]
async fn unfired_trigger_writes_nothing_and_skips_monitor_reindex() {
    let h = harness();
    h.executor.push(Ok(rows_response(&[])));
    let monitor = monitor_with(vec![number_trigger("t1")]);
    h.cluster.index_monitor(&monitor).await.unwrap();

    let result = run(&h, &monitor).await;

    assert!(result.error.is_none());
    assert!(!result.trigger_results["t1"].fired);
    assert!(h.cluster.active_alerts().await.is_empty());

    let stored = h.cluster.get_monitor("m1").await.unwrap().unwrap();
    assert!(stored.triggers[0].last_fired_time.is_none());
}

#[tokio::test]
async fn fired_run_persists_last_fired_time_on_the_monitor() {
    let h = harness();
    h.executor.push(Ok(rows_response(&[1])));
    let monitor = monitor_with(vec![number_trigger("t1")]);
    h.cluster.index_monitor(&monitor).await.unwrap();

    run(&h, &monitor).await;

    let stored = h.cluster.get_monitor("m1").await.unwrap().unwrap();
    assert_eq!(
        stored.triggers[0].last_fired_time.map(|t| t.timestamp_millis()),
        Some(fixed_now().timestamp_millis())
    );
    assert_eq!(stored.triggers[0].id, "t1");
}

#[tokio::test]
async fn custom_per_result_trigger_yields_one_alert_per_matching_row() {
    let h = harness();
    h.executor.push(Ok(rows_response(&[5, 10, 7])));
    let monitor = monitor_with(vec![custom_trigger("t1", TriggerMode::PerResult)]);
    h.cluster.index_monitor(&monitor).await.unwrap();

    let result = run(&h, &monitor).await;

    assert!(result.trigger_results["t1"].fired);
    let alerts = h.cluster.active_alerts().await;
    assert_eq!(alerts.len(), 1); // only the row with number=10
    assert_eq!(alerts[0].query_results.datarows[0][0], serde_json::json!(10));
}

#[tokio::test]
async fn custom_result_set_trigger_yields_one_alert_with_all_rows() {
    let h = harness();
    h.executor.push(Ok(rows_response(&[5, 10, 7])));
    let monitor = monitor_with(vec![custom_trigger("t1", TriggerMode::ResultSet)]);
    h.cluster.index_monitor(&monitor).await.unwrap();

    run(&h, &monitor).await;

    let alerts = h.cluster.active_alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].query_results.datarows.len(), 3);
}

#[tokio::test]
async fn throttled_trigger_skips_query_execution() {
    let h = harness();
    let mut trigger = number_trigger("t1");
    trigger.throttle_duration = Some(10);
    trigger.last_fired_time = Some(fixed_now() - Duration::minutes(5));
    let monitor = monitor_with(vec![trigger]);
    h.cluster.index_monitor(&monitor).await.unwrap();

    let result = run(&h, &monitor).await;

    assert!(result.trigger_results["t1"].throttled);
    assert!(!result.trigger_results["t1"].fired);
    assert!(h.executor.queries().is_empty());
    assert!(result.trigger_responses.is_empty());
}

#[tokio::test]
async fn executor_failure_records_error_alert_and_later_triggers_still_run() {
    let h = harness();
    h.executor
        .push(Err(AlertError::QueryFailed("node 10.0.0.5 timed out".to_string())));
    h.executor.push(Ok(rows_response(&[1])));
    let monitor = monitor_with(vec![number_trigger("t1"), number_trigger("t2")]);
    h.cluster.index_monitor(&monitor).await.unwrap();

    let result = run(&h, &monitor).await;

    assert!(result.error.is_none());
    assert!(result.trigger_results["t1"].error.is_some());
    assert!(result.trigger_results["t2"].fired);

    let alerts = h.cluster.active_alerts().await;
    assert_eq!(alerts.len(), 2);
    let error_alert = alerts.iter().find(|a| a.trigger_id == "t1").unwrap();
    assert_eq!(error_alert.severity, Severity::Error);
    assert_eq!(
        error_alert.error_message.as_deref(),
        Some("query execution failed: node x.x.x.x timed out")
    );
}

#[tokio::test]
async fn composed_query_gains_time_filter_condition_and_cap() {
    let h = harness();
    h.executor.push(Ok(rows_response(&[])));
    let mut monitor = monitor_with(vec![custom_trigger("t1", TriggerMode::ResultSet)]);
    monitor.look_back_window = Some(15);
    h.cluster.index_monitor(&monitor).await.unwrap();

    run(&h, &monitor).await;

    let queries = h.executor.queries();
    assert_eq!(queries.len(), 1);
    let query = &queries[0];
    assert!(query.starts_with("source=logs | where @timestamp > TIMESTAMP('2024-06-01 11:45:00')"));
    let condition_at = query.find("eval flag").unwrap();
    let cap_at = query.rfind("| head 10000").unwrap();
    assert!(condition_at < cap_at, "cap must be the final stage: {query}");
}

#[tokio::test]
async fn executor_runs_under_the_monitor_owners_principal() {
    let h = harness();
    h.executor.push(Ok(rows_response(&[])));
    let mut monitor = monitor_with(vec![number_trigger("t1")]);
    monitor.user = Some(UserSnapshot {
        name: "stored-owner".to_string(),
        backend_roles: vec!["ops".to_string()],
        roles: vec![],
    });
    h.cluster.index_monitor(&monitor).await.unwrap();

    run(&h, &monitor).await;

    assert_eq!(
        h.executor.principals(),
        vec![Some("stored-owner".to_string())]
    );
}

#[tokio::test]
async fn actions_render_and_dispatch_per_fired_slice() {
    let h = harness();
    h.executor.push(Ok(rows_response(&[1, 2])));
    let mut trigger = number_trigger("t1");
    trigger.actions = vec![TriggerAction {
        id: "a1".to_string(),
        name: "notify ops".to_string(),
        destination_id: "d1".to_string(),
        subject_template: "{{monitor.name}} fired".to_string(),
        message_template: "{{results.total}} rows".to_string(),
    }];
    let monitor = monitor_with(vec![trigger]);
    h.cluster.index_monitor(&monitor).await.unwrap();

    let result = run(&h, &monitor).await;

    assert!(result.trigger_results["t1"].action_errors.is_empty());
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "a1");
    assert_eq!(sent[0].2, "log watcher fired");
    assert_eq!(sent[0].3, "2 rows");
}

#[tokio::test]
async fn empty_rendered_message_fails_the_action_but_not_the_run() {
    let h = harness();
    h.executor.push(Ok(rows_response(&[1])));
    let mut trigger = number_trigger("t1");
    trigger.actions = vec![TriggerAction {
        id: "a1".to_string(),
        name: "blank".to_string(),
        destination_id: "d1".to_string(),
        subject_template: "subject".to_string(),
        message_template: "  ".to_string(),
    }];
    let monitor = monitor_with(vec![trigger]);
    h.cluster.index_monitor(&monitor).await.unwrap();

    let result = run(&h, &monitor).await;

    assert!(result.trigger_results["t1"].fired);
    assert_eq!(result.trigger_results["t1"].action_errors.len(), 1);
    assert!(h.notifier.sent().is_empty());
    assert_eq!(h.cluster.active_alerts().await.len(), 1);
}

#[tokio::test]
async fn dry_run_evaluates_and_persists_but_never_dispatches() {
    let h = harness();
    h.executor.push(Ok(rows_response(&[1])));
    let mut trigger = number_trigger("t1");
    trigger.actions = vec![TriggerAction {
        id: "a1".to_string(),
        name: "notify ops".to_string(),
        destination_id: "d1".to_string(),
        subject_template: "s".to_string(),
        message_template: "m".to_string(),
    }];
    let monitor = monitor_with(vec![trigger]);
    h.cluster.index_monitor(&monitor).await.unwrap();

    let period_end = fixed_now();
    let result = h
        .runner
        .run(
            &monitor,
            period_end - Duration::minutes(5),
            period_end,
            false,
            true,
            "exec-dry",
        )
        .await;

    assert!(result.trigger_results["t1"].fired);
    assert!(h.notifier.sent().is_empty());
    assert_eq!(h.cluster.active_alerts().await.len(), 1);
}

#[tokio::test]
async fn non_pql_monitor_is_rejected_up_front() {
    let h = harness();
    let mut monitor = monitor_with(vec![number_trigger("t1")]);
    monitor.monitor_type = MonitorType::SearchInput;

    let result = run(&h, &monitor).await;

    assert!(result.error.is_some());
    assert!(result.trigger_results.is_empty());
    assert!(h.executor.queries().is_empty());
}

#[tokio::test]
async fn raw_response_is_kept_uncapped_in_the_run_result() {
    // shrink the stored-results cap so the persisted slice gets replaced
    let settings = SettingsHandle::default();
    settings.update(|s| s.query_results_max_size_bytes = 32);
    let h = harness_with_settings(settings);
    h.executor.push(Ok(rows_response(&[1, 2, 3])));
    let monitor = monitor_with(vec![number_trigger("t1")]);
    h.cluster.index_monitor(&monitor).await.unwrap();

    let result = run(&h, &monitor).await;

    // API callers see the full rows; the stored alert carries the capped copy
    assert_eq!(result.trigger_responses["t1"].datarows.len(), 3);
    let alerts = h.cluster.active_alerts().await;
    assert_eq!(alerts[0].query_results.datarows.len(), 1);
    assert_eq!(alerts[0].query_results.total, 3);
}
