#![allow(dead_code)]

use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use querymon_common::types::{
    Alert, CompareOp, Monitor, MonitorType, QueryResponse, Schedule, ScheduleUnit, Severity,
    Trigger, TriggerCondition, TriggerMode,
};
use querymon_engine::Clock;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Test clock the sweeper reads; advance it to age alerts past their TTL.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.0.lock().unwrap();
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub fn trigger(id: &str, expire_minutes: i64) -> Trigger {
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
        expire_duration: expire_minutes,
        actions: vec![],
        last_fired_time: None,
    }
}

pub fn monitor(id: &str, triggers: Vec<Trigger>) -> Monitor {
    Monitor {
        id: id.to_string(),
        version: 1,
        name: format!("{id} monitor"),
        monitor_type: MonitorType::Pql,
        enabled: true,
        enabled_time: Some(base_time()),
        user: None,
        schedule: Schedule {
            interval: 1,
            unit: ScheduleUnit::Minutes,
        },
        look_back_window: None,
        timestamp_field: "@timestamp".to_string(),
        query_language: "pql".to_string(),
        query: "source=logs".to_string(),
        triggers,
    }
}

pub fn alert(id: &str, monitor_id: &str, trigger_id: &str, triggered: DateTime<Utc>) -> Alert {
    Alert {
        id: id.to_string(),
        monitor_id: monitor_id.to_string(),
        monitor_name: format!("{monitor_id} monitor"),
        monitor_version: 1,
        monitor_user: None,
        trigger_id: trigger_id.to_string(),
        trigger_name: format!("{trigger_id} name"),
        query: "source=logs".to_string(),
        query_results: QueryResponse::default(),
        triggered_time: triggered,
        expiration_time: triggered + Duration::minutes(60),
        severity: Severity::Warn,
        error_message: None,
        execution_id: "exec-1".to_string(),
    }
}
