use chrono::{DateTime, Duration, Utc};
use querymon_common::id;
use querymon_common::types::{Alert, Monitor, QueryResponse, Severity, Trigger};
use regex::Regex;
use std::sync::OnceLock;

/// Build one alert per result slice for a fired trigger. `triggered_time` is
/// the run's single clock read; expiration derives from the trigger's TTL.
pub fn build_alerts(
    monitor: &Monitor,
    trigger: &Trigger,
    slices: Vec<QueryResponse>,
    execution_id: &str,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    slices
        .into_iter()
        .map(|slice| Alert {
            id: id::next_id(),
            monitor_id: monitor.id.clone(),
            monitor_name: monitor.name.clone(),
            monitor_version: monitor.version,
            monitor_user: monitor.user.clone(),
            trigger_id: trigger.id.clone(),
            trigger_name: trigger.name.clone(),
            query: monitor.query.clone(),
            query_results: slice,
            triggered_time: now,
            expiration_time: now + Duration::minutes(trigger.expire_duration),
            severity: trigger.severity,
            error_message: None,
            execution_id: execution_id.to_string(),
        })
        .collect()
}

/// The single alert recorded when composition, execution, or evaluation
/// failed for a trigger. Carries no query results; the message is scrubbed
/// of IP-like substrings before persistence.
pub fn build_error_alert(
    monitor: &Monitor,
    trigger: &Trigger,
    error_message: &str,
    execution_id: &str,
    now: DateTime<Utc>,
) -> Alert {
    Alert {
        id: id::next_id(),
        monitor_id: monitor.id.clone(),
        monitor_name: monitor.name.clone(),
        monitor_version: monitor.version,
        monitor_user: monitor.user.clone(),
        trigger_id: trigger.id.clone(),
        trigger_name: trigger.name.clone(),
        query: monitor.query.clone(),
        query_results: QueryResponse::default(),
        triggered_time: now,
        expiration_time: now + Duration::minutes(trigger.expire_duration),
        severity: Severity::Error,
        error_message: Some(obfuscate_ips(error_message)),
        execution_id: execution_id.to_string(),
    }
}

/// Replace IPv4-shaped substrings with a placeholder so node addresses never
/// leak into user-visible alert documents.
pub fn obfuscate_ips(message: &str) -> String {
    static IP_RE: OnceLock<Regex> = OnceLock::new();
    let re = IP_RE.get_or_init(|| Regex::new(r"\b\d{1,3}(\.\d{1,3}){3}\b").unwrap());
    re.replace_all(message, "x.x.x.x").into_owned()
}
