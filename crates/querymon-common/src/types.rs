use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};

/// Upper bound on triggers per monitor.
pub const MAX_TRIGGERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Comparator applied to a result count by number-of-results triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
}

impl CompareOp {
    pub fn check(&self, actual: u64, threshold: u64) -> bool {
        match self {
            Self::Gt => actual > threshold,
            Self::Gte => actual >= threshold,
            Self::Lt => actual < threshold,
            Self::Lte => actual <= threshold,
            Self::Eq => actual == threshold,
            Self::Neq => actual != threshold,
        }
    }
}

impl std::str::FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            ">" | "greater_than" => Ok(Self::Gt),
            ">=" | "greater_equal" => Ok(Self::Gte),
            "<" | "less_than" => Ok(Self::Lt),
            "<=" | "less_equal" => Ok(Self::Lte),
            "==" | "equal" => Ok(Self::Eq),
            "!=" | "not_equal" => Ok(Self::Neq),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "==",
            Self::Neq => "!=",
        };
        write!(f, "{s}")
    }
}

/// Whether a fired trigger produces one alert for the whole result set or
/// one alert per matching row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    ResultSet,
    PerResult,
}

/// The firing condition of a trigger. Exactly one shape per trigger, tagged
/// on the wire by `condition_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition_type", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Compare the response's total row count against a fixed value.
    NumberOfResults { op: CompareOp, value: u64 },
    /// Append a PQL fragment that computes an `eval <name> = <bool-expr>`
    /// column; the trigger fires when any row evaluates truthy.
    Custom { fragment: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerAction {
    pub id: String,
    pub name: String,
    pub destination_id: String,
    pub subject_template: String,
    pub message_template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub mode: TriggerMode,
    #[serde(flatten)]
    pub condition: TriggerCondition,
    /// Cooldown between non-manual firings, whole minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_duration: Option<i64>,
    /// TTL for alerts generated by this trigger, whole minutes.
    pub expire_duration: i64,
    #[serde(default)]
    pub actions: Vec<TriggerAction>,
    /// Only field the runner mutates; persisted across executions.
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_fired_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleUnit {
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub interval: u32,
    pub unit: ScheduleUnit,
}

impl Schedule {
    /// Length of one scheduling period.
    pub fn period(&self) -> Duration {
        let n = i64::from(self.interval);
        match self.unit {
            ScheduleUnit::Minutes => Duration::minutes(n),
            ScheduleUnit::Hours => Duration::hours(n),
            ScheduleUnit::Days => Duration::days(n),
        }
    }
}

/// Variant tag selecting which runner executes a monitor. The v1
/// search-input monitor is a sibling variant, not a refinement of PQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorType {
    Pql,
    SearchInput,
}

/// Owner identity captured at monitor creation; side-effecting calls run
/// under this principal instead of the calling user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub name: String,
    #[serde(default)]
    pub backend_roles: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: String,
    pub version: i64,
    pub name: String,
    pub monitor_type: MonitorType,
    pub enabled: bool,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub enabled_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSnapshot>,
    pub schedule: Schedule,
    /// Whole minutes; when set, the composer injects a time-range predicate
    /// on `timestamp_field`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub look_back_window: Option<i64>,
    pub timestamp_field: String,
    pub query_language: String,
    pub query: String,
    pub triggers: Vec<Trigger>,
}

impl Monitor {
    /// Check the definition invariants a monitor must satisfy before it is
    /// scheduled or persisted.
    pub fn validate(&self) -> Result<()> {
        if self.enabled != self.enabled_time.is_some() {
            return Err(AlertError::Validation(
                "enabled_time must be set exactly when the monitor is enabled".to_string(),
            ));
        }
        if self.triggers.is_empty() || self.triggers.len() > MAX_TRIGGERS {
            return Err(AlertError::Validation(format!(
                "monitor must define between 1 and {} triggers, got {}",
                MAX_TRIGGERS,
                self.triggers.len()
            )));
        }
        for trigger in &self.triggers {
            if trigger.expire_duration < 1 {
                return Err(AlertError::Validation(format!(
                    "trigger '{}': expire_duration must be at least 1 minute",
                    trigger.name
                )));
            }
            if let Some(throttle) = trigger.throttle_duration {
                if throttle < 1 {
                    return Err(AlertError::Validation(format!(
                        "trigger '{}': throttle_duration must be at least 1 minute",
                        trigger.name
                    )));
                }
            }
        }
        if let Some(window) = self.look_back_window {
            if window < 1 {
                return Err(AlertError::Validation(
                    "look_back_window must be at least 1 minute".to_string(),
                ));
            }
            if self.timestamp_field.is_empty() {
                return Err(AlertError::Validation(
                    "timestamp_field is required when look_back_window is set".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn trigger(&self, trigger_id: &str) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.id == trigger_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// Raw response shape returned by the PQL executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub schema: Vec<ColumnSchema>,
    pub datarows: Vec<Vec<serde_json::Value>>,
    pub total: u64,
    pub size: u64,
}

impl QueryResponse {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.iter().position(|c| c.name == name)
    }

    /// A copy holding just the row at `index`, with the parent schema and
    /// `total = size = 1`.
    pub fn single_row(&self, index: usize) -> Option<QueryResponse> {
        let row = self.datarows.get(index)?;
        Some(QueryResponse {
            schema: self.schema.clone(),
            datarows: vec![row.clone()],
            total: 1,
            size: 1,
        })
    }
}

/// A persisted alert document. Immutable once written; the lifecycle sweeper
/// archives or deletes it, never edits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub monitor_id: String,
    pub monitor_name: String,
    pub monitor_version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_user: Option<UserSnapshot>,
    pub trigger_id: String,
    pub trigger_name: String,
    /// The user's query as written, before any rewriting.
    pub query: String,
    pub query_results: QueryResponse,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub triggered_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expiration_time: DateTime<Utc>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub execution_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trigger() -> Trigger {
        Trigger {
            id: "t1".to_string(),
            name: "errors seen".to_string(),
            severity: Severity::Warn,
            mode: TriggerMode::ResultSet,
            condition: TriggerCondition::NumberOfResults {
                op: CompareOp::Gt,
                value: 0,
            },
            throttle_duration: Some(10),
            expire_duration: 60,
            actions: vec![],
            last_fired_time: None,
        }
    }

    fn sample_monitor() -> Monitor {
        Monitor {
            id: "m1".to_string(),
            version: 1,
            name: "error watcher".to_string(),
            monitor_type: MonitorType::Pql,
            enabled: true,
            enabled_time: Some(Utc::now()),
            user: None,
            schedule: Schedule {
                interval: 5,
                unit: ScheduleUnit::Minutes,
            },
            look_back_window: None,
            timestamp_field: "@timestamp".to_string(),
            query_language: "pql".to_string(),
            query: "source=logs | where level = 'ERROR'".to_string(),
            triggers: vec![sample_trigger()],
        }
    }

    #[test]
    fn validate_accepts_well_formed_monitor() {
        assert!(sample_monitor().validate().is_ok());
    }

    #[test]
    fn validate_rejects_enabled_without_enabled_time() {
        let mut monitor = sample_monitor();
        monitor.enabled_time = None;
        assert!(monitor.validate().is_err());

        let mut monitor = sample_monitor();
        monitor.enabled = false;
        // disabled monitors must not carry an enabled_time either
        assert!(monitor.validate().is_err());
        monitor.enabled_time = None;
        assert!(monitor.validate().is_ok());
    }

    #[test]
    fn validate_rejects_trigger_count_out_of_range() {
        let mut monitor = sample_monitor();
        monitor.triggers.clear();
        assert!(monitor.validate().is_err());

        monitor.triggers = (0..11).map(|_| sample_trigger()).collect();
        assert!(monitor.validate().is_err());
    }

    #[test]
    fn validate_rejects_sub_minute_durations() {
        let mut monitor = sample_monitor();
        monitor.triggers[0].expire_duration = 0;
        assert!(monitor.validate().is_err());

        let mut monitor = sample_monitor();
        monitor.triggers[0].throttle_duration = Some(0);
        assert!(monitor.validate().is_err());
    }

    #[test]
    fn compare_op_covers_all_comparisons() {
        assert!(CompareOp::Gt.check(3, 2));
        assert!(!CompareOp::Gt.check(2, 2));
        assert!(CompareOp::Gte.check(2, 2));
        assert!(CompareOp::Lt.check(1, 2));
        assert!(CompareOp::Lte.check(2, 2));
        assert!(CompareOp::Eq.check(2, 2));
        assert!(CompareOp::Neq.check(3, 2));
        assert!(!CompareOp::Neq.check(2, 2));
    }

    #[test]
    fn alert_serializes_times_as_epoch_millis() {
        let triggered = Utc::now();
        let alert = Alert {
            id: "a1".to_string(),
            monitor_id: "m1".to_string(),
            monitor_name: "error watcher".to_string(),
            monitor_version: 1,
            monitor_user: None,
            trigger_id: "t1".to_string(),
            trigger_name: "errors seen".to_string(),
            query: "source=logs".to_string(),
            query_results: QueryResponse::default(),
            triggered_time: triggered,
            expiration_time: triggered + Duration::minutes(60),
            severity: Severity::Warn,
            error_message: None,
            execution_id: "e1".to_string(),
        };

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["triggered_time"], triggered.timestamp_millis());
        assert_eq!(json["severity"], "warn");
        assert!(json.get("error_message").is_none());

        let back: Alert = serde_json::from_value(json).unwrap();
        assert_eq!(back.trigger_id, "t1");
    }

    #[test]
    fn trigger_condition_round_trips_through_tagged_json() {
        let custom = TriggerCondition::Custom {
            fragment: "eval flag = number > 7".to_string(),
        };
        let json = serde_json::to_value(&custom).unwrap();
        assert_eq!(json["condition_type"], "custom");

        let number = TriggerCondition::NumberOfResults {
            op: CompareOp::Gte,
            value: 3,
        };
        let json = serde_json::to_value(&number).unwrap();
        assert_eq!(json["op"], ">=");
        let back: TriggerCondition = serde_json::from_value(json).unwrap();
        assert_eq!(back, number);
    }
}
