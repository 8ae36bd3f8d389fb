use chrono::{DateTime, Duration, Utc};
use querymon_common::types::Trigger;

/// Whether a trigger is inside its cooldown window. Manual executions are
/// never throttled. A throttled trigger skips query execution entirely,
/// shedding load on hot triggers.
pub fn is_throttled(trigger: &Trigger, now: DateTime<Utc>, manual: bool) -> bool {
    if manual {
        return false;
    }
    match (trigger.throttle_duration, trigger.last_fired_time) {
        (Some(minutes), Some(last_fired)) => last_fired > now - Duration::minutes(minutes),
        _ => false,
    }
}
