//! Rewrites a monitor's query for one trigger execution.
//!
//! Stages are applied in a strict order: time filter first (so the range
//! predicate constrains scans before any aggregation), then the trigger's
//! custom condition, then the row cap (so `head` bounds final output rows).
//! Composition never fails; a malformed fragment surfaces as an executor
//! error.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Inject a time-range predicate on `timestamp_field` as the first pipeline
/// stage after the source. With at least one pipe the predicate lands right
/// after the first `|`; a pipeless query gets it appended.
pub fn time_filtered(
    query: &str,
    lookback_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    timestamp_field: &str,
) -> String {
    let lower = lookback_start.format(TIMESTAMP_FORMAT);
    let upper = period_end.format(TIMESTAMP_FORMAT);
    let predicate = format!(
        "where {timestamp_field} > TIMESTAMP('{lower}') and {timestamp_field} < TIMESTAMP('{upper}')"
    );

    match query.find('|') {
        Some(idx) => {
            let (head, tail) = query.split_at(idx);
            // tail starts with the original '|'; reuse it and insert a new
            // pipe between the predicate and the remaining stages
            format!("{head}| {predicate} |{}", &tail[1..])
        }
        None => format!("{query} | {predicate}"),
    }
}

/// Append a trigger's custom condition fragment verbatim.
pub fn with_custom_condition(query: &str, fragment: &str) -> String {
    format!("{query} | {fragment}")
}

/// Cap the number of output rows.
pub fn cap(query: &str, max_rows: u64) -> String {
    format!("{query} | head {max_rows}")
}

/// Identifier bound by `eval <id> =` in a custom condition fragment; the
/// evaluator reads the trigger verdict from the column of that name.
pub fn eval_result_column(fragment: &str) -> Option<String> {
    static EVAL_RE: OnceLock<Regex> = OnceLock::new();
    let re = EVAL_RE.get_or_init(|| Regex::new(r"\beval\s+([A-Za-z_]\w*)\s*=").unwrap());
    re.captures(fragment)
        .map(|caps| caps[1].to_string())
}
