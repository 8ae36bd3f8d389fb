use querymon_common::error::{AlertError, Result};
use querymon_common::types::{QueryResponse, Trigger, TriggerCondition, TriggerMode};
use querymon_query::composer;
use querymon_query::response::cap_size;

/// Decide whether the trigger fires against a query response.
///
/// Number-of-results triggers compare the response's `total`. Custom
/// triggers read the column bound by `eval <name> =` in the fragment and
/// fire when any row holds a truthy value.
pub fn evaluate(trigger: &Trigger, response: &QueryResponse) -> Result<bool> {
    match &trigger.condition {
        TriggerCondition::NumberOfResults { op, value } => Ok(op.check(response.total, *value)),
        TriggerCondition::Custom { fragment } => {
            let column_index = custom_column_index(fragment, response)?;
            Ok(response
                .datarows
                .iter()
                .any(|row| row.get(column_index).is_some_and(is_truthy)))
        }
    }
}

/// Slice the response into per-alert payloads.
///
/// Result-set mode yields one size-capped slice holding the whole response.
/// Per-result mode yields one single-row slice per satisfying row, capped at
/// `max_alerts` slices; each preserves the parent schema with
/// `total = size = 1`.
pub fn result_slices(
    trigger: &Trigger,
    response: &QueryResponse,
    max_result_bytes: usize,
    max_alerts: usize,
) -> Result<Vec<QueryResponse>> {
    match trigger.mode {
        TriggerMode::ResultSet => Ok(vec![cap_size(response, max_result_bytes)]),
        TriggerMode::PerResult => {
            let indices = satisfying_rows(trigger, response)?;
            Ok(indices
                .into_iter()
                .take(max_alerts)
                .filter_map(|i| response.single_row(i))
                .map(|slice| cap_size(&slice, max_result_bytes))
                .collect())
        }
    }
}

/// Rows that satisfy the trigger: every row for number-of-results triggers
/// (the condition lives on the total), truthy rows for custom triggers.
fn satisfying_rows(trigger: &Trigger, response: &QueryResponse) -> Result<Vec<usize>> {
    match &trigger.condition {
        TriggerCondition::NumberOfResults { .. } => Ok((0..response.datarows.len()).collect()),
        TriggerCondition::Custom { fragment } => {
            let column_index = custom_column_index(fragment, response)?;
            Ok(response
                .datarows
                .iter()
                .enumerate()
                .filter(|(_, row)| row.get(column_index).is_some_and(is_truthy))
                .map(|(i, _)| i)
                .collect())
        }
    }
}

fn custom_column_index(fragment: &str, response: &QueryResponse) -> Result<usize> {
    let column = composer::eval_result_column(fragment).ok_or_else(|| {
        AlertError::QueryFailed(format!(
            "custom condition has no 'eval <name> =' binding: {fragment}"
        ))
    })?;
    response.column_index(&column).ok_or_else(|| {
        AlertError::NotFound(format!(
            "eval column '{column}' missing from response schema"
        ))
    })
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}
