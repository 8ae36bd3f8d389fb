use querymon_common::types::QueryResponse;

/// Row stored in place of results that exceeded the configured size cap.
pub const RESULTS_TOO_LARGE_ROW: &str =
    "The original query results were too large and thus excluded";

/// Enforce the serialized-size cap on a result slice bound for an alert
/// document. Oversized slices keep their schema, `total`, and `size` but
/// carry a single explanatory row instead of the data.
pub fn cap_size(response: &QueryResponse, max_bytes: usize) -> QueryResponse {
    let serialized_len = serde_json::to_vec(response).map(|v| v.len()).unwrap_or(0);
    if serialized_len <= max_bytes {
        return response.clone();
    }

    QueryResponse {
        schema: response.schema.clone(),
        datarows: vec![vec![serde_json::Value::String(
            RESULTS_TOO_LARGE_ROW.to_string(),
        )]],
        total: response.total,
        size: response.size,
    }
}
