use std::sync::Arc;

use querymon_common::error::{AlertError, Result};
use querymon_common::types::{Alert, Monitor};

use crate::backend::{AlertIndex, BulkOp, MonitorStore};
use crate::retry::BackoffPolicy;

/// At-least-once persistence of alerts, routed by monitor id so all alerts
/// for one monitor co-locate. Duplicates after a crashed-run retry are
/// tolerated by design; deduplication belongs to downstream consumers.
pub struct AlertStore {
    index: Arc<dyn AlertIndex>,
    monitors: Arc<dyn MonitorStore>,
    backoff: BackoffPolicy,
}

impl AlertStore {
    pub fn new(
        index: Arc<dyn AlertIndex>,
        monitors: Arc<dyn MonitorStore>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            index,
            monitors,
            backoff,
        }
    }

    pub fn index(&self) -> &Arc<dyn AlertIndex> {
        &self.index
    }

    pub fn monitors(&self) -> &Arc<dyn MonitorStore> {
        &self.monitors
    }

    /// Write `alerts` in one bulk request with refresh-immediate. Items that
    /// come back 429 are retried under the backoff policy; any other item
    /// failure aborts with the first failing cause. Preset alert ids are
    /// honored (the re-save path); empty ids let the backend assign.
    pub async fn save_alerts(&self, alerts: &[Alert], monitor: &Monitor) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }

        let mut pending: Vec<BulkOp> = alerts
            .iter()
            .map(|alert| {
                let doc = serde_json::to_value(alert).map_err(|e| {
                    AlertError::Fatal(format!("alert {} failed to serialize: {e}", alert.id))
                })?;
                Ok(BulkOp::Index {
                    id: (!alert.id.is_empty()).then(|| alert.id.clone()),
                    routing: Some(monitor.id.clone()),
                    version: None,
                    doc,
                })
            })
            .collect::<Result<_>>()?;

        let mut attempt = 0u32;
        loop {
            let results = self.index.bulk_active(pending.clone(), true).await?;

            let mut throttled = Vec::new();
            for (op, result) in pending.iter().zip(&results) {
                if result.is_success() {
                    continue;
                }
                if result.is_throttled() {
                    throttled.push(op.clone());
                } else {
                    return Err(AlertError::Fatal(format!(
                        "alert bulk write failed with status {}: {}",
                        result.status,
                        result.error.as_deref().unwrap_or("unknown cause")
                    )));
                }
            }

            if throttled.is_empty() {
                return Ok(());
            }
            if attempt >= self.backoff.max_retries {
                return Err(AlertError::Fatal(format!(
                    "alert bulk write still throttled after {} retries",
                    self.backoff.max_retries
                )));
            }

            tracing::debug!(
                throttled = throttled.len(),
                attempt,
                "alert bulk write throttled, backing off"
            );
            tokio::time::sleep(self.backoff.delay(attempt)).await;
            attempt += 1;
            pending = throttled;
        }
    }

    /// Persist the `last_fired_time` values carried on the monitor's
    /// triggers by re-indexing the whole monitor document (routing = monitor
    /// id). Called only for runs where at least one trigger fired.
    pub async fn update_monitor_last_fired_times(&self, monitor: &Monitor) -> Result<()> {
        self.monitors.index_monitor(monitor).await
    }
}
