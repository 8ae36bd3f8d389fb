use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use querymon_common::error::{AlertError, Result};
use querymon_common::settings::SettingsHandle;
use querymon_common::types::Monitor;
use querymon_engine::Clock;
use querymon_storage::{AlertIndex, BulkItemResult, BulkOp, MonitorStore, VersionedAlert};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::leader::LeaderState;

/// Upper bound on documents loaded per sweep, for both alerts and monitors.
const SWEEP_SCAN_LIMIT: usize = 10000;

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    /// True when the collections were not initialized yet and nothing ran.
    pub skipped: bool,
    pub scanned: usize,
    pub expired: usize,
    pub archived: usize,
    pub deleted: usize,
}

/// One pass of the alert lifecycle: load active alerts and current monitor
/// definitions, classify expiry, then archive or hard-delete.
pub struct AlertSweeper {
    index: Arc<dyn AlertIndex>,
    monitors: Arc<dyn MonitorStore>,
    settings: SettingsHandle,
    clock: Arc<dyn Clock>,
}

impl AlertSweeper {
    pub fn new(
        index: Arc<dyn AlertIndex>,
        monitors: Arc<dyn MonitorStore>,
        settings: SettingsHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index,
            monitors,
            settings,
            clock,
        }
    }

    /// An alert expires when its monitor is gone, its trigger was removed
    /// from the monitor, or the current trigger definition's TTL has elapsed
    /// since `triggered_time`.
    fn is_expired(
        alert: &VersionedAlert,
        monitors: &HashMap<String, Monitor>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(monitor) = monitors.get(&alert.alert.monitor_id) else {
            return true;
        };
        let Some(trigger) = monitor.trigger(&alert.alert.trigger_id) else {
            return true;
        };
        now - alert.alert.triggered_time >= chrono::Duration::minutes(trigger.expire_duration)
    }

    pub async fn sweep(&self) -> Result<SweepStats> {
        if !self.index.active_initialized() || !self.index.history_initialized() {
            tracing::debug!("alert collections not initialized yet, skipping sweep");
            return Ok(SweepStats {
                skipped: true,
                ..Default::default()
            });
        }

        let now = self.clock.now();
        let alerts = self.index.search_active(SWEEP_SCAN_LIMIT).await?;
        let monitors: HashMap<String, Monitor> = self
            .monitors
            .search_monitors(SWEEP_SCAN_LIMIT)
            .await?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();

        let mut stats = SweepStats {
            scanned: alerts.len(),
            ..Default::default()
        };

        let expired: Vec<&VersionedAlert> = alerts
            .iter()
            .filter(|a| Self::is_expired(a, &monitors, now))
            .collect();
        stats.expired = expired.len();
        if expired.is_empty() {
            return Ok(stats);
        }

        let mut failures: Vec<BulkItemResult> = Vec::new();

        let deletable: Vec<&VersionedAlert> = if self.settings.load().history_enabled {
            // copy first; an alert is only deletable once its history copy
            // is acknowledged, so a failed copy loses nothing
            let copy_ops = expired
                .iter()
                .map(|a| {
                    let doc = serde_json::to_value(&a.alert).map_err(|e| {
                        AlertError::Fatal(format!("alert {} failed to serialize: {e}", a.alert.id))
                    })?;
                    Ok(BulkOp::Index {
                        id: Some(a.alert.id.clone()),
                        routing: Some(a.alert.monitor_id.clone()),
                        version: Some(a.version),
                        doc,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let copy_results = self.index.bulk_history(copy_ops).await?;

            let copied: HashSet<&str> = copy_results
                .iter()
                .filter(|r| r.is_success())
                .map(|r| r.id.as_str())
                .collect();
            failures.extend(copy_results.iter().filter(|r| !r.is_success()).cloned());
            stats.archived = copied.len();

            expired
                .iter()
                .filter(|a| copied.contains(a.alert.id.as_str()))
                .copied()
                .collect()
        } else {
            expired
        };

        if !deletable.is_empty() {
            let delete_ops = deletable
                .iter()
                .map(|a| BulkOp::Delete {
                    id: a.alert.id.clone(),
                    routing: Some(a.alert.monitor_id.clone()),
                    version: Some(a.version),
                })
                .collect();
            let delete_results = self.index.bulk_active(delete_ops, false).await?;
            stats.deleted = delete_results.iter().filter(|r| r.is_success()).count();
            failures.extend(delete_results.iter().filter(|r| !r.is_success()).cloned());
        }

        if !failures.is_empty() {
            let first = failures
                .iter()
                .find(|f| f.is_throttled())
                .unwrap_or(&failures[0]);
            let message = format!(
                "sweep bulk reported {} failures; first: id={} status={} ({})",
                failures.len(),
                first.id,
                first.status,
                first.error.as_deref().unwrap_or("no cause")
            );
            return Err(if first.is_throttled() {
                AlertError::Transient(message)
            } else {
                AlertError::Fatal(message)
            });
        }

        Ok(stats)
    }
}

/// Drives the sweeper on the elected leader: an immediate sweep on gaining
/// leadership, then fixed-delay repeats. Losing leadership cancels the
/// schedule; an in-flight sweep runs to completion because the shutdown
/// signal is only observed between sweeps.
pub struct SweeperScheduler {
    sweeper: Arc<AlertSweeper>,
    monitors: Arc<dyn MonitorStore>,
    state: Arc<LeaderState>,
    sweep_delay: Duration,
    control: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl SweeperScheduler {
    pub fn new(
        sweeper: Arc<AlertSweeper>,
        monitors: Arc<dyn MonitorStore>,
        state: Arc<LeaderState>,
        sweep_delay: Duration,
    ) -> Self {
        Self {
            sweeper,
            monitors,
            state,
            sweep_delay,
            control: Mutex::new(None),
        }
    }

    pub fn on_leader_elected(&self) {
        let mut control = self.control.lock().unwrap();
        if control.is_some() {
            return;
        }
        self.state.set_leader(true);
        tracing::info!("gained leadership, starting alert sweeps");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let sweeper = self.sweeper.clone();
        let monitors = self.monitors.clone();
        let state = self.state.clone();
        let delay = self.sweep_delay;

        let handle = tokio::spawn(async move {
            if state.claim_mapping_upgrade() {
                if let Err(e) = monitors.upgrade_mapping().await {
                    tracing::error!(error = %e, "scheduled-jobs mapping upgrade failed");
                }
            }
            loop {
                match sweeper.sweep().await {
                    Ok(stats) if !stats.skipped => {
                        tracing::info!(
                            scanned = stats.scanned,
                            expired = stats.expired,
                            archived = stats.archived,
                            deleted = stats.deleted,
                            "alert sweep finished"
                        );
                    }
                    Ok(_) => {}
                    // the next tick retries; a sweep failure is never fatal
                    Err(e) => tracing::error!(error = %e, "alert sweep failed"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::info!("alert sweep schedule stopped");
        });

        *control = Some((shutdown_tx, handle));
    }

    pub fn on_leader_lost(&self) {
        self.state.set_leader(false);
        if let Some((shutdown_tx, _handle)) = self.control.lock().unwrap().take() {
            tracing::info!("lost leadership, cancelling alert sweeps");
            let _ = shutdown_tx.send(true);
        }
    }
}
