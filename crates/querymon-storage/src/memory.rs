use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use querymon_common::error::{AlertError, Result};
use querymon_common::types::{Alert, Monitor};
use tokio::sync::RwLock;

use crate::backend::{AlertIndex, BulkItemResult, BulkOp, MonitorStore, VersionedAlert};

/// Mapping schema version the current code writes.
pub const SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Clone)]
struct StoredDoc {
    version: i64,
    routing: Option<String>,
    doc: serde_json::Value,
}

/// Single-process stand-in for the backing cluster, used by tests and
/// single-node deployments. Implements the same routing and external-gte
/// versioning rules the real collections enforce.
#[derive(Default)]
pub struct InMemoryCluster {
    monitors: RwLock<HashMap<String, StoredDoc>>,
    active: RwLock<HashMap<String, StoredDoc>>,
    history: RwLock<HashMap<String, StoredDoc>>,
    active_ready: AtomicBool,
    history_ready: AtomicBool,
    schema_version: AtomicI64,
    next_auto_id: AtomicI64,
    /// Statuses injected into upcoming bulk items, one per op, for tests.
    queued_item_failures: Mutex<VecDeque<u16>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the next `count` bulk items (across active and history calls)
    /// to report `status` without applying the operation.
    pub fn fail_next_bulk_items(&self, status: u16, count: usize) {
        let mut queue = self.queued_item_failures.lock().unwrap();
        for _ in 0..count {
            queue.push_back(status);
        }
    }

    pub fn schema_version(&self) -> i64 {
        self.schema_version.load(Ordering::SeqCst)
    }

    pub async fn active_alerts(&self) -> Vec<Alert> {
        Self::decode_alerts(&self.active).await
    }

    pub async fn history_alerts(&self) -> Vec<Alert> {
        Self::decode_alerts(&self.history).await
    }

    /// Routing key recorded for an active alert document.
    pub async fn active_routing(&self, id: &str) -> Option<String> {
        self.active.read().await.get(id).and_then(|d| d.routing.clone())
    }

    /// Stored version of a history document, if present.
    pub async fn history_version(&self, id: &str) -> Option<i64> {
        self.history.read().await.get(id).map(|d| d.version)
    }

    async fn decode_alerts(map: &RwLock<HashMap<String, StoredDoc>>) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = map
            .read()
            .await
            .values()
            .filter_map(|d| serde_json::from_value(d.doc.clone()).ok())
            .collect();
        alerts.sort_by(|a: &Alert, b: &Alert| a.id.cmp(&b.id));
        alerts
    }

    fn next_injected_status(&self) -> Option<u16> {
        self.queued_item_failures.lock().unwrap().pop_front()
    }

    fn auto_id(&self) -> String {
        format!("auto-{}", self.next_auto_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn apply_bulk(
        &self,
        map: &RwLock<HashMap<String, StoredDoc>>,
        ops: Vec<BulkOp>,
    ) -> Vec<BulkItemResult> {
        let mut guard = map.write().await;
        let mut results = Vec::with_capacity(ops.len());

        for op in ops {
            if let Some(status) = self.next_injected_status() {
                let id = match &op {
                    BulkOp::Index { id, .. } => id.clone().unwrap_or_default(),
                    BulkOp::Delete { id, .. } => id.clone(),
                };
                results.push(BulkItemResult {
                    id,
                    status,
                    version: 0,
                    error: Some(format!("injected status {status}")),
                });
                continue;
            }

            let result = match op {
                BulkOp::Index {
                    id,
                    routing,
                    version,
                    doc,
                } => {
                    let id = id.unwrap_or_else(|| self.auto_id());
                    let current = guard.get(&id).map(|d| d.version);
                    match (version, current) {
                        // external-gte: reject writes older than the stored copy
                        (Some(v), Some(cur)) if v < cur => BulkItemResult {
                            id,
                            status: 409,
                            version: cur,
                            error: Some("version conflict, current is newer".to_string()),
                        },
                        (requested, current) => {
                            let version = requested.unwrap_or(current.unwrap_or(0) + 1);
                            guard.insert(
                                id.clone(),
                                StoredDoc {
                                    version,
                                    routing,
                                    doc,
                                },
                            );
                            BulkItemResult {
                                id,
                                status: if current.is_some() { 200 } else { 201 },
                                version,
                                error: None,
                            }
                        }
                    }
                }
                BulkOp::Delete { id, version, .. } => match guard.get(&id) {
                    None => BulkItemResult {
                        id,
                        status: 404,
                        version: 0,
                        error: Some("document missing".to_string()),
                    },
                    Some(existing) => match version {
                        Some(v) if v < existing.version => BulkItemResult {
                            id,
                            status: 409,
                            version: existing.version,
                            error: Some("version conflict, current is newer".to_string()),
                        },
                        _ => {
                            let version = version.unwrap_or(existing.version);
                            guard.remove(&id);
                            BulkItemResult {
                                id,
                                status: 200,
                                version,
                                error: None,
                            }
                        }
                    },
                },
            };
            results.push(result);
        }

        results
    }
}

#[async_trait]
impl MonitorStore for InMemoryCluster {
    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>> {
        let guard = self.monitors.read().await;
        match guard.get(id) {
            None => Ok(None),
            Some(stored) => serde_json::from_value(stored.doc.clone())
                .map(Some)
                .map_err(|e| AlertError::Fatal(format!("stored monitor {id} is corrupt: {e}"))),
        }
    }

    async fn search_monitors(&self, limit: usize) -> Result<Vec<Monitor>> {
        let guard = self.monitors.read().await;
        let mut monitors: Vec<Monitor> = guard
            .values()
            .filter_map(|d| serde_json::from_value(d.doc.clone()).ok())
            .collect();
        monitors.sort_by(|a, b| a.id.cmp(&b.id));
        monitors.truncate(limit);
        Ok(monitors)
    }

    async fn index_monitor(&self, monitor: &Monitor) -> Result<()> {
        let doc = serde_json::to_value(monitor)
            .map_err(|e| AlertError::Fatal(format!("monitor failed to serialize: {e}")))?;
        let mut guard = self.monitors.write().await;
        let version = guard.get(&monitor.id).map(|d| d.version).unwrap_or(0) + 1;
        guard.insert(
            monitor.id.clone(),
            StoredDoc {
                version,
                routing: Some(monitor.id.clone()),
                doc,
            },
        );
        Ok(())
    }

    async fn upgrade_mapping(&self) -> Result<()> {
        let previous = self.schema_version.swap(SCHEMA_VERSION, Ordering::SeqCst);
        if previous < SCHEMA_VERSION {
            tracing::info!(from = previous, to = SCHEMA_VERSION, "monitor mapping upgraded");
        }
        Ok(())
    }
}

#[async_trait]
impl AlertIndex for InMemoryCluster {
    async fn ensure_active_index(&self) -> Result<()> {
        self.active_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn ensure_history_alias(&self) -> Result<()> {
        self.history_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn active_initialized(&self) -> bool {
        self.active_ready.load(Ordering::SeqCst)
    }

    fn history_initialized(&self) -> bool {
        self.history_ready.load(Ordering::SeqCst)
    }

    async fn bulk_active(&self, ops: Vec<BulkOp>, _refresh: bool) -> Result<Vec<BulkItemResult>> {
        Ok(self.apply_bulk(&self.active, ops).await)
    }

    async fn bulk_history(&self, ops: Vec<BulkOp>) -> Result<Vec<BulkItemResult>> {
        Ok(self.apply_bulk(&self.history, ops).await)
    }

    async fn search_active(&self, limit: usize) -> Result<Vec<VersionedAlert>> {
        let guard = self.active.read().await;
        let mut alerts = Vec::new();
        for stored in guard.values() {
            let alert: Alert = serde_json::from_value(stored.doc.clone())
                .map_err(|e| AlertError::Fatal(format!("stored alert is corrupt: {e}")))?;
            alerts.push(VersionedAlert {
                alert,
                version: stored.version,
            });
        }
        alerts.sort_by(|a, b| a.alert.id.cmp(&b.alert.id));
        alerts.truncate(limit);
        Ok(alerts)
    }
}
