use async_trait::async_trait;
use querymon_common::error::Result;
use querymon_common::types::{Alert, Monitor};

/// One document operation in a bulk request.
#[derive(Debug, Clone)]
pub enum BulkOp {
    /// Create or overwrite a document. `version: Some(v)` requests
    /// external-gte concurrency control; `None` lets the backend assign
    /// internal versioning. `id: None` lets the backend choose the id.
    Index {
        id: Option<String>,
        routing: Option<String>,
        version: Option<i64>,
        doc: serde_json::Value,
    },
    /// Delete by id, guarded by external-gte version when set.
    Delete {
        id: String,
        routing: Option<String>,
        version: Option<i64>,
    },
}

/// Per-item outcome of a bulk request, HTTP-status shaped like the cluster's
/// bulk API reports them.
#[derive(Debug, Clone)]
pub struct BulkItemResult {
    pub id: String,
    pub status: u16,
    pub version: i64,
    pub error: Option<String>,
}

impl BulkItemResult {
    pub fn is_success(&self) -> bool {
        self.status < 300
    }

    /// The store pushed back; the only per-item status worth retrying.
    pub fn is_throttled(&self) -> bool {
        self.status == 429
    }
}

/// An alert document paired with its concurrency-control version.
#[derive(Debug, Clone)]
pub struct VersionedAlert {
    pub alert: Alert,
    pub version: i64,
}

/// Scheduled-jobs collection: monitor documents keyed and routed by monitor
/// id. The document envelope carries `_meta.schema_version`; a backend
/// upgrades its mapping when the stored version lags the code's.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>>;

    /// Match-all over the collection, up to `limit` documents.
    async fn search_monitors(&self, limit: usize) -> Result<Vec<Monitor>>;

    /// Write the full monitor document (routing = monitor id). Trigger and
    /// action ids are part of the serialized document, so a re-index
    /// round-trips them unchanged.
    async fn index_monitor(&self, monitor: &Monitor) -> Result<()>;

    /// Bring the collection mapping up to the current schema version.
    /// Idempotent; callers gate it behind the process-wide latch.
    async fn upgrade_mapping(&self) -> Result<()>;
}

/// The active alert collection and the history write-alias.
#[async_trait]
pub trait AlertIndex: Send + Sync {
    /// Create the active collection if missing. Idempotent.
    async fn ensure_active_index(&self) -> Result<()>;

    /// Create the history rollover alias if missing. Idempotent.
    async fn ensure_history_alias(&self) -> Result<()>;

    fn active_initialized(&self) -> bool;

    fn history_initialized(&self) -> bool;

    /// Bulk request against the active collection. `refresh` asks for
    /// refresh-immediate so readers observe the writes when the call
    /// returns. A transport-level failure is an `Err`; per-item failures
    /// come back in the results.
    async fn bulk_active(&self, ops: Vec<BulkOp>, refresh: bool) -> Result<Vec<BulkItemResult>>;

    /// Bulk request against the history write-alias.
    async fn bulk_history(&self, ops: Vec<BulkOp>) -> Result<Vec<BulkItemResult>>;

    /// Match-all over active alerts with versions, up to `limit`.
    async fn search_active(&self, limit: usize) -> Result<Vec<VersionedAlert>>;
}
