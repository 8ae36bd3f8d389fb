use serde::Deserialize;
use std::sync::{Arc, RwLock};

/// Dynamic alerting settings, hot-reloadable at runtime. Readers take a
/// snapshot per operation; a sweep or monitor run never observes a
/// mid-flight mix of old and new values.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertSettings {
    /// When false the sweeper hard-deletes expired alerts instead of
    /// archiving them to the history alias.
    #[serde(default = "default_history_enabled")]
    pub history_enabled: bool,
    #[serde(default = "default_history_rollover_period_secs")]
    pub history_rollover_period_secs: u64,
    #[serde(default = "default_history_index_max_age_secs")]
    pub history_index_max_age_secs: u64,
    #[serde(default = "default_history_max_docs")]
    pub history_max_docs: u64,
    #[serde(default = "default_history_retention_period_secs")]
    pub history_retention_period_secs: u64,
    /// Row cap handed to the composer's `head` stage.
    #[serde(default = "default_query_results_max_datarows")]
    pub query_results_max_datarows: u64,
    /// Serialized-size cap applied to stored query results.
    #[serde(default = "default_query_results_max_size_bytes")]
    pub query_results_max_size_bytes: usize,
    /// Per-result triggers produce at most this many alerts per execution.
    #[serde(default = "default_per_result_max_alerts")]
    pub per_result_max_alerts: usize,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            history_enabled: default_history_enabled(),
            history_rollover_period_secs: default_history_rollover_period_secs(),
            history_index_max_age_secs: default_history_index_max_age_secs(),
            history_max_docs: default_history_max_docs(),
            history_retention_period_secs: default_history_retention_period_secs(),
            query_results_max_datarows: default_query_results_max_datarows(),
            query_results_max_size_bytes: default_query_results_max_size_bytes(),
            per_result_max_alerts: default_per_result_max_alerts(),
        }
    }
}

fn default_history_enabled() -> bool {
    true
}

fn default_history_rollover_period_secs() -> u64 {
    12 * 3600
}

fn default_history_index_max_age_secs() -> u64 {
    30 * 86400
}

fn default_history_max_docs() -> u64 {
    1000
}

fn default_history_retention_period_secs() -> u64 {
    60 * 86400
}

fn default_query_results_max_datarows() -> u64 {
    10000
}

fn default_query_results_max_size_bytes() -> usize {
    100 * 1024
}

fn default_per_result_max_alerts() -> usize {
    10
}

/// Shared handle over the live settings. Cloning is cheap; `load` returns a
/// point-in-time snapshot, `update` swaps values in place for all holders.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<AlertSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: AlertSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn load(&self) -> AlertSettings {
        self.inner.read().unwrap().clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut AlertSettings)) {
        let mut guard = self.inner.write().unwrap();
        apply(&mut guard);
    }
}
