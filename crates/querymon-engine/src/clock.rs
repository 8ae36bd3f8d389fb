use chrono::{DateTime, Utc};

/// Source of the cluster-consistent "now" a run reads exactly once. Swap in
/// a fixed clock for tests; deployments rely on NTP-disciplined wall time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
