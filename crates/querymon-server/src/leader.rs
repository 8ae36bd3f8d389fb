use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide cluster-state flags owned by the singleton service: whether
/// this node currently holds leadership, and whether the scheduled-jobs
/// mapping has already been brought up to the current schema version. Both
/// are flipped by the cluster-state listener.
#[derive(Debug, Default)]
pub struct LeaderState {
    is_leader: AtomicBool,
    mapping_upgraded: AtomicBool,
}

impl LeaderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub fn set_leader(&self, leader: bool) {
        self.is_leader.store(leader, Ordering::SeqCst);
    }

    /// Claim the one-shot mapping upgrade. Returns true for exactly one
    /// caller over the process lifetime.
    pub fn claim_mapping_upgrade(&self) -> bool {
        !self.mapping_upgraded.swap(true, Ordering::SeqCst)
    }

    pub fn mapping_upgraded(&self) -> bool {
        self.mapping_upgraded.load(Ordering::SeqCst)
    }
}
