//! Operational counters for the backup layer.
//!
//! Monotonic, `Relaxed` atomics: good enough for dashboards, not for
//! cross-thread ordering.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters, shared by every component of a [`BackupService`](crate::BackupService).
#[derive(Debug, Default)]
pub struct BackupStats {
    uploads: AtomicU64,
    replicas_created: AtomicU64,
    replication_failures: AtomicU64,
    deliveries: AtomicU64,
    fallback_deliveries: AtomicU64,
    failed_attempts: AtomicU64,
    unrecoverable: AtomicU64,
    probes: AtomicU64,
    stale_observations: AtomicU64,
}

/// Point-in-time copy of [`BackupStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub uploads: u64,
    pub replicas_created: u64,
    pub replication_failures: u64,
    pub deliveries: u64,
    /// Deliveries served by a replica instead of the origin.
    pub fallback_deliveries: u64,
    pub failed_attempts: u64,
    pub unrecoverable: u64,
    pub probes: u64,
    /// Status writes discarded because a newer observation was already stored.
    pub stale_observations: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl BackupStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn upload(&self) {
        bump(&self.uploads);
    }

    pub(crate) fn replica_created(&self) {
        bump(&self.replicas_created);
    }

    pub(crate) fn replication_failed(&self) {
        bump(&self.replication_failures);
    }

    pub(crate) fn delivered(&self, fallback: bool) {
        bump(&self.deliveries);
        if fallback {
            bump(&self.fallback_deliveries);
        }
    }

    pub(crate) fn attempt_failed(&self) {
        bump(&self.failed_attempts);
    }

    pub(crate) fn unrecoverable(&self) {
        bump(&self.unrecoverable);
    }

    pub(crate) fn probed(&self) {
        bump(&self.probes);
    }

    pub(crate) fn stale_observation(&self) {
        bump(&self.stale_observations);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            uploads: get(&self.uploads),
            replicas_created: get(&self.replicas_created),
            replication_failures: get(&self.replication_failures),
            deliveries: get(&self.deliveries),
            fallback_deliveries: get(&self.fallback_deliveries),
            failed_attempts: get(&self.failed_attempts),
            unrecoverable: get(&self.unrecoverable),
            probes: get(&self.probes),
            stale_observations: get(&self.stale_observations),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = BackupStats::new();
        stats.upload();
        stats.delivered(false);
        stats.delivered(true);
        stats.attempt_failed();
        stats.attempt_failed();

        let snap = stats.snapshot();
        assert_eq!(snap.uploads, 1);
        assert_eq!(snap.deliveries, 2);
        assert_eq!(snap.fallback_deliveries, 1);
        assert_eq!(snap.failed_attempts, 2);
        assert_eq!(snap.unrecoverable, 0);
    }

    #[test]
    fn concurrent_bumps() {
        let stats = std::sync::Arc::new(BackupStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        s.probed();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.snapshot().probes, 4000);
    }
}
