//! Driver-level metrics (aggregate across all volumes).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Storage for driver-wide counters.
///
/// All counters are monotonic (never decrease).
#[derive(Clone, Default)]
pub struct DriverMetricsStorage {
    pub(crate) volumes_created: Arc<AtomicU64>,
    pub(crate) volumes_deleted: Arc<AtomicU64>,
    pub(crate) mounts: Arc<AtomicU64>,
    pub(crate) mount_failures: Arc<AtomicU64>,
    pub(crate) unmounts: Arc<AtomicU64>,
    pub(crate) sessions_lost: Arc<AtomicU64>,
}

impl DriverMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle for querying driver-wide metrics.
///
/// Cloneable, lightweight handle (only Arc pointers).
#[derive(Clone)]
pub struct DriverMetrics {
    storage: DriverMetricsStorage,
}

impl DriverMetrics {
    pub(crate) fn new(storage: DriverMetricsStorage) -> Self {
        Self { storage }
    }

    /// Volumes created since the driver was opened.
    pub fn volumes_created_total(&self) -> u64 {
        self.storage.volumes_created.load(Ordering::Relaxed)
    }

    pub fn volumes_deleted_total(&self) -> u64 {
        self.storage.volumes_deleted.load(Ordering::Relaxed)
    }

    /// Successful mounts.
    pub fn mounts_total(&self) -> u64 {
        self.storage.mounts.load(Ordering::Relaxed)
    }

    /// Mounts that failed after a session was established
    /// (mount error at readiness, readiness timeout, or store failure).
    pub fn mount_failures_total(&self) -> u64 {
        self.storage.mount_failures.load(Ordering::Relaxed)
    }

    pub fn unmounts_total(&self) -> u64 {
        self.storage.unmounts.load(Ordering::Relaxed)
    }

    /// Sessions found dead by `refresh_sessions` without an Unmount.
    pub fn sessions_lost_total(&self) -> u64 {
        self.storage.sessions_lost.load(Ordering::Relaxed)
    }

    /// Volumes currently served by this process.
    pub fn mounted_now(&self) -> u64 {
        self.mounts_total()
            .saturating_sub(self.unmounts_total())
            .saturating_sub(self.sessions_lost_total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_reads_shared_counters() {
        let storage = DriverMetricsStorage::new();
        let metrics = DriverMetrics::new(storage.clone());

        DriverMetricsStorage::incr(&storage.mounts);
        DriverMetricsStorage::incr(&storage.mounts);
        DriverMetricsStorage::incr(&storage.unmounts);

        assert_eq!(metrics.mounts_total(), 2);
        assert_eq!(metrics.mounted_now(), 1);
        assert_eq!(metrics.volumes_created_total(), 0);
    }
}
