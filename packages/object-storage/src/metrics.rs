use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Usage counters of a single space.
#[derive(Debug, Default)]
pub struct SpaceMetrics {
    uploads: AtomicU64,
    downloads: AtomicU64,
    streams: AtomicU64,
    deliveries: AtomicU64,
    fallbacks: AtomicU64,
    delivery_client_failures: AtomicU64,
    delivery_server_failures: AtomicU64,
}

/// Point-in-time copy of [`SpaceMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uploads: u64,
    pub downloads: u64,
    pub streams: u64,
    pub deliveries: u64,
    pub fallbacks: u64,
    pub delivery_client_failures: u64,
    pub delivery_server_failures: u64,
}

impl SpaceMetrics {
    pub(crate) fn record_upload(&self) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_download(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stream(&self) {
        self.streams.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed delivery by the class of its status code.
    pub(crate) fn record_delivery_failure(&self, status: u16) {
        if status >= 500 {
            self.delivery_server_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            self.delivery_client_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            streams: self.streams.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            delivery_client_failures: self.delivery_client_failures.load(Ordering::Relaxed),
            delivery_server_failures: self.delivery_server_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_split_by_status_class() {
        let metrics = SpaceMetrics::default();
        metrics.record_delivery_failure(404);
        metrics.record_delivery_failure(410);
        metrics.record_delivery_failure(503);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.delivery_client_failures, 2);
        assert_eq!(snapshot.delivery_server_failures, 1);
    }
}
