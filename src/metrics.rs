use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::HostCopyError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostClientMetricsSnapshot {
    pub pending: u64,
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub retries: u64,
    pub connections_released: u64,
    pub connections_closed: u64,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct HostClientMetrics {
    inner: Arc<HostClientMetricsInner>,
}

#[derive(Debug, Default)]
struct HostClientMetricsInner {
    pending: AtomicU64,
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    retries: AtomicU64,
    connections_released: AtomicU64,
    connections_closed: AtomicU64,
}

/// Holds one slot of the pending-call count until dropped.
pub(crate) struct PendingGuard {
    inner: Arc<HostClientMetricsInner>,
}

impl HostClientMetrics {
    pub(crate) fn enter_pending(&self) -> PendingGuard {
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
        self.inner.pending.fetch_add(1, Ordering::Relaxed);
        PendingGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub(crate) fn pending(&self) -> u64 {
        self.inner.pending.load(Ordering::Relaxed)
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connection_released(&self) {
        self.inner
            .connections_released
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connection_closed(&self) {
        self.inner.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_completed(&self, result: &Result<(), HostCopyError>) {
        let counter = match result {
            Ok(()) => &self.inner.requests_succeeded,
            Err(_) => &self.inner.requests_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> HostClientMetricsSnapshot {
        HostClientMetricsSnapshot {
            pending: self.inner.pending.load(Ordering::Relaxed),
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            connections_released: self.inner.connections_released.load(Ordering::Relaxed),
            connections_closed: self.inner.connections_closed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.pending.fetch_sub(1, Ordering::Relaxed);
    }
}
