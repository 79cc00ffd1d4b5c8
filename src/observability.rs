//! In-process counters for log shipping and generation calls

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle shared by the logger, transport and orchestrator
#[derive(Debug, Default)]
pub struct Metrics {
    batches_delivered: AtomicU64,
    records_delivered: AtomicU64,
    transport_failures: AtomicU64,
    records_lost: AtomicU64,
    invocations_succeeded: AtomicU64,
    invocations_failed: AtomicU64,
    rate_limit_waits: AtomicU64,
    retries: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_delivered(&self, records: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.records_delivered
            .fetch_add(records as u64, Ordering::Relaxed);
        tracing::debug!(counter = "batches_delivered", records, "Metric incremented");
    }

    pub fn transport_failed(&self, records: usize) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
        self.records_lost.fetch_add(records as u64, Ordering::Relaxed);
        tracing::debug!(counter = "transport_failures", records, "Metric incremented");
    }

    pub fn invocation_succeeded(&self) {
        self.invocations_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invocation_failed(&self) {
        self.invocations_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "invocations_failed", "Metric incremented");
    }

    pub fn rate_limit_waited(&self) {
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retried(&self, count: u64) {
        if count > 0 {
            self.retries.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            records_lost: self.records_lost.load(Ordering::Relaxed),
            invocations_succeeded: self.invocations_succeeded.load(Ordering::Relaxed),
            invocations_failed: self.invocations_failed.load(Ordering::Relaxed),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub batches_delivered: u64,
    pub records_delivered: u64,
    pub transport_failures: u64,
    pub records_lost: u64,
    pub invocations_succeeded: u64,
    pub invocations_failed: u64,
    pub rate_limit_waits: u64,
    pub retries: u64,
}
