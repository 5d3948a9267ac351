use metrics::{counter, describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Counters for engine outcomes. Each `record_*` call bumps the in-process
/// atomic and emits the matching Prometheus counter (a no-op until
/// [`init_metrics`] installs a recorder).
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub requests: AtomicU64,
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub mismatches: AtomicU64,
    pub stores: AtomicU64,
    pub lock_failures: AtomicU64,
    pub cancellations: AtomicU64,
    pub non_success_skips: AtomicU64,
    pub excluded_skips: AtomicU64,
    pub serialization_failures: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        counter!("idempotency_requests_total").increment(1);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!("idempotency_cache_hits_total").increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("idempotency_cache_misses_total").increment(1);
    }

    pub fn record_mismatch(&self) {
        self.mismatches.fetch_add(1, Ordering::Relaxed);
        counter!("idempotency_fingerprint_mismatches_total").increment(1);
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
        counter!("idempotency_cache_stores_total").increment(1);
    }

    pub fn record_lock_failure(&self) {
        self.lock_failures.fetch_add(1, Ordering::Relaxed);
        counter!("idempotency_lock_failures_total").increment(1);
    }

    pub fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
        counter!("idempotency_cancellations_total").increment(1);
    }

    pub fn record_non_success_skip(&self) {
        self.non_success_skips.fetch_add(1, Ordering::Relaxed);
        counter!("idempotency_non_success_skips_total").increment(1);
    }

    pub fn record_excluded_skip(&self) {
        self.excluded_skips.fetch_add(1, Ordering::Relaxed);
        counter!("idempotency_excluded_skips_total").increment(1);
    }

    pub fn record_serialization_failure(&self) {
        self.serialization_failures.fetch_add(1, Ordering::Relaxed);
        counter!("idempotency_serialization_failures_total").increment(1);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            mismatches: self.mismatches.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            lock_failures: self.lock_failures.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            non_success_skips: self.non_success_skips.load(Ordering::Relaxed),
            excluded_skips: self.excluded_skips.load(Ordering::Relaxed),
            serialization_failures: self.serialization_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub mismatches: u64,
    pub stores: u64,
    pub lock_failures: u64,
    pub cancellations: u64,
    pub non_success_skips: u64,
    pub excluded_skips: u64,
    pub serialization_failures: u64,
}

impl MetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Installs the Prometheus recorder and registers counter descriptions.
pub fn init_metrics() -> PrometheusHandle {
    let handle = METRICS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        describe_metrics();
        handle
    });

    handle.clone()
}

fn describe_metrics() {
    describe_counter!(
        "idempotency_requests_total",
        Unit::Count,
        "Total requests admitted through the engine"
    );
    describe_counter!(
        "idempotency_cache_hits_total",
        Unit::Count,
        "Requests short-circuited with a cached response"
    );
    describe_counter!(
        "idempotency_cache_misses_total",
        Unit::Count,
        "Requests admitted as the sole executor for their key"
    );
    describe_counter!(
        "idempotency_fingerprint_mismatches_total",
        Unit::Count,
        "Keys reused with a different request fingerprint"
    );
    describe_counter!(
        "idempotency_cache_stores_total",
        Unit::Count,
        "Responses captured into completed records"
    );
    describe_counter!(
        "idempotency_lock_failures_total",
        Unit::Count,
        "Lock acquisitions that exceeded the configured timeout"
    );
    describe_counter!(
        "idempotency_cancellations_total",
        Unit::Count,
        "Records removed after a handler fault"
    );
    describe_counter!(
        "idempotency_non_success_skips_total",
        Unit::Count,
        "Non-success results discarded under cache_only_success_responses"
    );
    describe_counter!(
        "idempotency_excluded_skips_total",
        Unit::Count,
        "Results passed through uncached due to an excluded shape"
    );
    describe_counter!(
        "idempotency_serialization_failures_total",
        Unit::Count,
        "Best-effort capture encodings that failed"
    );
}
