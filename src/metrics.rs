//! # Metrics
//!
//! Named counters/gauges registered with a Prometheus registry, mirroring
//! the platform's `register_*_with_registry!` pattern. Every counter named
//! in the component design is backed by both a plain atomic (read by the
//! invariant checks / `toString()` reporters) and a Prometheus metric
//! (exported via `/metrics`).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};
use tracing::warn;

use crate::error::{Result, TimelineError};

pub struct MetricsCollector {
    registry: Registry,
    enabled: bool,

    spark_events_queued: IntCounter,
    events_dropped: IntCounter,
    entity_post_failures: IntCounter,
    entity_post_successes: IntCounter,
    entity_post_rejections: IntCounter,
    events_successfully_posted: IntCounter,
    flush_count: IntCounter,
    posting_queue_event_size: IntGauge,
    online_session_num: IntGauge,
    total_running: IntGauge,

    // Plain atomics backing the same counters, read synchronously by
    // invariant checks that don't want to go through Prometheus's own
    // internal locking.
    spark_events_queued_raw: AtomicU64,
    events_dropped_raw: AtomicU64,
    entity_post_failures_raw: AtomicU64,
    entity_post_successes_raw: AtomicU64,
    entity_post_rejections_raw: AtomicU64,
    events_successfully_posted_raw: AtomicU64,
    flush_count_raw: AtomicU64,
    online_session_num_raw: AtomicI64,
    total_running_raw: AtomicI64,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Result<Self> {
        let registry = Registry::new();

        macro_rules! counter {
            ($name:literal, $help:literal) => {
                prometheus::register_int_counter_with_registry!($name, $help, registry)
                    .map_err(|e| TimelineError::internal(e.to_string()))?
            };
        }
        macro_rules! gauge {
            ($name:literal, $help:literal) => {
                prometheus::register_int_gauge_with_registry!($name, $help, registry)
                    .map_err(|e| TimelineError::internal(e.to_string()))?
            };
        }

        Ok(Self {
            spark_events_queued: counter!("spark_events_queued_total", "Total events observed by process()"),
            events_dropped: counter!("events_dropped_total", "Events dropped by capacity policy"),
            entity_post_failures: counter!("entity_post_failures_total", "Transient post failures"),
            entity_post_successes: counter!("entity_post_successes_total", "Successful entity posts"),
            entity_post_rejections: counter!("entity_post_rejections_total", "Permanent post rejections"),
            events_successfully_posted: counter!(
                "events_successfully_posted_total",
                "Events confirmed posted to the timeline server"
            ),
            flush_count: counter!("flush_count_total", "Number of publishPendingEvents flushes"),
            posting_queue_event_size: gauge!("posting_queue_event_size", "Sum of queued action sizes"),
            online_session_num: gauge!("online_session_num", "Currently open UI sessions"),
            total_running: gauge!("total_running", "Currently running statements"),
            registry,
            enabled,
            spark_events_queued_raw: AtomicU64::new(0),
            events_dropped_raw: AtomicU64::new(0),
            entity_post_failures_raw: AtomicU64::new(0),
            entity_post_successes_raw: AtomicU64::new(0),
            entity_post_rejections_raw: AtomicU64::new(0),
            events_successfully_posted_raw: AtomicU64::new(0),
            flush_count_raw: AtomicU64::new(0),
            online_session_num_raw: AtomicI64::new(0),
            total_running_raw: AtomicI64::new(0),
        })
    }

    fn bump(&self, counter: &IntCounter, raw: &AtomicU64, by: u64) {
        if self.enabled {
            counter.inc_by(by);
        }
        raw.fetch_add(by, Ordering::SeqCst);
    }

    pub fn inc_spark_events_queued(&self) -> u64 {
        self.bump(&self.spark_events_queued, &self.spark_events_queued_raw, 1);
        self.spark_events_queued_raw.load(Ordering::SeqCst)
    }

    pub fn spark_events_queued(&self) -> u64 {
        self.spark_events_queued_raw.load(Ordering::SeqCst)
    }

    pub fn inc_events_dropped(&self) {
        self.bump(&self.events_dropped, &self.events_dropped_raw, 1);
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped_raw.load(Ordering::SeqCst)
    }

    pub fn inc_entity_post_failures(&self) {
        self.bump(&self.entity_post_failures, &self.entity_post_failures_raw, 1);
    }

    pub fn entity_post_failures(&self) -> u64 {
        self.entity_post_failures_raw.load(Ordering::SeqCst)
    }

    pub fn inc_entity_post_successes(&self) {
        self.bump(&self.entity_post_successes, &self.entity_post_successes_raw, 1);
    }

    pub fn entity_post_successes(&self) -> u64 {
        self.entity_post_successes_raw.load(Ordering::SeqCst)
    }

    pub fn inc_entity_post_rejections(&self) {
        self.bump(&self.entity_post_rejections, &self.entity_post_rejections_raw, 1);
    }

    pub fn entity_post_rejections(&self) -> u64 {
        self.entity_post_rejections_raw.load(Ordering::SeqCst)
    }

    pub fn add_events_successfully_posted(&self, by: u64) {
        self.bump(
            &self.events_successfully_posted,
            &self.events_successfully_posted_raw,
            by,
        );
    }

    pub fn events_successfully_posted(&self) -> u64 {
        self.events_successfully_posted_raw.load(Ordering::SeqCst)
    }

    pub fn inc_flush_count(&self) -> u64 {
        self.bump(&self.flush_count, &self.flush_count_raw, 1);
        self.flush_count_raw.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count_raw.load(Ordering::SeqCst)
    }

    pub fn set_posting_queue_event_size(&self, size: i64) {
        if self.enabled {
            self.posting_queue_event_size.set(size);
        }
    }

    pub fn inc_online_session_num(&self) {
        if self.enabled {
            self.online_session_num.inc();
        }
        self.online_session_num_raw.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dec_online_session_num(&self) {
        if self.enabled {
            self.online_session_num.dec();
        }
        self.online_session_num_raw.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn online_session_num(&self) -> i64 {
        self.online_session_num_raw.load(Ordering::SeqCst)
    }

    pub fn inc_total_running(&self) {
        if self.enabled {
            self.total_running.inc();
        }
        self.total_running_raw.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dec_total_running(&self) {
        if self.enabled {
            self.total_running.dec();
        }
        self.total_running_raw.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn total_running(&self) -> i64 {
        self.total_running_raw.load(Ordering::SeqCst)
    }

    /// Export the current metric values in the Prometheus text exposition
    /// format, for an optional `/metrics` endpoint in the sample binary.
    pub fn export_prometheus(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode_to_string(&families)
            .map_err(|e| TimelineError::internal(e.to_string()))
    }

    /// Remove this collector's metrics from the registry, called when the
    /// service stops. Mirrors the lifecycle controller's "remove the
    /// metrics source" step. Each metric handle shares the registered
    /// collector's identity, so unregistering a clone is sufficient.
    pub fn unregister(&self) {
        if !self.enabled {
            return;
        }
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(self.spark_events_queued.clone()),
            Box::new(self.events_dropped.clone()),
            Box::new(self.entity_post_failures.clone()),
            Box::new(self.entity_post_successes.clone()),
            Box::new(self.entity_post_rejections.clone()),
            Box::new(self.events_successfully_posted.clone()),
            Box::new(self.flush_count.clone()),
            Box::new(self.posting_queue_event_size.clone()),
            Box::new(self.online_session_num.clone()),
            Box::new(self.total_running.clone()),
        ];
        for collector in collectors {
            if let Err(e) = self.registry.unregister(collector) {
                warn!(error = %e, "failed to unregister metric (non-fatal)");
            }
        }
    }
}
