//! # Event Intake & Policy
//!
//! The single entry point `process(event) -> bool`, implementing
//! classification, drop policy, batch-threshold flushing, and lifecycle
//! tracking.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::buffer::PendingEventBuffer;
use crate::clock::Clock;
use crate::config::{AclConfig, BatchingConfig, TimelineConfig};
use crate::entity::{create_timeline_entity, to_timeline_event, EntityContext, PostAction, TimelineEntity};
use crate::events::Event;
use crate::metrics::MetricsCollector;
use crate::queue::PostingQueue;
use crate::types::{AppAttemptDetails, SparkAppAttemptDetails};

/// Holds every piece of mutable state named in §3/§4.3: lifecycle flags,
/// captured app metadata, the pending-event buffer, and the counters that
/// feed the posting queue.
pub struct EventIntake {
    binding: AppAttemptDetails,
    buffer: PendingEventBuffer,
    queue: PostingQueue,
    metrics: Arc<MetricsCollector>,
    clock: Arc<dyn Clock>,
    batching: BatchingConfig,
    timeline: TimelineConfig,

    app_meta: Mutex<SparkAppAttemptDetails>,
    app_start_processed: AtomicBool,
    app_end_processed: AtomicBool,
    start_time: AtomicI64,
    end_time: AtomicI64,
    last_updated: AtomicI64,
    entity_version: AtomicU64,
    posting_queue_stopped: AtomicBool,
    domain_id: Mutex<Option<String>>,
}

impl EventIntake {
    pub fn new(
        binding: AppAttemptDetails,
        queue: PostingQueue,
        metrics: Arc<MetricsCollector>,
        clock: Arc<dyn Clock>,
        batching: BatchingConfig,
        timeline: TimelineConfig,
        domain_id: Option<String>,
    ) -> Self {
        Self {
            binding,
            buffer: PendingEventBuffer::new(),
            queue,
            metrics,
            clock,
            batching,
            timeline,
            app_meta: Mutex::new(SparkAppAttemptDetails::default()),
            app_start_processed: AtomicBool::new(false),
            app_end_processed: AtomicBool::new(false),
            start_time: AtomicI64::new(0),
            end_time: AtomicI64::new(0),
            last_updated: AtomicI64::new(0),
            entity_version: AtomicU64::new(0),
            posting_queue_stopped: AtomicBool::new(false),
            domain_id: Mutex::new(domain_id),
        }
    }

    pub fn mark_posting_queue_stopped(&self) {
        self.posting_queue_stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_posting_queue_stopped(&self) -> bool {
        self.posting_queue_stopped.load(Ordering::SeqCst)
    }

    pub fn application_start_seen(&self) -> bool {
        self.app_start_processed.load(Ordering::SeqCst)
    }

    pub fn application_end_seen(&self) -> bool {
        self.app_end_processed.load(Ordering::SeqCst)
    }

    /// Single entry point for events from the host's event bus. Returns
    /// `false` iff the service is not accepting events.
    pub async fn process(&self, event: Event) -> bool {
        if self.posting_queue_stopped.load(Ordering::SeqCst) {
            return false;
        }

        let queued = self.metrics.inc_spark_events_queued();
        if queued % 1000 == 0 {
            debug!(spark_events_queued = queued, "processed another 1000 events");
        }

        let now = self.clock.now_millis();
        let mut publish;
        let mut is_lifecycle = false;
        let mut push = false;

        match &event {
            Event::ApplicationStart { time, .. } => {
                publish = true;
                if self
                    .app_start_processed
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    let effective_start = if *time != 0 { *time } else { now };
                    self.start_time.store(effective_start, Ordering::SeqCst);
                    self.last_updated.store(effective_start, Ordering::SeqCst);
                    if let Event::ApplicationStart {
                        app_id,
                        attempt_id,
                        app_name,
                        spark_user,
                        ..
                    } = &event
                    {
                        let mut meta = self.app_meta.lock();
                        meta.spark_app_id = app_id.clone();
                        meta.spark_attempt_id = attempt_id.clone();
                        meta.name = app_name.clone();
                        meta.user = spark_user.clone();
                    }
                    is_lifecycle = true;
                    push = true;
                } else {
                    warn!("duplicate ApplicationStart event dropped");
                    publish = false;
                }
            }
            Event::ApplicationEnd { time } => {
                if !self.app_start_processed.load(Ordering::SeqCst) {
                    error!("ApplicationEnd received before ApplicationStart; discarding");
                    return true;
                }
                if self
                    .app_end_processed
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    self.end_time.store(*time, Ordering::SeqCst);
                    self.last_updated.store(*time, Ordering::SeqCst);
                    is_lifecycle = true;
                    push = true;
                    publish = true;
                } else {
                    warn!("duplicate ApplicationEnd event dropped");
                    publish = false;
                }
            }
            Event::BlockUpdated | Event::ExecutorMetricsUpdate => {
                publish = false;
            }
            Event::JobStart { .. } | Event::Other { .. } => {
                publish = true;
            }
        }

        if publish {
            let queued_count = self.metrics.spark_events_queued();
            let post_queue_limit = self.batching.post_queue_limit() as u64;
            if is_lifecycle || queued_count < post_queue_limit {
                if let Some(timeline_event) = to_timeline_event(&event, now) {
                    let event_count = self.buffer.add_pending_event(timeline_event);
                    if push || event_count >= self.batching.batch_size {
                        self.publish_pending_events().await;
                    }
                }
            } else {
                self.metrics.inc_events_dropped();
            }
        }

        true
    }

    /// No-op when the buffer is empty or no `ApplicationStart` has been
    /// observed yet. Otherwise builds a summary entity (and, in v1.5 mode,
    /// a paired detail entity) and enqueues each as a `PostEntity`.
    pub async fn publish_pending_events(&self) {
        if !self.app_start_processed.load(Ordering::SeqCst) {
            return;
        }
        if self.buffer.is_empty() {
            return;
        }

        self.metrics.inc_flush_count();
        let now = self.clock.now_millis();
        let version = self.entity_version.fetch_add(1, Ordering::SeqCst) + 1;

        let events = self.buffer.drain();
        let meta = self.app_meta.lock().clone();
        let domain_id = self.domain_id.lock().clone();

        let ctx = EntityContext {
            app_id: &self.binding.app_id,
            attempt_id: self.binding.attempt_id.as_deref(),
            group_id: self.binding.group_id.as_deref(),
            start_time: self.start_time.load(Ordering::SeqCst),
            end_time: self.end_time.load(Ordering::SeqCst),
            last_updated: self.last_updated.load(Ordering::SeqCst),
            app_meta: &meta,
            entity_version: version,
            spark_version: env!("CARGO_PKG_VERSION"),
            group_instance_id: self.binding.group_id.as_deref(),
            start_filter_set: self.app_start_processed.load(Ordering::SeqCst),
            end_filter_set: self.app_end_processed.load(Ordering::SeqCst),
            v1_5_enabled: self.timeline.v1_5_enabled,
            domain_id,
        };

        let summary = create_timeline_entity(events.clone(), true, &ctx);
        self.enqueue_entity(summary).await;

        if self.timeline.v1_5_enabled {
            let detail = create_timeline_entity(events, false, &ctx);
            self.enqueue_entity(detail).await;
        }
    }

    async fn enqueue_entity(&self, entity: TimelineEntity) {
        // Preflight: every PostEntity enqueued must carry a non-null
        // startTime. Guaranteed here because publish_pending_events only
        // runs after ApplicationStart has set start_time (falling back to
        // "now" when the event itself carried 0).
        debug_assert_ne!(entity.start_time, 0, "entity enqueued before startTime was captured");
        self.queue.push_back(PostAction::PostEntity(entity)).await;
        self.queue
            .event_size()
            .try_into()
            .map(|size: i64| self.metrics.set_posting_queue_event_size(size))
            .ok();
    }

    pub fn queue(&self) -> &PostingQueue {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn binding(&self) -> &AppAttemptDetails {
        &self.binding
    }

    pub fn set_domain_id(&self, domain_id: Option<String>) {
        *self.domain_id.lock() = domain_id;
    }

    pub fn start_time(&self) -> i64 {
        self.start_time.load(Ordering::SeqCst)
    }
}
