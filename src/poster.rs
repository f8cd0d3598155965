//! # Entity Poster Worker
//!
//! A single worker task, one instance per service, owning all network I/O.
//! Implements the steady-state retry loop and the bounded shutdown drain
//! described in the component design, translating the original's
//! thread-interrupt model into cooperative cancellation plus `abort()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::TimelineClient;
use crate::clock::Clock;
use crate::config::RetryConfig;
use crate::entity::PostAction;
use crate::metrics::MetricsCollector;
use crate::queue::PostingQueue;

/// The worker's two phases share this fixed context.
pub struct PosterWorker {
    client: Arc<dyn TimelineClient>,
    queue: PostingQueue,
    metrics: Arc<MetricsCollector>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    cancellation: CancellationToken,
    last_attempt_failed: AtomicBool,
}

impl PosterWorker {
    pub fn new(
        client: Arc<dyn TimelineClient>,
        queue: PostingQueue,
        metrics: Arc<MetricsCollector>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            queue,
            metrics,
            clock,
            retry,
            cancellation: CancellationToken::new(),
            last_attempt_failed: AtomicBool::new(false),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Run the worker to completion: steady-state phase until a
    /// `StopQueue` is dequeued, then the bounded shutdown drain. Always
    /// stops the timeline client on the way out, mirroring the `finally`
    /// block in the component design.
    pub async fn run(self: Arc<Self>) {
        let stop_action = self.steady_state_phase().await;
        if let Some(stop_action) = stop_action {
            self.shutdown_phase(stop_action).await;
        }

        if let Err(e) = self.client.stop().await {
            warn!(error = %e, "timeline client stop failed during worker teardown");
        }
    }

    /// Repeatedly take from the posting queue until a `StopQueue` action is
    /// seen, or the worker is cancelled. Returns the `StopQueue` action (if
    /// any) so the caller can proceed into the shutdown phase.
    async fn steady_state_phase(&self) -> Option<PostAction> {
        let mut current_retry_delay = self.retry.interval();

        loop {
            let action = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => {
                    info!("poster worker cancelled during steady-state phase");
                    return None;
                }
                action = self.queue.take() => action,
            };

            match action {
                PostAction::StopQueue { enqueued_at, wait_millis } => {
                    return Some(PostAction::StopQueue { enqueued_at, wait_millis });
                }
                PostAction::PostEntity(entity) => {
                    let size = entity.size();
                    let result = self.post_once(&entity).await;
                    match result {
                        PostOutcome::Success => {
                            self.metrics.inc_entity_post_successes();
                            self.metrics.add_events_successfully_posted(size as u64);
                            self.last_attempt_failed.store(false, Ordering::SeqCst);
                            current_retry_delay = self.retry.interval();
                            if self.client.is_flushable() {
                                if let Err(e) = self.client.flush().await {
                                    warn!(error = %e, "flush after successful post failed");
                                }
                            }
                        }
                        PostOutcome::Rejected(errors) => {
                            self.metrics.inc_entity_post_rejections();
                            for err in &errors {
                                warn!(error = %err, "timeline server rejected entity");
                            }
                        }
                        PostOutcome::TransientFailure(err) => {
                            self.metrics.inc_entity_post_failures();
                            if self.last_attempt_failed.swap(true, Ordering::SeqCst) {
                                debug!(error = %err, "entity post still failing");
                            } else {
                                warn!(error = %err, "entity post failed, will retry");
                            }
                            self.queue.push_front(PostAction::PostEntity(entity)).await;

                            current_retry_delay =
                                std::cmp::min(current_retry_delay + self.retry.interval(), self.retry.max_interval());

                            if current_retry_delay > Duration::ZERO {
                                tokio::select! {
                                    biased;
                                    _ = self.cancellation.cancelled() => {
                                        info!("poster worker cancelled during retry sleep");
                                        return None;
                                    }
                                    _ = tokio::time::sleep(current_retry_delay) => {}
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Poll with a deadline of `stop.timeLimit` until the queue is empty or
    /// the deadline elapses.
    async fn shutdown_phase(&self, stop: PostAction) {
        let time_limit = stop.time_limit().expect("shutdown_phase always receives StopQueue");

        loop {
            if self.clock.now_millis() >= time_limit {
                return;
            }

            let action = self.queue.try_take().await;
            let Some(action) = action else {
                // Empty poll: return cleanly.
                return;
            };

            match action {
                PostAction::StopQueue { .. } => {
                    // Ignore additional StopQueue entries encountered during drain.
                    continue;
                }
                PostAction::PostEntity(entity) => {
                    let size = entity.size();
                    match self.post_once(&entity).await {
                        PostOutcome::Success => {
                            self.metrics.inc_entity_post_successes();
                            self.metrics.add_events_successfully_posted(size as u64);
                        }
                        PostOutcome::Rejected(errors) => {
                            self.metrics.inc_entity_post_rejections();
                            for err in &errors {
                                warn!(error = %err, "timeline server rejected entity during drain");
                            }
                        }
                        PostOutcome::TransientFailure(err) => {
                            self.metrics.inc_entity_post_failures();
                            warn!(error = %err, "entity post failed during shutdown drain");
                            self.queue.push_front(PostAction::PostEntity(entity)).await;

                            if self.retry.interval() == Duration::ZERO {
                                // A zero retryInterval makes a failure fatal to the drain.
                                error!("retry interval is zero; aborting shutdown drain after failure");
                                return;
                            }
                            tokio::time::sleep(self.retry.interval()).await;
                        }
                    }
                }
            }
        }
    }

    async fn post_once(&self, entity: &crate::entity::TimelineEntity) -> PostOutcome {
        let result = if entity.v1_5_enabled {
            match entity.group_id.as_deref() {
                Some(group_id) => self.client.put_entities_for_attempt(entity.attempt_id.as_deref(), group_id, entity).await,
                None => self.client.put_entities(entity).await,
            }
        } else {
            self.client.put_entities(entity).await
        };
        match result {
            Ok(response) if response.has_errors() => {
                PostOutcome::Rejected(response.errors.iter().map(|e| e.error_code.clone()).collect())
            }
            Ok(_) => PostOutcome::Success,
            Err(e) => PostOutcome::TransientFailure(e.to_string()),
        }
    }
}

enum PostOutcome {
    Success,
    Rejected(Vec<String>),
    TransientFailure(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PutResponse;
    use crate::clock::FixedClock;
    use crate::entity::TimelineEntity;
    use crate::error::{Result, TimelineError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<ScriptedResponse>>,
        calls: AtomicUsize,
        attempt_calls: AtomicUsize,
    }

    enum ScriptedResponse {
        Fail,
        Reject,
        Ok,
    }

    #[async_trait]
    impl TimelineClient for ScriptedClient {
        async fn put_domain(&self, _domain: &crate::entity::TimelineDomain) -> Result<()> {
            Ok(())
        }

        async fn put_entities(&self, _entity: &TimelineEntity) -> Result<PutResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut scripts = self.responses.lock().unwrap();
            if scripts.is_empty() {
                return Ok(PutResponse::default());
            }
            match scripts.remove(0) {
                ScriptedResponse::Fail => Err(TimelineError::Network {
                    message: "connect refused".into(),
                    endpoint: None,
                    status_code: None,
                }),
                ScriptedResponse::Reject => Ok(PutResponse {
                    errors: vec![crate::client::PutError {
                        entity_id: "app".into(),
                        entity_type: "spark_event_v01".into(),
                        error_code: "TIMELINE_ERROR".into(),
                    }],
                }),
                ScriptedResponse::Ok => Ok(PutResponse::default()),
            }
        }

        async fn put_entities_for_attempt(
            &self,
            _attempt_id: Option<&str>,
            _group_id: &str,
            entity: &TimelineEntity,
        ) -> Result<PutResponse> {
            self.attempt_calls.fetch_add(1, Ordering::SeqCst);
            self.put_entities(entity).await
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    fn sample_entity() -> TimelineEntity {
        TimelineEntity {
            entity_type: "spark_event_v01".into(),
            entity_id: "app-1".into(),
            start_time: 1000,
            events: vec![crate::entity::TimelineEvent {
                event_type: "x".into(),
                timestamp: 1000,
                payload: HashMap::new(),
            }],
            other_info: HashMap::new(),
            filters: HashMap::new(),
            domain_id: None,
            attempt_id: None,
            group_id: None,
            v1_5_enabled: false,
        }
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![ScriptedResponse::Fail, ScriptedResponse::Fail, ScriptedResponse::Ok]),
            calls: AtomicUsize::new(0),
            attempt_calls: AtomicUsize::new(0),
        });
        let metrics = Arc::new(MetricsCollector::new(false).unwrap());
        let queue = PostingQueue::new(10);
        let clock = Arc::new(FixedClock::new(0));
        let mut retry = RetryConfig::default();
        retry.interval_ms = 1;
        retry.max_interval_ms = 5;

        let worker = Arc::new(PosterWorker::new(client.clone(), queue.clone(), metrics.clone(), clock, retry));

        queue.push_back(PostAction::PostEntity(sample_entity())).await;
        queue
            .push_back(PostAction::StopQueue {
                enqueued_at: 0,
                wait_millis: 0,
            })
            .await;

        worker.run().await;

        assert_eq!(metrics.entity_post_failures(), 2);
        assert_eq!(metrics.entity_post_successes(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![ScriptedResponse::Reject]),
            calls: AtomicUsize::new(0),
            attempt_calls: AtomicUsize::new(0),
        });
        let metrics = Arc::new(MetricsCollector::new(false).unwrap());
        let queue = PostingQueue::new(10);
        let clock = Arc::new(FixedClock::new(0));

        let worker = Arc::new(PosterWorker::new(client.clone(), queue.clone(), metrics.clone(), clock, RetryConfig::default()));

        queue.push_back(PostAction::PostEntity(sample_entity())).await;
        queue
            .push_back(PostAction::StopQueue {
                enqueued_at: 0,
                wait_millis: 0,
            })
            .await;

        worker.run().await;

        assert_eq!(metrics.entity_post_rejections(), 1);
        assert_eq!(metrics.entity_post_failures(), 0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_unwinds_the_steady_state_loop() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
            attempt_calls: AtomicUsize::new(0),
        });
        let metrics = Arc::new(MetricsCollector::new(false).unwrap());
        let queue = PostingQueue::new(10);
        let clock = Arc::new(FixedClock::new(0));
        let worker = Arc::new(PosterWorker::new(client, queue, metrics, clock, RetryConfig::default()));

        let token = worker.cancellation_token();
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should unwind promptly after cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn v1_5_entities_with_a_group_use_the_attempt_variant() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![ScriptedResponse::Ok]),
            calls: AtomicUsize::new(0),
            attempt_calls: AtomicUsize::new(0),
        });
        let metrics = Arc::new(MetricsCollector::new(false).unwrap());
        let queue = PostingQueue::new(10);
        let clock = Arc::new(FixedClock::new(0));
        let worker = Arc::new(PosterWorker::new(client.clone(), queue.clone(), metrics, clock, RetryConfig::default()));

        let mut entity = sample_entity();
        entity.v1_5_enabled = true;
        entity.group_id = Some("group-1".into());
        entity.attempt_id = Some("1".into());

        queue.push_back(PostAction::PostEntity(entity)).await;
        queue
            .push_back(PostAction::StopQueue {
                enqueued_at: 0,
                wait_millis: 0,
            })
            .await;

        worker.run().await;

        assert_eq!(client.attempt_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1, "put_entities_for_attempt delegates to the same counter");
    }
}
