//! # Lifecycle Controller
//!
//! The top-level facade: `start(binding)`/`stop()` state machine orchestrating
//! configuration load, domain creation, worker start/stop, and metrics
//! registration/teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{HttpTimelineClient, TimelineClient};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::entity::PostAction;
use crate::error::{Result, TimelineError};
use crate::events::Event;
use crate::extension::{ExtensionContainer, ExtensionRegistry};
use crate::intake::EventIntake;
use crate::metrics::MetricsCollector;
use crate::poster::PosterWorker;
use crate::queue::PostingQueue;
use crate::types::{AppAttemptDetails, AtomicServiceState, ServiceState};

struct RunningWorker {
    handle: JoinHandle<()>,
    worker: Arc<PosterWorker>,
}

/// A single service instance, bound once to an application/attempt and
/// carried through `Created -> Started -> Stopped`.
pub struct TimelineForwarder {
    config: Config,
    state: AtomicServiceState,
    metrics: Arc<MetricsCollector>,
    clock: Arc<dyn Clock>,
    intake: AsyncMutex<Option<Arc<EventIntake>>>,
    queue: AsyncMutex<Option<PostingQueue>>,
    running_worker: AsyncMutex<Option<RunningWorker>>,
    extensions: ExtensionContainer,
    extension_registry: ExtensionRegistry,
}

impl TimelineForwarder {
    pub fn new(config: Config) -> Result<Self> {
        config.validate().map_err(|e| TimelineError::configuration(e.to_string()))?;
        let metrics = Arc::new(MetricsCollector::new(config.metrics.enabled)?);
        Ok(Self {
            config,
            state: AtomicServiceState::default(),
            metrics,
            clock: Arc::new(SystemClock),
            intake: AsyncMutex::new(None),
            queue: AsyncMutex::new(None),
            running_worker: AsyncMutex::new(None),
            extensions: ExtensionContainer::new(),
            extension_registry: ExtensionRegistry::new(),
        })
    }

    #[cfg(test)]
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate().map_err(|e| TimelineError::configuration(e.to_string()))?;
        let metrics = Arc::new(MetricsCollector::new(config.metrics.enabled)?);
        Ok(Self {
            config,
            state: AtomicServiceState::default(),
            metrics,
            clock,
            intake: AsyncMutex::new(None),
            queue: AsyncMutex::new(None),
            running_worker: AsyncMutex::new(None),
            extensions: ExtensionContainer::new(),
            extension_registry: ExtensionRegistry::new(),
        })
    }

    pub fn state(&self) -> ServiceState {
        self.state.load()
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// CAS `Created -> Started`; loads configuration, registers metrics,
    /// creates the HTTP client and domain, and starts the worker.
    pub async fn start(&self, binding: AppAttemptDetails) -> Result<()> {
        let client: Arc<dyn TimelineClient> = Arc::new(HttpTimelineClient::new(
            self.config.timeline.endpoint.clone(),
            self.config.timeline.http_timeout(),
        )?);
        self.start_with_client(binding, client).await
    }

    /// Same as [`start`](Self::start) but with an injected `TimelineClient`,
    /// for embedding against an alternate transport or a test double.
    pub async fn start_with_client(&self, binding: AppAttemptDetails, client: Arc<dyn TimelineClient>) -> Result<()> {
        if !self.state.try_start() {
            return Err(TimelineError::internal("start() called outside of the Created state"));
        }

        let queue = PostingQueue::new(self.config.batching.post_queue_limit());

        let current_user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        let domain_id = crate::domain::create_domain(
            &self.config.acls,
            &current_user,
            &binding.app_id,
            client.as_ref(),
        )
        .await;

        let binding_for_extensions = binding.clone();

        // `timeline.listen` governs event listener registration, not whether
        // the poster worker runs: the worker and its client are always
        // started so the queue drains and the client is always stopped on
        // the way out, even if this instance never receives any events.
        if self.config.timeline.listen {
            let intake = Arc::new(EventIntake::new(
                binding,
                queue.clone(),
                self.metrics.clone(),
                self.clock.clone(),
                self.config.batching.clone(),
                self.config.timeline.clone(),
                domain_id,
            ));
            *self.intake.lock().await = Some(intake);
        }

        let worker = Arc::new(PosterWorker::new(
            client,
            queue.clone(),
            self.metrics.clone(),
            self.clock.clone(),
            self.config.retry.clone(),
        ));
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });
        *self.running_worker.lock().await = Some(RunningWorker { handle, worker });
        *self.queue.lock().await = Some(queue);

        if !self.config.extensions.services.is_empty() {
            self.extensions
                .start(&self.config.extensions.services, &self.extension_registry, &binding_for_extensions)
                .await?;
        }

        info!("timeline forwarder started");
        Ok(())
    }

    /// Non-blocking intake entry point for the host event bus.
    pub async fn process(&self, event: Event) -> bool {
        let guard = self.intake.lock().await;
        match guard.as_ref() {
            Some(intake) => intake.process(event).await,
            None => false,
        }
    }

    /// CAS `Started -> Stopped`; synthesizes an `ApplicationEnd` if needed,
    /// flushes, pushes a `StopQueue`, awaits the worker up to
    /// `shutdownWaitTime`, and tears down metrics/extensions.
    pub async fn stop(&self) -> Result<()> {
        if !self.state.try_stop() {
            return Ok(());
        }

        let intake = self.intake.lock().await.clone();
        if let Some(intake) = &intake {
            if intake.application_start_seen() && !intake.application_end_seen() {
                let now = self.clock.now_millis();
                intake.process(Event::ApplicationEnd { time: now }).await;
            }
            intake.publish_pending_events().await;
            intake.mark_posting_queue_stopped();
        }

        let now = self.clock.now_millis();
        if let Some(queue) = self.queue.lock().await.as_ref() {
            queue
                .push_back(PostAction::StopQueue {
                    enqueued_at: now,
                    wait_millis: self.config.shutdown.wait_time_ms,
                })
                .await;
        }

        let running = self.running_worker.lock().await.take();
        match running {
            Some(RunningWorker { handle, worker }) => {
                match tokio::time::timeout(self.config.shutdown.wait_time(), handle).await {
                    Ok(Ok(())) => debug!("poster worker finished within the shutdown budget"),
                    Ok(Err(e)) => warn!(error = %e, "poster worker task panicked"),
                    Err(_) => {
                        warn!("poster worker did not finish within shutdownWaitTime; cancelling");
                        worker.cancellation_token().cancel();
                    }
                }
            }
            None => {
                // start() always spawns a worker once it reaches the
                // Started state, so this is unreachable via the public
                // API; kept as a defensive no-op.
            }
        }

        self.extensions.stop().await?;
        self.metrics.unregister();

        info!("timeline forwarder stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn binding() -> AppAttemptDetails {
        AppAttemptDetails {
            app_id: "app-1".into(),
            attempt_id: None,
            group_id: None,
        }
    }

    #[tokio::test]
    async fn stop_refuses_from_states_other_than_started() {
        let config = Config::default();
        let service = TimelineForwarder::with_clock(config, Arc::new(FixedClock::new(1000))).unwrap();
        // Still Created: stop() is a documented no-op, not an error.
        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Created);
    }

    #[tokio::test]
    async fn second_stop_is_a_no_op() {
        let mut config = Config::default();
        config.timeline.listen = false;
        let service = TimelineForwarder::with_clock(config, Arc::new(FixedClock::new(1000))).unwrap();
        service.start(binding()).await.unwrap();
        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn process_returns_false_before_start() {
        let config = Config::default();
        let service = TimelineForwarder::with_clock(config, Arc::new(FixedClock::new(1000))).unwrap();
        assert!(!service.process(Event::ApplicationEnd { time: 1 }).await);
    }
}
