//! End-to-end scenarios against `TimelineForwarder`, using a scripted
//! in-memory `TimelineClient` in place of a real Timeline Server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use timeline_forwarder::client::{PutError, PutResponse, TimelineClient};
use timeline_forwarder::clock::FixedClock;
use timeline_forwarder::config::Config;
use timeline_forwarder::entity::{TimelineDomain, TimelineEntity};
use timeline_forwarder::error::{Result, TimelineError};
use timeline_forwarder::service::TimelineForwarder;
use timeline_forwarder::{AppAttemptDetails, Event};

#[derive(Clone)]
enum Script {
    Fail,
    Reject,
    Ok,
}

struct ScriptedClient {
    scripts: Mutex<Vec<Script>>,
    posted: Mutex<Vec<TimelineEntity>>,
    calls: AtomicUsize,
    block_forever: bool,
}

impl ScriptedClient {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            posted: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            block_forever: false,
        }
    }

    fn blocking() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            posted: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            block_forever: true,
        }
    }
}

#[async_trait]
impl TimelineClient for ScriptedClient {
    async fn put_domain(&self, _domain: &TimelineDomain) -> Result<()> {
        Ok(())
    }

    async fn put_entities(&self, entity: &TimelineEntity) -> Result<PutResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.block_forever {
            std::future::pending::<()>().await;
            unreachable!();
        }
        let next = {
            let mut scripts = self.scripts.lock().await;
            if scripts.is_empty() {
                Script::Ok
            } else {
                scripts.remove(0)
            }
        };
        match next {
            Script::Fail => Err(TimelineError::Network {
                message: "connect refused".into(),
                endpoint: None,
                status_code: None,
            }),
            Script::Reject => Ok(PutResponse {
                errors: vec![PutError {
                    entity_id: entity.entity_id.clone(),
                    entity_type: entity.entity_type.clone(),
                    error_code: "TIMELINE_ERROR".into(),
                }],
            }),
            Script::Ok => {
                self.posted.lock().await.push(entity.clone());
                Ok(PutResponse::default())
            }
        }
    }

    async fn put_entities_for_attempt(
        &self,
        _attempt_id: Option<&str>,
        _group_id: &str,
        entity: &TimelineEntity,
    ) -> Result<PutResponse> {
        self.put_entities(entity).await
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

fn binding() -> AppAttemptDetails {
    AppAttemptDetails {
        app_id: "app-1".into(),
        attempt_id: None,
        group_id: None,
    }
}

/// Polls `cond` until it's true or `timeout` elapses, panicking in the
/// latter case. Used to observe retry/post metrics mid-run, before
/// `stop()`'s synthetic `ApplicationEnd` can add further scripted calls.
async fn wait_until<F: Fn() -> bool>(timeout: Duration, cond: F) {
    let start = std::time::Instant::now();
    while !cond() {
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn scenario_1_happy_path() {
    let mut config = Config::default();
    config.batching.batch_size = 2;
    let service = TimelineForwarder::with_clock(config, Arc::new(FixedClock::new(1000))).unwrap();
    let client = Arc::new(ScriptedClient::new(vec![]));

    service.start_with_client(binding(), client.clone()).await.unwrap();

    service
        .process(Event::ApplicationStart {
            app_id: Some("app-1".into()),
            attempt_id: None,
            app_name: "demo".into(),
            spark_user: "alice".into(),
            time: 1000,
        })
        .await;
    service.process(Event::JobStart { job_id: 7, group_id: None }).await;
    service.process(Event::JobStart { job_id: 8, group_id: None }).await;

    // Lifecycle push flushes the ApplicationStart by itself (flushCount=1);
    // the second JobStart crosses batchSize=2, forcing another flush
    // (net flushCount=2) — before any ApplicationEnd is involved.
    assert_eq!(service.metrics().flush_count(), 2);

    // Feed an explicit end so stop() below doesn't also synthesize one,
    // keeping this scenario's entity/event count easy to reason about.
    service.process(Event::ApplicationEnd { time: 2000 }).await;
    service.stop().await.unwrap();

    let posted = client.posted.lock().await;
    let total_events: usize = posted.iter().map(|e| e.size()).sum();
    assert_eq!(total_events, 4, "start + 2 job-starts + end, across however many flushes");
    assert_eq!(posted[0].start_time, 1000);
}

#[tokio::test]
async fn scenario_2_transient_retry_then_success() {
    let mut config = Config::default();
    config.batching.batch_size = 1;
    config.retry.interval_ms = 1;
    config.retry.max_interval_ms = 10;
    let service = TimelineForwarder::with_clock(config, Arc::new(FixedClock::new(1000))).unwrap();
    let client = Arc::new(ScriptedClient::new(vec![Script::Fail, Script::Fail, Script::Ok]));

    service.start_with_client(binding(), client.clone()).await.unwrap();
    service
        .process(Event::ApplicationStart {
            app_id: Some("app-1".into()),
            attempt_id: None,
            app_name: "demo".into(),
            spark_user: "alice".into(),
            time: 1000,
        })
        .await;

    // Wait for the two scripted failures and the succeeding retry to land
    // before calling stop(), so its synthetic ApplicationEnd (which would
    // draw a fourth, unscripted call) can't contaminate these counts.
    wait_until(Duration::from_secs(2), || client.calls.load(Ordering::SeqCst) >= 3).await;

    assert_eq!(service.metrics().entity_post_failures(), 2);
    assert_eq!(service.metrics().entity_post_successes(), 1);
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn scenario_3_rejection_is_permanent() {
    let mut config = Config::default();
    config.batching.batch_size = 1;
    let service = TimelineForwarder::with_clock(config, Arc::new(FixedClock::new(1000))).unwrap();
    let client = Arc::new(ScriptedClient::new(vec![Script::Reject]));

    service.start_with_client(binding(), client.clone()).await.unwrap();
    service
        .process(Event::ApplicationStart {
            app_id: Some("app-1".into()),
            attempt_id: None,
            app_name: "demo".into(),
            spark_user: "alice".into(),
            time: 1000,
        })
        .await;

    // Wait for the scripted rejection before stop(), so its synthetic
    // ApplicationEnd (a second, unscripted call defaulting to Script::Ok)
    // can't be mistaken for a retry of the rejected post.
    wait_until(Duration::from_secs(2), || client.calls.load(Ordering::SeqCst) >= 1).await;

    assert_eq!(service.metrics().entity_post_rejections(), 1);
    assert_eq!(service.metrics().entity_post_failures(), 0);
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn scenario_4_backpressure_drop_preserves_lifecycle_events() {
    let mut config = Config::default();
    config.batching.batch_size = 100;
    config.batching.post_queue_limit_override = Some(3);
    let service = TimelineForwarder::with_clock(config, Arc::new(FixedClock::new(1000))).unwrap();
    let client = Arc::new(ScriptedClient::new(vec![]));

    service.start_with_client(binding(), client.clone()).await.unwrap();
    service
        .process(Event::ApplicationStart {
            app_id: Some("app-1".into()),
            attempt_id: None,
            app_name: "demo".into(),
            spark_user: "alice".into(),
            time: 1000,
        })
        .await;
    for i in 0..10 {
        service.process(Event::JobStart { job_id: i, group_id: None }).await;
    }

    assert!(service.metrics().events_dropped() >= 7);

    let before_stop = client.posted.lock().await.len();
    service.stop().await.unwrap();

    let posted = client.posted.lock().await;
    assert_eq!(
        posted.len() - before_stop,
        1,
        "stop()'s flush of the still-buffered events plus synthetic end posts exactly one more entity"
    );
}

#[tokio::test]
async fn scenario_5_orderly_shutdown_synthesizes_application_end() {
    let mut config = Config::default();
    config.batching.batch_size = 100;
    config.shutdown.wait_time_ms = 5_000;
    let service = TimelineForwarder::with_clock(config, Arc::new(FixedClock::new(1000))).unwrap();
    let client = Arc::new(ScriptedClient::new(vec![]));

    service.start_with_client(binding(), client.clone()).await.unwrap();
    service
        .process(Event::ApplicationStart {
            app_id: Some("app-1".into()),
            attempt_id: None,
            app_name: "demo".into(),
            spark_user: "alice".into(),
            time: 1000,
        })
        .await;
    service.process(Event::JobStart { job_id: 1, group_id: None }).await;

    service.stop().await.unwrap();

    let posted = client.posted.lock().await;
    // The ApplicationStart itself forces an immediate flush (one entity,
    // just that event); stop()'s synthetic ApplicationEnd flushes the
    // still-buffered JobStart together with the end event as a second,
    // final entity.
    assert_eq!(posted.len(), 2);
    let final_entity = posted.last().unwrap();
    assert_eq!(final_entity.size(), 2, "job-start + synthetic end land in one entity");
    assert_eq!(
        final_entity.filters.get("endApp").map(String::as_str),
        Some("SparkListenerApplicationEnd"),
        "synthetic ApplicationEnd sets the endApp filter"
    );
    assert_eq!(client.calls.load(Ordering::SeqCst), 2, "timeline client posted exactly twice");
}

#[tokio::test]
async fn scenario_6_forced_interrupt_unwinds_without_deadlock() {
    let mut config = Config::default();
    config.batching.batch_size = 1;
    config.shutdown.wait_time_ms = 0;
    let service = TimelineForwarder::with_clock(config, Arc::new(FixedClock::new(1000))).unwrap();
    let client = Arc::new(ScriptedClient::blocking());

    service.start_with_client(binding(), client.clone()).await.unwrap();
    service
        .process(Event::ApplicationStart {
            app_id: Some("app-1".into()),
            attempt_id: None,
            app_name: "demo".into(),
            spark_user: "alice".into(),
            time: 1000,
        })
        .await;

    // Give the worker a moment to pick the entity up and block in the
    // (never-resolving) HTTP call.
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(2), service.stop())
        .await
        .expect("stop() must not deadlock when shutdownWaitTime is zero")
        .unwrap();

    assert_eq!(service.state(), timeline_forwarder::ServiceState::Stopped);
}
