//! # Entity Model & Codec
//!
//! Value types for `TimelineEvent`, `TimelineEntity`, `TimelineDomain`, and
//! `PostAction`, plus the codec that turns an input `Event` into a
//! `TimelineEvent` and assembles a drained buffer into a `TimelineEntity`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::Event;
use crate::types::SparkAppAttemptDetails;

/// `{type, timestamp, payload}`: produced from a domain event by the codec
/// at intake time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: i64,
    pub payload: HashMap<String, Value>,
}

/// A server-side aggregate keyed by `(entityType, entityId)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntity {
    pub entity_type: String,
    pub entity_id: String,
    pub start_time: i64,
    pub events: Vec<TimelineEvent>,
    pub other_info: HashMap<String, Value>,
    pub filters: HashMap<String, String>,
    pub domain_id: Option<String>,

    /// Routing metadata for the poster, not part of the wire payload:
    /// which `putEntities` variant to call and with what attempt/group.
    #[serde(skip)]
    pub attempt_id: Option<String>,
    #[serde(skip)]
    pub group_id: Option<String>,
    #[serde(skip)]
    pub v1_5_enabled: bool,
}

impl TimelineEntity {
    /// Number of events carried by this entity; used for `PostAction::size`
    /// and for `eventsSuccessfullyPosted` accounting.
    pub fn size(&self) -> usize {
        self.events.len()
    }
}

/// A named access-control namespace holding entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineDomain {
    pub id: String,
    pub readers: String,
    pub writers: String,
}

/// Tagged union of work pushed through the posting queue.
#[derive(Debug, Clone)]
pub enum PostAction {
    PostEntity(TimelineEntity),
    StopQueue {
        enqueued_at: i64,
        wait_millis: u64,
    },
}

impl PostAction {
    /// `|events|` for `PostEntity`, `0` for `StopQueue`.
    pub fn size(&self) -> usize {
        match self {
            PostAction::PostEntity(e) => e.size(),
            PostAction::StopQueue { .. } => 0,
        }
    }

    /// `enqueuedAt + waitMillis` for `StopQueue`.
    pub fn time_limit(&self) -> Option<i64> {
        match self {
            PostAction::StopQueue {
                enqueued_at,
                wait_millis,
            } => Some(enqueued_at + *wait_millis as i64),
            PostAction::PostEntity(_) => None,
        }
    }
}

/// Translate an input event to a `TimelineEvent`. Returns `None` for events
/// filtered before enqueue (`BlockUpdated`, `ExecutorMetricsUpdate`).
pub fn to_timeline_event(event: &Event, timestamp: i64) -> Option<TimelineEvent> {
    match event {
        Event::BlockUpdated | Event::ExecutorMetricsUpdate => None,
        Event::ApplicationStart {
            app_id,
            attempt_id,
            app_name,
            spark_user,
            time,
        } => {
            let mut payload = HashMap::new();
            payload.insert("appId".to_string(), json_opt(app_id));
            payload.insert("attemptId".to_string(), json_opt(attempt_id));
            payload.insert("appName".to_string(), Value::String(app_name.clone()));
            payload.insert("sparkUser".to_string(), Value::String(spark_user.clone()));
            payload.insert("time".to_string(), Value::from(*time));
            Some(TimelineEvent {
                event_type: event.type_tag().to_string(),
                timestamp,
                payload,
            })
        }
        Event::ApplicationEnd { time } => {
            let mut payload = HashMap::new();
            payload.insert("time".to_string(), Value::from(*time));
            Some(TimelineEvent {
                event_type: event.type_tag().to_string(),
                timestamp,
                payload,
            })
        }
        Event::JobStart { job_id, group_id } => {
            let mut payload = HashMap::new();
            payload.insert("jobId".to_string(), Value::from(*job_id));
            if let Some(gid) = group_id {
                payload.insert("groupId".to_string(), Value::String(gid.clone()));
            }
            Some(TimelineEvent {
                event_type: event.type_tag().to_string(),
                timestamp,
                payload,
            })
        }
        Event::Other { event_type, payload } => {
            let mut map = HashMap::new();
            map.insert("value".to_string(), payload.clone());
            Some(TimelineEvent {
                event_type: event_type.clone(),
                timestamp,
                payload: map,
            })
        }
    }
}

fn json_opt(v: &Option<String>) -> Value {
    match v {
        Some(s) => Value::String(s.clone()),
        None => Value::Null,
    }
}

/// Context needed to assemble a drained event buffer into a `TimelineEntity`,
/// per spec §4.1's `otherInfo` requirements.
pub struct EntityContext<'a> {
    pub app_id: &'a str,
    pub attempt_id: Option<&'a str>,
    pub group_id: Option<&'a str>,
    pub start_time: i64,
    pub end_time: i64,
    pub last_updated: i64,
    pub app_meta: &'a SparkAppAttemptDetails,
    pub entity_version: u64,
    pub spark_version: &'a str,
    pub group_instance_id: Option<&'a str>,
    pub start_filter_set: bool,
    pub end_filter_set: bool,
    pub v1_5_enabled: bool,
    pub domain_id: Option<String>,
}

/// `createTimelineEntity(summary, timestamp, version)`.
///
/// `entityType` is `"spark_event_v01"` when v1.5 is disabled or `summary` is
/// true, else `"spark_event_v01_detail"`. `entityId` is the attempt id when
/// present, else the application id.
pub fn create_timeline_entity(
    events: Vec<TimelineEvent>,
    summary: bool,
    ctx: &EntityContext<'_>,
) -> TimelineEntity {
    let entity_type = if !ctx.v1_5_enabled || summary {
        "spark_event_v01".to_string()
    } else {
        "spark_event_v01_detail".to_string()
    };

    let entity_id = ctx
        .attempt_id
        .map(|a| a.to_string())
        .unwrap_or_else(|| ctx.app_id.to_string());

    let mut other_info = HashMap::new();
    other_info.insert("startTime".to_string(), Value::from(ctx.start_time));
    other_info.insert("endTime".to_string(), Value::from(ctx.end_time));
    other_info.insert("lastUpdated".to_string(), Value::from(ctx.last_updated));
    other_info.insert("appName".to_string(), Value::String(ctx.app_meta.name.clone()));
    other_info.insert("appUser".to_string(), Value::String(ctx.app_meta.user.clone()));
    other_info.insert("applicationId".to_string(), Value::String(ctx.app_id.to_string()));
    other_info.insert(
        "attemptId".to_string(),
        json_opt(&ctx.attempt_id.map(|s| s.to_string())),
    );
    other_info.insert("entityVersion".to_string(), Value::from(ctx.entity_version));
    other_info.insert("sparkVersion".to_string(), Value::String(ctx.spark_version.to_string()));
    if ctx.v1_5_enabled {
        if let Some(gid) = ctx.group_instance_id {
            other_info.insert("groupInstanceId".to_string(), Value::String(gid.to_string()));
        }
    }

    let mut filters = HashMap::new();
    if ctx.start_filter_set {
        filters.insert("startApp".to_string(), "SparkListenerApplicationStart".to_string());
    }
    if ctx.end_filter_set {
        filters.insert("endApp".to_string(), "SparkListenerApplicationEnd".to_string());
    }

    TimelineEntity {
        entity_type,
        entity_id,
        start_time: ctx.start_time,
        events,
        other_info,
        filters,
        domain_id: ctx.domain_id.clone(),
        attempt_id: ctx.attempt_id.map(|s| s.to_string()),
        group_id: ctx.group_id.map(|s| s.to_string()),
        v1_5_enabled: ctx.v1_5_enabled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_updated_and_executor_metrics_are_filtered() {
        assert!(to_timeline_event(&Event::BlockUpdated, 0).is_none());
        assert!(to_timeline_event(&Event::ExecutorMetricsUpdate, 0).is_none());
    }

    #[test]
    fn application_start_round_trips_fields() {
        let event = Event::ApplicationStart {
            app_id: Some("app-1".into()),
            attempt_id: Some("1".into()),
            app_name: "demo".into(),
            spark_user: "alice".into(),
            time: 1000,
        };
        let te = to_timeline_event(&event, 1000).unwrap();
        assert_eq!(te.event_type, "SparkListenerApplicationStart");
        assert_eq!(te.payload.get("appName").unwrap(), "demo");
    }

    fn sample_ctx(meta: &SparkAppAttemptDetails) -> EntityContext<'_> {
        EntityContext {
            app_id: "app-1",
            attempt_id: Some("1"),
            group_id: None,
            start_time: 1000,
            end_time: 0,
            last_updated: 1000,
            app_meta: meta,
            entity_version: 1,
            spark_version: "1.0.0",
            group_instance_id: None,
            start_filter_set: true,
            end_filter_set: false,
            v1_5_enabled: false,
            domain_id: None,
        }
    }

    #[test]
    fn summary_entity_type_when_v1_5_disabled() {
        let meta = SparkAppAttemptDetails::default();
        let ctx = sample_ctx(&meta);
        let entity = create_timeline_entity(vec![], true, &ctx);
        assert_eq!(entity.entity_type, "spark_event_v01");
        assert_eq!(entity.entity_id, "1");
        assert_eq!(entity.other_info.get("startTime").unwrap(), &Value::from(1000));
    }

    #[test]
    fn detail_entity_type_in_v1_5_mode_when_not_summary() {
        let meta = SparkAppAttemptDetails::default();
        let mut ctx = sample_ctx(&meta);
        ctx.v1_5_enabled = true;
        let entity = create_timeline_entity(vec![], false, &ctx);
        assert_eq!(entity.entity_type, "spark_event_v01_detail");
    }

    #[test]
    fn entity_id_falls_back_to_app_id_without_attempt() {
        let meta = SparkAppAttemptDetails::default();
        let mut ctx = sample_ctx(&meta);
        ctx.attempt_id = None;
        let entity = create_timeline_entity(vec![], true, &ctx);
        assert_eq!(entity.entity_id, "app-1");
    }
}
