//! # Input Events
//!
//! The host application's event bus hands us one of these. Only
//! `ApplicationStart`, `ApplicationEnd`, and `JobStart` are material to the
//! intake classifier; `BlockUpdated` and `ExecutorMetricsUpdate` are
//! recognized purely so they can be dropped by policy, and `Other` carries
//! anything else the host chooses to forward.

use serde::{Deserialize, Serialize};

/// A domain event delivered by the host's event bus into `process()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    ApplicationStart {
        app_id: Option<String>,
        attempt_id: Option<String>,
        app_name: String,
        spark_user: String,
        time: i64,
    },
    ApplicationEnd {
        time: i64,
    },
    JobStart {
        job_id: i64,
        group_id: Option<String>,
    },
    BlockUpdated,
    ExecutorMetricsUpdate,
    Other {
        event_type: String,
        payload: serde_json::Value,
    },
}

impl Event {
    /// Stable string tag for the event's class, used as `TimelineEvent.type`.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Event::ApplicationStart { .. } => "SparkListenerApplicationStart",
            Event::ApplicationEnd { .. } => "SparkListenerApplicationEnd",
            Event::JobStart { .. } => "SparkListenerJobStart",
            Event::BlockUpdated => "SparkListenerBlockUpdated",
            Event::ExecutorMetricsUpdate => "SparkListenerExecutorMetricsUpdate",
            Event::Other { .. } => "Other",
        }
    }
}
