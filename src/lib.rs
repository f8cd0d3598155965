//! # Timeline Forwarder
//!
//! A history-event forwarding service that bridges a host application's
//! event bus to a remote Timeline Server. Subscribes to lifecycle/runtime
//! events, batches them into timeline entities, and posts them
//! asynchronously with retry, backpressure, and best-effort drain on
//! shutdown.

pub mod buffer;
pub mod client;
pub mod clock;
pub mod config;
pub mod domain;
pub mod entity;
pub mod error;
pub mod events;
pub mod extension;
pub mod intake;
pub mod merge;
pub mod metrics;
pub mod poster;
pub mod queue;
pub mod service;
pub mod session;
pub mod types;

pub use error::{Result, TimelineError};
pub use events::Event;
pub use service::TimelineForwarder;
pub use types::{AppAttemptDetails, ServiceState, SparkAppAttemptDetails};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SERVICE_NAME: &str = "timeline-forwarder";
