//! # Shared Types
//!
//! Small value types shared across modules: service lifecycle state, the
//! binding handed to the service at `start`, and the attempt-detail structs
//! captured from the binding and from the `ApplicationStart` event.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a service instance. Transitions are monotonic and
/// irreversible: `Created -> Started -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceState {
    Created = 0,
    Started = 1,
    Stopped = 2,
}

impl ServiceState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ServiceState::Created,
            1 => ServiceState::Started,
            _ => ServiceState::Stopped,
        }
    }
}

/// Atomic holder for `ServiceState`, backing the single-word state machine
/// described for the lifecycle controller.
#[derive(Debug)]
pub struct AtomicServiceState(AtomicU8);

impl AtomicServiceState {
    pub fn new(initial: ServiceState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn load(&self) -> ServiceState {
        ServiceState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Attempt the `Created -> Started` transition. Returns true on success.
    pub fn try_start(&self) -> bool {
        self.0
            .compare_exchange(
                ServiceState::Created as u8,
                ServiceState::Started as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Attempt the `Started -> Stopped` transition. Returns true on success.
    pub fn try_stop(&self) -> bool {
        self.0
            .compare_exchange(
                ServiceState::Started as u8,
                ServiceState::Stopped as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

impl Default for AtomicServiceState {
    fn default() -> Self {
        Self::new(ServiceState::Created)
    }
}

/// The binding a host application supplies at `start(binding)`: identifies
/// the application/attempt this service instance is forwarding events for.
#[derive(Debug, Clone)]
pub struct AppAttemptDetails {
    pub app_id: String,
    pub attempt_id: Option<String>,
    pub group_id: Option<String>,
}

/// Metadata captured from the `ApplicationStart` event itself, which may
/// disagree with (or supplement) the binding's `AppAttemptDetails`.
#[derive(Debug, Clone, Default)]
pub struct SparkAppAttemptDetails {
    pub spark_app_id: Option<String>,
    pub spark_attempt_id: Option<String>,
    pub name: String,
    pub user: String,
}
