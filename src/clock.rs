//! # Clock
//!
//! A monotonic wall-clock source abstracted behind a trait so tests can
//! drive deterministic timestamps instead of depending on real time.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Real wall-clock time, used in production.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock tests can set to arbitrary values, avoiding flakiness around
/// real elapsed time.
pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn new(initial: i64) -> Self {
        Self(AtomicI64::new(initial))
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::SeqCst);
    }

    pub fn advance(&self, by: i64) {
        self.0.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}
