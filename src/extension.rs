//! # Extension-Service Container
//!
//! Loads and starts plug-ins by configured name. The original reflects over
//! a classpath by fully-qualified class name; we replace that with a
//! registry mapping names to constructor functions, per the design notes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::types::AppAttemptDetails;

/// Contract an extension service implements: `start(binding)`/`stop()`,
/// both idempotent at the container level.
#[async_trait]
pub trait ExtensionService: Send + Sync {
    async fn start(&self, binding: &AppAttemptDetails) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

type ServiceFactory = Box<dyn Fn() -> Box<dyn ExtensionService> + Send + Sync>;

/// Maps configured names to constructor functions, standing in for
/// classpath reflection.
#[derive(Default)]
pub struct ExtensionRegistry {
    factories: HashMap<String, ServiceFactory>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ExtensionService> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    fn construct(&self, name: &str) -> Option<Box<dyn ExtensionService>> {
        self.factories.get(name).map(|factory| factory())
    }
}

/// Fans start/stop out to every configured extension service. Double
/// `start` is a no-op with a warning; `stop` is idempotent.
pub struct ExtensionContainer {
    services: Mutex<Vec<Box<dyn ExtensionService>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl ExtensionContainer {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Instantiate and start, in order, every name listed in
    /// `extension.services` that the registry knows how to construct.
    pub async fn start(&self, names: &[String], registry: &ExtensionRegistry, binding: &AppAttemptDetails) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("extension container already started; ignoring duplicate start");
            return Ok(());
        }

        let mut constructed = Vec::new();
        for name in names {
            match registry.construct(name) {
                Some(service) => {
                    service.start(binding).await?;
                    constructed.push(service);
                }
                None => warn!(name = %name, "no extension service registered under this name"),
            }
        }

        *self.services.lock() = constructed;
        Ok(())
    }

    /// Fan out to all started services (unspecified order). Idempotent.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let services = std::mem::take(&mut *self.services.lock());
        for service in services {
            service.stop().await?;
        }
        Ok(())
    }
}

impl Default for ExtensionContainer {
    fn default() -> Self {
        Self::new()
    }
}
