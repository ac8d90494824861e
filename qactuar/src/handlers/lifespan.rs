//! Lifespan handler: drives each application once at startup and once at
//! shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::asgi::{AsgiChannel, Event, LifespanScope, Scope};
use crate::error::QactuarResult;

pub struct LifespanHandler {
    shutting_down: Arc<AtomicBool>,
}

impl LifespanHandler {
    pub fn new(shutting_down: Arc<AtomicBool>) -> Self {
        Self { shutting_down }
    }

    pub fn create_scope() -> Scope {
        Scope::Lifespan(LifespanScope)
    }
}

#[async_trait]
impl AsgiChannel for LifespanHandler {
    async fn receive(&mut self) -> QactuarResult<Event> {
        if self.shutting_down.load(Ordering::Acquire) {
            Ok(Event::LifespanShutdown)
        } else {
            Ok(Event::LifespanStartup)
        }
    }

    async fn send(&mut self, event: Event) -> QactuarResult<()> {
        match event {
            Event::LifespanStartupFailed { message } => {
                error!(target: "qactuar::server", "application startup failed: {message}");
            }
            Event::LifespanShutdownFailed { message } => {
                error!(target: "qactuar::server", "application shutdown failed: {message}");
            }
            Event::LifespanStartupComplete | Event::LifespanShutdownComplete => {
                debug!(target: "qactuar::server", "lifespan {} acknowledged", event.kind());
            }
            other => {
                warn!(
                    target: "qactuar::server",
                    "ignoring {} on the lifespan channel",
                    other.kind()
                );
            }
        }
        Ok(())
    }
}
