//! Direct single-event loggers
//!
//! Used where batching is unnecessary or unavailable, e.g. a request handler
//! that records one event and returns. Two flavors exist:
//!
//! - [`LoggerFlavor::Server`] anonymizes client addresses with a salted SHA-256
//! - [`LoggerFlavor::Edge`] runs where no hashing library is available and
//!   records no address at all
//!
//! Both flavors only need the random-bytes primitive behind UUID v4 for ids.
//! A telemetry failure never fails the host request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::types::Event;

use super::client::{CollectorClient, EventSink};
use super::events::{Anonymizer, EventRecord};

/// Execution context a logger runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerFlavor {
    Server,
    Edge,
}

impl LoggerFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoggerFlavor::Server => "server",
            LoggerFlavor::Edge => "edge",
        }
    }
}

/// Result of one awaited send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    Sent,
    /// No write token or URL; nothing was attempted
    Disabled,
    /// The send failed and was logged
    Failed,
}

/// Fire-and-forget single-event sender
#[derive(Clone)]
pub struct DirectLogger {
    flavor: LoggerFlavor,
    sink: Option<Arc<dyn EventSink>>,
    anonymizer: Anonymizer,
    warned: Arc<AtomicBool>,
}

impl DirectLogger {
    /// Create a logger from configuration
    ///
    /// Never fails: missing or invalid backend settings yield a disabled logger.
    pub fn from_config(config: &Config, flavor: LoggerFlavor) -> Self {
        let anonymizer = match flavor {
            LoggerFlavor::Server => Anonymizer::salted(config.privacy.ip_salt.as_deref()),
            LoggerFlavor::Edge => Anonymizer::Redact,
        };

        let sink: Option<Arc<dyn EventSink>> = if config.backend.can_write() {
            match CollectorClient::new(&config.backend) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::warn!(flavor = flavor.as_str(), error = %e, "Event logger disabled");
                    None
                }
            }
        } else {
            None
        };

        Self {
            flavor,
            sink,
            anonymizer,
            warned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a logger over any sink
    pub fn with_sink(
        sink: Arc<dyn EventSink>,
        flavor: LoggerFlavor,
        anonymizer: Anonymizer,
    ) -> Self {
        Self {
            flavor,
            sink: Some(sink),
            anonymizer,
            warned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn flavor(&self) -> LoggerFlavor {
        self.flavor
    }

    /// Anonymizer to pass to [`crate::EventBuilder::client_address`]
    pub fn anonymizer(&self) -> &Anonymizer {
        &self.anonymizer
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Send an event in the background.
    ///
    /// Returns immediately; the outcome is only logged. Without a running
    /// Tokio runtime the event is dropped with a debug log.
    pub fn log(&self, event: Event) {
        let logger = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    logger.send(&event).await;
                });
            }
            Err(_) => {
                tracing::debug!(event_id = %event.id(), "No async runtime; event not logged");
            }
        }
    }

    /// Send an event and report what happened. Never returns an error.
    pub async fn send(&self, event: &Event) -> LogOutcome {
        let Some(sink) = &self.sink else {
            if !self.warned.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    flavor = self.flavor.as_str(),
                    "Analytics write token not configured; events will not be sent"
                );
            }
            return LogOutcome::Disabled;
        };

        let record = EventRecord::from_event(event);
        match sink.send(std::slice::from_ref(&record)).await {
            Ok(_) => {
                tracing::trace!(
                    event_id = %record.id,
                    event_type = %record.event_type,
                    "Logged event"
                );
                LogOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(
                    flavor = self.flavor.as_str(),
                    event_id = %record.id,
                    error = %e,
                    "Failed to log event"
                );
                LogOutcome::Failed
            }
        }
    }
}
