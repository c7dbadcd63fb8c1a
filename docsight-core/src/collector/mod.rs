//! Event write path
//!
//! Ships analytics events to the backend's append-only events endpoint.
//!
//! ## Architecture
//!
//! Telemetry is strictly best effort:
//! - [`IngestionClient`] batches events in memory and flushes on size or timer
//! - [`DirectLogger`] sends one event per call, fire-and-forget
//! - Network failures are logged and never reach the caller
//!
//! ## Usage
//!
//! Enable writes in `~/.config/docsight/config.toml`:
//!
//! ```toml
//! [backend]
//! base_url = "https://api.tinybird.co"
//! write_token = "p.xxxxxxxxxxxx"
//!
//! [ingest]
//! batch_size = 20
//! flush_interval_secs = 5
//! ```

mod client;
mod events;
mod logger;
mod publisher;

pub use client::{CollectorClient, EventSink};
pub use events::{encode_ndjson, Anonymizer, EventRecord, EventsResponse};
pub use logger::{DirectLogger, LogOutcome, LoggerFlavor};
pub use publisher::{FlushOutcome, IngestOptions, IngestionClient, PublishStats};
