//! # docsight-core
//!
//! Core library for docsight - usage analytics for a documentation
//! assistant.
//!
//! This library provides:
//! - Event types, session identity and the write path to the analytics backend
//! - Allow-listed, typed reads of pre-aggregated pipes and a composite summary
//! - A catalog of analytics tools discovered from a remote registry
//! - Decoding of tabular tool output and chart blocks in agent answers
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three stages:
//! - **Capture:** request handlers build [`Event`]s and hand them to a
//!   [`collector::DirectLogger`] or [`collector::IngestionClient`]
//! - **Storage:** the backend appends events and maintains aggregation pipes
//! - **Read:** dashboards use [`analytics::AnalyticsReader`]; the agent uses
//!   [`catalog::ToolCatalog`] and renders answers with [`chart`]
//!
//! Telemetry never breaks the host: writes swallow and log failures, and
//! composite reads fall back to defaults.
//!
//! ## Example
//!
//! ```rust,no_run
//! use docsight_core::collector::IngestionClient;
//! use docsight_core::{Config, Event, EventKind};
//!
//! # async fn run() -> docsight_core::Result<()> {
//! let config = Config::load()?;
//!
//! if let Some(client) = IngestionClient::from_config(&config) {
//!     client.start();
//!     client.enqueue(Event::builder(EventKind::SearchQuery).query("install").build());
//!     client.shutdown().await;
//! }
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use analytics::{AnalyticsReader, Summary, Window};
pub use catalog::{ToolCatalog, ToolResult};
pub use chart::{extract_chart, extract_streaming, AgentAnswer, ChartSpec};
pub use config::Config;
pub use error::{Error, Result};
pub use session::{
    get_or_create_session_id, session_from_cookie_header, SessionCookiePolicy, SessionIdentity,
};
pub use tabular::{decode, decode_csv, Row, Scalar, Table};
pub use types::*;

// Public modules
pub mod analytics;
pub mod catalog;
pub mod chart;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod tabular;
pub mod types;
