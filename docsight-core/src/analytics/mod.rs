//! Aggregation read path
//!
//! Reads pre-aggregated results from the backend's named pipes.
//!
//! ## Layers
//!
//! - [`endpoints`]: the static allow-list and parameter schemas
//! - [`AnalyticsReader`]: validated, typed reads (one accessor per pipe)
//! - [`Summary`]: the composite dashboard view, tolerant of per-pipe failure
//! - [`proxy_read`]: the admin surface, mapping failures to HTTP statuses

pub mod endpoints;
pub mod proxy;
mod query;
mod summary;

pub use endpoints::{
    lookup, resolve, EndpointDescriptor, ParamKind, ParamSpec, ResolvedQuery, ENDPOINTS,
};
pub use proxy::{proxy_read, ProxyError, ProxyResponse};
pub use query::{
    AnalyticsReader, DailyVolume, DocumentCount, EventTotals, PipeClient, PipeSource, QuestionCount,
    RecentEvent, TermCount, Window,
};
pub use summary::{Summary, SUMMARY_SLICES};
