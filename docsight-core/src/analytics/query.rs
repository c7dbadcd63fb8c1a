//! Pipe reads
//!
//! [`AnalyticsReader`] is the only way callers read aggregates. Every read is
//! resolved against the allow-list first, then handed to a [`PipeSource`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::{BackendConfig, Config};
use crate::error::{Error, Result};

use super::endpoints::{resolve, ResolvedQuery};

/// Backend that answers resolved pipe reads.
///
/// [`PipeClient`] is the production implementation; tests substitute
/// in-memory sources to simulate slow or failing pipes.
#[async_trait]
pub trait PipeSource: Send + Sync {
    /// Fetch the `data` rows of one pipe.
    async fn fetch(&self, query: &ResolvedQuery) -> Result<Vec<Value>>;
}

/// Response envelope of a pipe read. `meta`, `rows` and `statistics` are
/// ignored.
#[derive(Debug, Deserialize)]
struct PipeEnvelope {
    #[serde(default)]
    data: Vec<Value>,
}

/// HTTP client for `GET {base}/v0/pipes/{name}.json`
pub struct PipeClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl PipeClient {
    /// Returns [`Error::NotConfigured`] when the base URL or read token is missing.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = config
            .base_url()
            .ok_or_else(|| Error::NotConfigured("backend.base_url is required".to_string()))?;
        let token = config
            .read_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::NotConfigured("backend.read_token is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Config(format!("invalid read_token: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.to_string(),
        })
    }

    fn pipe_url(&self, endpoint: &str) -> String {
        format!("{}/v0/pipes/{}.json", self.base_url, endpoint)
    }
}

#[async_trait]
impl PipeSource for PipeClient {
    async fn fetch(&self, query: &ResolvedQuery) -> Result<Vec<Value>> {
        let response = self
            .http_client
            .get(self.pipe_url(query.endpoint()))
            .query(query.params())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: PipeEnvelope = response.json().await?;
        tracing::debug!(
            pipe = query.endpoint(),
            rows = envelope.data.len(),
            "Pipe read"
        );
        Ok(envelope.data)
    }
}

// ============================================
// Typed rows
// ============================================

/// Trailing time window for aggregate reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    days: u32,
}

impl Window {
    pub const MAX_DAYS: u32 = 365;

    /// Window covering the last `days` days, clamped to `1..=365`
    pub fn last_days(days: u32) -> Self {
        Self {
            days: days.clamp(1, Self::MAX_DAYS),
        }
    }

    pub fn days(&self) -> u32 {
        self.days
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::last_days(7)
    }
}

/// Accept counts encoded as JSON numbers or numeric strings.
///
/// 64-bit integers are quoted by some backend output settings.
fn count<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Float(f64),
        Text(String),
        Null,
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Int(n) => n,
        Raw::Float(f) if f.is_finite() && f >= 0.0 => f as u64,
        Raw::Float(_) | Raw::Null => 0,
        Raw::Text(s) => s.trim().parse::<f64>().map(|f| f.max(0.0) as u64).unwrap_or(0),
    })
}

/// A search term (or zero-result search) and how often it was issued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCount {
    pub term: String,
    #[serde(deserialize_with = "count", default)]
    pub count: u64,
}

/// A chat question and how often it was asked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionCount {
    pub question: String,
    #[serde(deserialize_with = "count", default)]
    pub count: u64,
}

/// Event volume for one calendar day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyVolume {
    /// `YYYY-MM-DD`
    pub day: String,
    #[serde(deserialize_with = "count", default)]
    pub searches: u64,
    #[serde(deserialize_with = "count", default)]
    pub chats: u64,
    #[serde(deserialize_with = "count", default)]
    pub page_views: u64,
}

impl DailyVolume {
    pub fn total(&self) -> u64 {
        self.searches + self.chats + self.page_views
    }
}

/// Headline counts for a window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTotals {
    #[serde(deserialize_with = "count", default)]
    pub total_events: u64,
    #[serde(deserialize_with = "count", default)]
    pub searches: u64,
    #[serde(deserialize_with = "count", default)]
    pub chats: u64,
    #[serde(deserialize_with = "count", default)]
    pub page_views: u64,
    #[serde(deserialize_with = "count", default)]
    pub unique_sessions: u64,
    #[serde(default)]
    pub avg_chat_latency_ms: Option<f64>,
}

/// One row of the recent-activity feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentEvent {
    pub timestamp: String,
    pub event_type: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub result_count: Option<u64>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

/// A document and how often answers cited it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCount {
    pub document_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(deserialize_with = "count", default)]
    pub citations: u64,
}

/// Decode rows, dropping any that don't match the expected shape.
fn decode_rows<T: DeserializeOwned>(pipe: &str, rows: Vec<Value>) -> Vec<T> {
    let total = rows.len();
    let decoded: Vec<T> = rows
        .into_iter()
        .filter_map(|row| serde_json::from_value(row).ok())
        .collect();
    if decoded.len() < total {
        tracing::debug!(
            pipe,
            dropped = total - decoded.len(),
            "Dropped malformed pipe rows"
        );
    }
    decoded
}

// ============================================
// Reader
// ============================================

/// Default per-slice timeout for composite reads
const DEFAULT_SLICE_TIMEOUT: Duration = Duration::from_secs(8);

/// Allow-listed, typed access to the backend's aggregation pipes
#[derive(Clone)]
pub struct AnalyticsReader {
    source: Option<Arc<dyn PipeSource>>,
    slice_timeout: Duration,
}

impl AnalyticsReader {
    /// Build a reader from configuration.
    ///
    /// Without a base URL and read token the reader still validates
    /// requests, but every valid read fails with [`Error::NotConfigured`].
    pub fn from_config(config: &Config) -> Self {
        let source: Option<Arc<dyn PipeSource>> = if config.backend.can_read() {
            match PipeClient::new(&config.backend) {
                Ok(client) => Some(Arc::new(client) as Arc<dyn PipeSource>),
                Err(e) => {
                    tracing::warn!(error = %e, "Pipe client unavailable");
                    None
                }
            }
        } else {
            None
        };

        Self {
            source,
            slice_timeout: Duration::from_secs(config.backend.summary_timeout_secs.max(1)),
        }
    }

    /// Reader over an explicit source
    pub fn with_source(source: Arc<dyn PipeSource>) -> Self {
        Self {
            source: Some(source),
            slice_timeout: DEFAULT_SLICE_TIMEOUT,
        }
    }

    pub fn with_slice_timeout(mut self, timeout: Duration) -> Self {
        self.slice_timeout = timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    pub fn slice_timeout(&self) -> Duration {
        self.slice_timeout
    }

    /// Read a pipe by name with caller-supplied parameters.
    ///
    /// The allow-list check runs before the configuration check, so an
    /// invalid request is reported as such even on an unconfigured reader.
    pub async fn query(&self, pipe: &str, params: &[(String, String)]) -> Result<Vec<Value>> {
        let resolved = resolve(pipe, params)?;
        self.fetch(&resolved).await
    }

    async fn fetch(&self, query: &ResolvedQuery) -> Result<Vec<Value>> {
        let source = self.source.as_ref().ok_or_else(|| {
            Error::NotConfigured("backend.base_url and backend.read_token are required".to_string())
        })?;
        source.fetch(query).await
    }

    async fn typed<T: DeserializeOwned>(
        &self,
        pipe: &str,
        params: &[(&str, u32)],
    ) -> Result<Vec<T>> {
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let rows = self.query(pipe, &params).await?;
        Ok(decode_rows(pipe, rows))
    }

    pub async fn recent_events(&self, limit: u32) -> Result<Vec<RecentEvent>> {
        self.typed("recent_events", &[("limit", limit)]).await
    }

    pub async fn top_search_terms(&self, limit: u32, window: Window) -> Result<Vec<TermCount>> {
        self.typed("top_search_terms", &[("limit", limit), ("days", window.days())])
            .await
    }

    pub async fn top_chat_questions(
        &self,
        limit: u32,
        window: Window,
    ) -> Result<Vec<QuestionCount>> {
        self.typed("top_chat_questions", &[("limit", limit), ("days", window.days())])
            .await
    }

    pub async fn daily_volume(&self, window: Window) -> Result<Vec<DailyVolume>> {
        self.typed("daily_volume", &[("days", window.days())]).await
    }

    /// Headline counts; an empty pipe answer yields zeros.
    pub async fn event_totals(&self, window: Window) -> Result<EventTotals> {
        let rows: Vec<EventTotals> = self.typed("event_totals", &[("days", window.days())]).await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    pub async fn zero_result_searches(&self, limit: u32, window: Window) -> Result<Vec<TermCount>> {
        self.typed("zero_result_searches", &[("limit", limit), ("days", window.days())])
            .await
    }

    pub async fn top_documents(&self, limit: u32, window: Window) -> Result<Vec<DocumentCount>> {
        self.typed("top_documents", &[("limit", limit), ("days", window.days())])
            .await
    }
}
