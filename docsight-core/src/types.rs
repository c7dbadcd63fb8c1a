//! Core domain types for docsight
//!
//! An [`Event`] is one immutable record of a user or system action destined
//! for the analytics backend. Events are built once through [`EventBuilder`],
//! handed to a logger or the ingestion queue, and never mutated afterwards.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One structured record of a user/system action |
//! | **Session** | An opaque browser token linking events together (see [`crate::session`]) |
//! | **Source** | A document cited by a search result or chat answer |
//! | **Pipe** | A named, parameterized read-only aggregation on the backend |

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::collector::Anonymizer;

/// Maximum characters kept from a search query or chat question
pub const MAX_QUERY_CHARS: usize = 1_000;

/// Maximum characters kept from a chat answer
pub const MAX_ANSWER_CHARS: usize = 4_000;

/// Maximum characters kept from a user agent, path or referrer
pub const MAX_CONTEXT_CHARS: usize = 512;

// ============================================
// Event kind
// ============================================

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A document search was submitted
    SearchQuery,
    /// A question was asked of the chat agent
    ChatQuery,
    /// A page was rendered
    PageView,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SearchQuery => "search_query",
            EventKind::ChatQuery => "chat_query",
            EventKind::PageView => "page_view",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search_query" | "search" => Ok(EventKind::SearchQuery),
            "chat_query" | "chat" => Ok(EventKind::ChatQuery),
            "page_view" | "page" => Ok(EventKind::PageView),
            _ => Err(format!("unknown event kind: {}", s)),
        }
    }
}

// ============================================
// Source references
// ============================================

/// A document cited by a search result or chat answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl SourceRef {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            title: None,
            page: None,
            score: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }
}

// ============================================
// Event
// ============================================

/// One immutable analytics event.
///
/// Fields are private; read them through accessors. The only way to create an
/// event is [`Event::builder`], which assigns the id and timestamp and applies
/// the free-text bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: String,
    kind: EventKind,
    session_id: Option<String>,
    occurred_at: DateTime<Utc>,
    query: Option<String>,
    answer: Option<String>,
    sources: Vec<SourceRef>,
    result_count: Option<u32>,
    latency_ms: Option<u64>,
    path: Option<String>,
    referrer: Option<String>,
    ip_hash: Option<String>,
    user_agent: Option<String>,
}

impl Event {
    /// Start building an event of the given kind
    pub fn builder(kind: EventKind) -> EventBuilder {
        EventBuilder::new(kind)
    }

    /// Globally unique id; the backend de-duplicates on it
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    /// Cited sources, in the order they were recorded
    pub fn sources(&self) -> &[SourceRef] {
        &self.sources
    }

    pub fn result_count(&self) -> Option<u32> {
        self.result_count
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.latency_ms
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }

    /// Anonymized client address, never the raw value
    pub fn ip_hash(&self) -> Option<&str> {
        self.ip_hash.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

/// Builder for [`Event`]
#[derive(Debug, Clone)]
pub struct EventBuilder {
    kind: EventKind,
    session_id: Option<String>,
    query: Option<String>,
    answer: Option<String>,
    sources: Vec<SourceRef>,
    result_count: Option<u32>,
    latency_ms: Option<u64>,
    path: Option<String>,
    referrer: Option<String>,
    ip_hash: Option<String>,
    user_agent: Option<String>,
}

impl EventBuilder {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            session_id: None,
            query: None,
            answer: None,
            sources: Vec::new(),
            result_count: None,
            latency_ms: None,
            path: None,
            referrer: None,
            ip_hash: None,
            user_agent: None,
        }
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        self.session_id = (!session_id.is_empty()).then_some(session_id);
        self
    }

    /// Search text or chat question (truncated to [`MAX_QUERY_CHARS`])
    pub fn query(mut self, query: impl AsRef<str>) -> Self {
        self.query = Some(truncate_chars(query.as_ref(), MAX_QUERY_CHARS));
        self
    }

    /// Chat answer text (truncated to [`MAX_ANSWER_CHARS`])
    pub fn answer(mut self, answer: impl AsRef<str>) -> Self {
        self.answer = Some(truncate_chars(answer.as_ref(), MAX_ANSWER_CHARS));
        self
    }

    pub fn source(mut self, source: SourceRef) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = SourceRef>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn result_count(mut self, count: u32) -> Self {
        self.result_count = Some(count);
        self
    }

    pub fn latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn path(mut self, path: impl AsRef<str>) -> Self {
        self.path = Some(truncate_chars(path.as_ref(), MAX_CONTEXT_CHARS));
        self
    }

    pub fn referrer(mut self, referrer: impl AsRef<str>) -> Self {
        self.referrer = Some(truncate_chars(referrer.as_ref(), MAX_CONTEXT_CHARS));
        self
    }

    pub fn user_agent(mut self, user_agent: impl AsRef<str>) -> Self {
        self.user_agent = Some(truncate_chars(user_agent.as_ref(), MAX_CONTEXT_CHARS));
        self
    }

    /// Record the client address through an anonymizer.
    ///
    /// The raw address is never kept; if the anonymizer cannot derive a
    /// value the field stays empty.
    pub fn client_address(mut self, address: &str, anonymizer: &Anonymizer) -> Self {
        self.ip_hash = anonymizer.anonymize(address);
        self
    }

    /// Assign id and timestamp and freeze the event
    pub fn build(self) -> Event {
        Event {
            id: uuid::Uuid::new_v4().to_string(),
            kind: self.kind,
            session_id: self.session_id,
            occurred_at: monotonic_now(),
            query: self.query,
            answer: self.answer,
            sources: self.sources,
            result_count: self.result_count,
            latency_ms: self.latency_ms,
            path: self.path,
            referrer: self.referrer,
            ip_hash: self.ip_hash,
            user_agent: self.user_agent,
        }
    }
}

/// Truncate to at most `max` characters without splitting a code point
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

// ============================================
// Monotonic event clock
// ============================================

static LAST_EVENT_MILLIS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Millisecond timestamp that never goes backwards within this process.
///
/// A wall clock stepping backwards (NTP correction) is clamped to the last
/// issued value.
fn monotonic_now() -> DateTime<Utc> {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_EVENT_MILLIS.fetch_max(now, Ordering::SeqCst);
    let millis = now.max(previous);
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}
