//! Wire format for the events endpoint
//!
//! Converts docsight's [`Event`] into the flat record the analytics backend
//! appends to its datasource, and anonymizes client addresses.
//!
//! ## Record shape
//!
//! ```text
//! {"id":"…","timestamp":"2026-01-02T03:04:05.678Z","event_type":"chat_query",
//!  "session_id":"…","query":"…","sources":"[{\"document_id\":\"…\"}]", …}
//! ```
//!
//! - `timestamp` is RFC 3339 with millisecond precision
//! - `sources` is a compact JSON string so the datasource column stays a string
//! - absent fields are omitted rather than sent as `null`

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Event;

/// One row as appended to the events datasource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub timestamp: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl EventRecord {
    /// Create a wire record from an event
    pub fn from_event(event: &Event) -> Self {
        let sources = if event.sources().is_empty() {
            None
        } else {
            // A Vec of plain structs cannot fail to serialize
            serde_json::to_string(event.sources()).ok()
        };

        EventRecord {
            id: event.id().to_string(),
            timestamp: event
                .occurred_at()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            event_type: event.kind().as_str().to_string(),
            session_id: event.session_id().map(str::to_string),
            query: event.query().map(str::to_string),
            answer: event.answer().map(str::to_string),
            sources,
            result_count: event.result_count(),
            latency_ms: event.latency_ms(),
            path: event.path().map(str::to_string),
            referrer: event.referrer().map(str::to_string),
            ip_hash: event.ip_hash().map(str::to_string),
            user_agent: event.user_agent().map(str::to_string),
        }
    }
}

/// Encode records as newline-delimited JSON, one record per line
pub fn encode_ndjson(records: &[EventRecord]) -> crate::error::Result<String> {
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    Ok(body)
}

/// Derives the privacy field for a client address.
///
/// The server runtime hashes with SHA-256. The edge runtime has no hashing
/// library available, so it records nothing rather than the raw address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anonymizer {
    /// `hex(sha256(salt ":" address)[..16])`
    Salted { salt: String },
    /// Drop the address entirely
    Redact,
}

impl Anonymizer {
    /// Salted hashing when a salt is configured, redaction otherwise
    pub fn salted(salt: Option<&str>) -> Self {
        match salt.filter(|s| !s.is_empty()) {
            Some(salt) => Anonymizer::Salted {
                salt: salt.to_string(),
            },
            None => Anonymizer::Redact,
        }
    }

    /// Returns the anonymized value, or None when nothing may be stored
    pub fn anonymize(&self, address: &str) -> Option<String> {
        let address = address.trim();
        if address.is_empty() {
            return None;
        }
        match self {
            Anonymizer::Salted { salt } => Some(hash_address(salt, address)),
            Anonymizer::Redact => None,
        }
    }
}

/// Returns a 32-character hex digest of SHA-256(salt + ":" + address)
fn hash_address(salt: &str, address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(address.as_bytes());
    let result = hasher.finalize();

    // Take first 16 bytes (32 hex chars)
    hex::encode(&result[..16])
}

/// Response from POST /v0/events
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsResponse {
    /// Rows appended to the datasource
    #[serde(default)]
    pub successful_rows: usize,
    /// Rows the backend set aside as malformed
    #[serde(default)]
    pub quarantined_rows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, SourceRef};

    fn make_chat_event() -> Event {
        Event::builder(EventKind::ChatQuery)
            .session_id("sess-1")
            .query("What is the refund policy?")
            .answer("Refunds are issued within 30 days.")
            .source(SourceRef::new("doc-9").with_title("Policies").with_page(4))
            .source(SourceRef::new("doc-2"))
            .latency_ms(812)
            .build()
    }

    #[test]
    fn test_event_to_record() {
        let event = make_chat_event();
        let record = EventRecord::from_event(&event);

        assert_eq!(record.id, event.id());
        assert_eq!(record.event_type, "chat_query");
        assert_eq!(record.session_id.as_deref(), Some("sess-1"));
        assert_eq!(record.latency_ms, Some(812));
        assert!(record.timestamp.ends_with('Z'));
        assert_eq!(record.timestamp.len(), "2026-01-02T03:04:05.678Z".len());
    }

    #[test]
    fn test_sources_encoded_as_compact_string() {
        let record = EventRecord::from_event(&make_chat_event());
        let sources = record.sources.unwrap();

        assert!(!sources.contains(' '));
        let decoded: Vec<SourceRef> = serde_json::from_str(&sources).unwrap();
        assert_eq!(decoded[0].document_id, "doc-9");
        assert_eq!(decoded[0].page, Some(4));
        assert_eq!(decoded[1].document_id, "doc-2");
    }

    #[test]
    fn test_absent_fields_omitted() {
        let event = Event::builder(EventKind::PageView).path("/").build();
        let json = serde_json::to_value(EventRecord::from_event(&event)).unwrap();

        assert!(json.get("query").is_none());
        assert!(json.get("sources").is_none());
        assert!(json.get("session_id").is_none());
        assert_eq!(json["path"], "/");
    }

    #[test]
    fn test_ndjson_one_line_per_record() {
        let records: Vec<EventRecord> = (0..3)
            .map(|_| EventRecord::from_event(&make_chat_event()))
            .collect();
        let body = encode_ndjson(&records).unwrap();

        assert_eq!(body.lines().count(), 3);
        for line in body.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["event_type"], "chat_query");
        }
    }

    #[test]
    fn test_salted_hash_is_deterministic_and_opaque() {
        let anonymizer = Anonymizer::salted(Some("pepper"));
        let a = anonymizer.anonymize("203.0.113.7").unwrap();
        let b = anonymizer.anonymize("203.0.113.7").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(!a.contains("203"));
        assert_ne!(
            a,
            Anonymizer::salted(Some("salt")).anonymize("203.0.113.7").unwrap()
        );
    }

    #[test]
    fn test_redact_never_stores_address() {
        assert_eq!(Anonymizer::Redact.anonymize("203.0.113.7"), None);
        assert_eq!(Anonymizer::salted(None), Anonymizer::Redact);
        assert_eq!(Anonymizer::salted(Some("")), Anonymizer::Redact);
        assert_eq!(Anonymizer::salted(Some("s")).anonymize("   "), None);
    }

    #[test]
    fn test_builder_uses_anonymizer() {
        let event = Event::builder(EventKind::SearchQuery)
            .client_address("198.51.100.1", &Anonymizer::salted(Some("k")))
            .build();
        let record = EventRecord::from_event(&event);

        let hash = record.ip_hash.unwrap();
        assert_eq!(hash.len(), 32);
        assert!(!serde_json::to_string(&EventRecord::from_event(&event))
            .unwrap()
            .contains("198.51.100.1"));
    }
}
