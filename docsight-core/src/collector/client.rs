//! HTTP client for the analytics backend events API
//!
//! Appends NDJSON records to the configured datasource with
//! `POST {base}/v0/events?name={datasource}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::BackendConfig;
use crate::error::{Error, Result};

use super::events::{encode_ndjson, EventRecord, EventsResponse};

/// Destination for event records.
///
/// [`CollectorClient`] is the production implementation; tests substitute
/// in-memory sinks to simulate failures.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Send records as one request. An empty slice is a no-op.
    async fn send(&self, records: &[EventRecord]) -> Result<EventsResponse>;
}

/// HTTP client for the events endpoint
pub struct CollectorClient {
    http_client: reqwest::Client,
    events_url: String,
}

impl CollectorClient {
    /// Create a new collector client from configuration
    ///
    /// Returns [`Error::NotConfigured`] when the base URL or write token is missing.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = config
            .base_url()
            .ok_or_else(|| Error::NotConfigured("backend.base_url is required".to_string()))?;
        let token = config
            .write_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::NotConfigured("backend.write_token is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-ndjson"),
        );

        let auth_value = format!("Bearer {}", token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| Error::Config(format!("invalid write_token: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        let events_url = format!(
            "{}/v0/events?name={}",
            base_url,
            urlencoding::encode(&config.events_datasource)
        );

        Ok(Self {
            http_client,
            events_url,
        })
    }

    /// Append records to the events datasource
    pub async fn send_records(&self, records: &[EventRecord]) -> Result<EventsResponse> {
        if records.is_empty() {
            return Ok(EventsResponse::default());
        }

        let body = encode_ndjson(records)?;

        let response = self
            .http_client
            .post(&self.events_url)
            .body(body)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            // Some deployments answer 202 with an empty body
            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(EventsResponse {
                    successful_rows: records.len(),
                    quarantined_rows: 0,
                });
            }
            let result: EventsResponse = serde_json::from_str(&text)?;
            Ok(result)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Upstream {
                status: status.as_u16(),
                message: error_text,
            })
        }
    }
}

#[async_trait]
impl EventSink for CollectorClient {
    async fn send(&self, records: &[EventRecord]) -> Result<EventsResponse> {
        self.send_records(records).await
    }
}
