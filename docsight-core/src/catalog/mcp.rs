//! MCP client over streamable HTTP
//!
//! JSON-RPC 2.0 requests are POSTed to the registry URL. The server may
//! answer with a plain JSON body or an SSE stream whose `data:` lines carry
//! the JSON-RPC messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::RegistryConfig;
use crate::error::{Error, Result};

use super::ToolRegistry;

/// Header carrying the server-assigned session
const SESSION_HEADER: &str = "mcp-session-id";

const PROTOCOL_VERSION: &str = "2025-03-26";

/// Maximum size (in bytes) of a single registry response.
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Raw outcome of `tools/call`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Text content blocks joined by newlines
    pub text: String,
    /// The tool reported failure (`isError`)
    pub is_error: bool,
}

/// Connection to an MCP tool registry.
///
/// The handshake (`initialize` + `notifications/initialized`) runs on first
/// use; concurrent first calls share it. When the server forgets the session
/// (404 on a request that carried its id) the handshake runs again and the
/// request is retried once.
pub struct McpConnection {
    http_client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
    /// `None` until a handshake succeeds
    session: Mutex<Option<SessionState>>,
}

/// Result of a completed handshake
#[derive(Debug, Clone)]
struct SessionState {
    /// Server-assigned id; stateless servers send none
    id: Option<String>,
}

/// One JSON-RPC round trip
enum Reply {
    Result {
        result: Value,
        session_id: Option<String>,
    },
    /// The server no longer knows the session the request carried
    SessionExpired,
}

impl McpConnection {
    /// Returns [`Error::NotConfigured`] when the registry URL or admin token is missing.
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::NotConfigured("registry.url is required".to_string()))?;
        let token = config
            .admin_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::NotConfigured("registry.admin_token is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Config(format!("invalid admin_token: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            session: Mutex::new(None),
        })
    }

    /// Session id, performing the handshake if none is established.
    ///
    /// A failed handshake leaves the slot empty so the next call retries.
    async fn session(&self) -> Result<Option<String>> {
        let mut slot = self.session.lock().await;
        if let Some(state) = slot.as_ref() {
            return Ok(state.id.clone());
        }

        let id = self.initialize().await?;
        *slot = Some(SessionState { id: id.clone() });
        Ok(id)
    }

    /// Forget `stale` unless another caller already replaced it
    async fn reset_session(&self, stale: Option<&str>) {
        let mut slot = self.session.lock().await;
        if slot.as_ref().is_some_and(|state| state.id.as_deref() == stale) {
            *slot = None;
        }
    }

    async fn initialize(&self) -> Result<Option<String>> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "docsight",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let (result, session) = match self.exchange("initialize", params, None).await? {
            Reply::Result { result, session_id } => (result, session_id),
            Reply::SessionExpired => {
                return Err(Error::Unreachable("initialize answered 404".to_string()))
            }
        };
        tracing::info!(
            url = %self.url,
            server = result["serverInfo"]["name"].as_str().unwrap_or("unknown"),
            session = session.is_some(),
            "Connected to tool registry"
        );

        self.notify("notifications/initialized", session.as_deref())
            .await?;
        Ok(session)
    }

    /// Send a request after the handshake and return its `result`.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let session = self.session().await?;
        match self.exchange(method, params.clone(), session.as_deref()).await? {
            Reply::Result { result, .. } => return Ok(result),
            Reply::SessionExpired => {
                tracing::warn!(method, "Registry session expired, reconnecting");
                self.reset_session(session.as_deref()).await;
            }
        }

        let session = self.session().await?;
        match self.exchange(method, params, session.as_deref()).await? {
            Reply::Result { result, .. } => Ok(result),
            Reply::SessionExpired => Err(Error::Unreachable(format!(
                "{} rejected a fresh session",
                method
            ))),
        }
    }

    async fn exchange(
        &self,
        method: &str,
        params: Value,
        session: Option<&str>,
    ) -> Result<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut request = self.http_client.post(&self.url).json(&body);
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Unreachable(format!("{} failed: {}", method, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND && session.is_some() {
            return Ok(Reply::SessionExpired);
        }
        if !status.is_success() {
            return Err(Error::Unreachable(format!(
                "{} answered with status {}",
                method, status
            )));
        }

        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let text = read_body(response, method).await?;

        let message = if is_stream {
            parse_sse(&text)
                .into_iter()
                .find(|m| m.get("id").and_then(Value::as_u64) == Some(id))
                .ok_or_else(|| {
                    Error::Unreachable(format!("{} stream carried no response", method))
                })?
        } else {
            serde_json::from_str::<Value>(&text).map_err(|e| {
                Error::Unreachable(format!("{} returned invalid JSON: {}", method, e))
            })?
        };

        if let Some(error) = message.get("error") {
            return Err(Error::Unreachable(format!("{} error: {}", method, error)));
        }

        let result = message
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Unreachable(format!("{} response has no result", method)))?;
        Ok(Reply::Result { result, session_id })
    }

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, session: Option<&str>) -> Result<()> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
        });

        let mut request = self.http_client.post(&self.url).json(&body);
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Unreachable(format!("{} failed: {}", method, e)))?;
        if !response.status().is_success() {
            return Err(Error::Unreachable(format!(
                "{} answered with status {}",
                method,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolRegistry for McpConnection {
    async fn list_tools(&self) -> Result<Vec<Value>> {
        let result = self.request("tools/list", json!({})).await?;
        Ok(result["tools"].as_array().cloned().unwrap_or_default())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        let result = self
            .request(
                "tools/call",
                json!({
                    "name": name,
                    "arguments": arguments,
                }),
            )
            .await?;

        let is_error = result["isError"].as_bool().unwrap_or(false);

        // MCP returns content as an array of content blocks
        let text = match result["content"].as_array() {
            Some(content) => content
                .iter()
                .filter_map(|c| c["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            None => result.to_string(),
        };

        Ok(ToolOutput { text, is_error })
    }
}

/// Read a response body, failing as soon as it exceeds [`MAX_RESPONSE_BYTES`].
async fn read_body(mut response: reqwest::Response, method: &str) -> Result<String> {
    let too_large = |size: usize| {
        Error::Unreachable(format!(
            "{} response exceeded size limit ({} > {} bytes)",
            method, size, MAX_RESPONSE_BYTES
        ))
    };

    if let Some(length) = response.content_length() {
        if length > MAX_RESPONSE_BYTES as u64 {
            return Err(too_large(length as usize));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::Unreachable(format!("{} body unreadable: {}", method, e)))?
    {
        if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(too_large(body.len() + chunk.len()));
        }
        body.extend_from_slice(&chunk);
    }

    String::from_utf8(body)
        .map_err(|e| Error::Unreachable(format!("{} body is not UTF-8: {}", method, e)))
}

/// JSON messages carried by an SSE body, one per event.
///
/// Multi-line `data:` fields are joined with newlines; events that don't
/// parse as JSON are skipped.
fn parse_sse(body: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut data: Vec<&str> = Vec::new();

    let mut flush = |data: &mut Vec<&str>| {
        if !data.is_empty() {
            if let Ok(value) = serde_json::from_str::<Value>(&data.join("\n")) {
                messages.push(value);
            }
            data.clear();
        }
    };

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            flush(&mut data);
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush(&mut data);

    messages
}
