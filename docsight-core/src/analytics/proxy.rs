//! Admin pipe proxy
//!
//! Lets an authenticated admin surface read any allow-listed pipe by name
//! and hands back either the rows or an HTTP status with a short message.

use serde::Serialize;
use serde_json::Value;

use crate::error::Error;

use super::query::AnalyticsReader;

/// Successful proxy answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyResponse {
    pub data: Vec<Value>,
}

/// Failed proxy answer, ready to be written as an HTTP response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyError {
    #[serde(skip)]
    pub status: u16,
    #[serde(rename = "error")]
    pub message: String,
}

impl ProxyError {
    /// Map a read failure to the status the proxy answers with.
    ///
    /// Upstream auth failures keep their status so the admin sees a token
    /// problem; every other upstream failure is a bad gateway.
    pub fn from_error(error: &Error) -> Self {
        let (status, message) = match error {
            Error::InvalidRequest(msg) => (400, msg.clone()),
            Error::NotConfigured(msg) => {
                (503, format!("analytics backend not configured: {}", msg))
            }
            Error::Upstream { status, .. } if *status == 401 || *status == 403 => {
                (*status, "analytics backend rejected the read token".to_string())
            }
            Error::Upstream { status, .. } => {
                (502, format!("analytics backend returned {}", status))
            }
            other => (502, other.to_string()),
        };
        Self { status, message }
    }
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status, self.message)
    }
}

impl std::error::Error for ProxyError {}

/// Forward an allow-listed pipe read.
pub async fn proxy_read(
    reader: &AnalyticsReader,
    pipe: &str,
    params: &[(String, String)],
) -> std::result::Result<ProxyResponse, ProxyError> {
    match reader.query(pipe, params).await {
        Ok(data) => Ok(ProxyResponse { data }),
        Err(e) => {
            let mapped = ProxyError::from_error(&e);
            tracing::warn!(pipe, status = mapped.status, error = %e, "Proxy read failed");
            Err(mapped)
        }
    }
}
