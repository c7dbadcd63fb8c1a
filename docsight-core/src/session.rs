//! Session identity
//!
//! Issues an opaque session token on the first request that arrives without
//! one and persists it in a long-lived cookie. A token the client presents is
//! returned verbatim and never reissued.

use reqwest::header::{HeaderMap, HeaderValue, COOKIE};

use crate::config::Config;

/// Cookie lifetime: one year
pub const SESSION_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

/// How the session cookie is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookiePolicy {
    pub cookie_name: String,
    /// Add the `Secure` attribute (production)
    pub secure: bool,
}

impl Default for SessionCookiePolicy {
    fn default() -> Self {
        Self {
            cookie_name: "docsight_sid".to_string(),
            secure: false,
        }
    }
}

impl SessionCookiePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cookie_name: config.session.cookie_name.clone(),
            secure: config.session.secure,
        }
    }

    /// `Set-Cookie` header value persisting `token`
    pub fn set_cookie_header(&self, token: &str) -> String {
        let mut header = format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
            self.cookie_name, token, SESSION_MAX_AGE_SECS
        );
        if self.secure {
            header.push_str("; Secure");
        }
        header
    }
}

/// Outcome of resolving a request's session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionIdentity {
    /// The client presented this token
    Existing(String),
    /// A new token; the caller must send `set_cookie` on the response
    Issued { token: String, set_cookie: String },
}

impl SessionIdentity {
    pub fn token(&self) -> &str {
        match self {
            SessionIdentity::Existing(token) => token,
            SessionIdentity::Issued { token, .. } => token,
        }
    }

    /// Header value to attach to the response, if any
    pub fn set_cookie(&self) -> Option<&str> {
        match self {
            SessionIdentity::Existing(_) => None,
            SessionIdentity::Issued { set_cookie, .. } => Some(set_cookie),
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, SessionIdentity::Issued { .. })
    }
}

/// Return the request's session token, issuing one if absent
pub fn get_or_create_session_id(
    headers: &HeaderMap,
    policy: &SessionCookiePolicy,
) -> SessionIdentity {
    if let Some(token) = read_cookie(headers, &policy.cookie_name) {
        return SessionIdentity::Existing(token);
    }

    let token = uuid::Uuid::new_v4().to_string();
    tracing::debug!(session_id = %token, "Issued new session token");
    SessionIdentity::Issued {
        set_cookie: policy.set_cookie_header(&token),
        token,
    }
}

/// Resolve a session from a raw `Cookie` header value.
///
/// An unparseable header is treated as absent.
pub fn session_from_cookie_header(
    cookie: Option<&str>,
    policy: &SessionCookiePolicy,
) -> SessionIdentity {
    let mut headers = HeaderMap::new();
    if let Some(value) = cookie.and_then(|c| HeaderValue::from_str(c).ok()) {
        headers.insert(COOKIE, value);
    }
    get_or_create_session_id(&headers, policy)
}

/// Find a non-empty cookie value across all `Cookie` headers
fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| key.trim() == name && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string())
}
