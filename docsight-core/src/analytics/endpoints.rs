//! Endpoint allow-list
//!
//! Only the pipes listed here may be read, and only with the parameters
//! their schema declares. This is the security boundary between callers
//! (dashboards, the admin proxy, the agent) and the backend: every read goes
//! through [`resolve`] before any network I/O happens.

use crate::error::{Error, Result};

/// Type of a pipe parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Integer within an inclusive range
    Integer { min: u32, max: u32 },
    /// Free text, bounded length
    Text,
    /// Calendar date, `YYYY-MM-DD`
    Date,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Integer { .. } => "integer",
            ParamKind::Text => "string",
            ParamKind::Date => "date",
        }
    }
}

/// Descriptor for one pipe parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    /// Applied when the caller omits the parameter
    pub default: Option<&'static str>,
    pub description: &'static str,
}

/// Descriptor for an aggregation endpoint.
#[derive(Debug, Clone, Copy)]
pub struct EndpointDescriptor {
    pub name: &'static str,
    pub summary: &'static str,
    pub params: &'static [ParamSpec],
}

impl EndpointDescriptor {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

const MAX_TEXT_PARAM_CHARS: usize = 200;

const fn limit(default: &'static str) -> ParamSpec {
    ParamSpec {
        name: "limit",
        kind: ParamKind::Integer { min: 1, max: 1000 },
        default: Some(default),
        description: "Maximum rows returned.",
    }
}

const fn days(default: &'static str) -> ParamSpec {
    ParamSpec {
        name: "days",
        kind: ParamKind::Integer { min: 1, max: 365 },
        default: Some(default),
        description: "Size of the trailing time window in days.",
    }
}

const EVENT_TYPE: ParamSpec = ParamSpec {
    name: "event_type",
    kind: ParamKind::Text,
    default: None,
    description: "Restrict to one event kind.",
};

const START_DATE: ParamSpec = ParamSpec {
    name: "start_date",
    kind: ParamKind::Date,
    default: None,
    description: "Only count days on or after this date.",
};

/// Every pipe that may be read.
pub const ENDPOINTS: &[EndpointDescriptor] = &[
    EndpointDescriptor {
        name: "recent_events",
        summary: "Most recent events, newest first.",
        params: &[limit("50"), EVENT_TYPE],
    },
    EndpointDescriptor {
        name: "top_search_terms",
        summary: "Most frequent search queries in the window.",
        params: &[limit("10"), days("7")],
    },
    EndpointDescriptor {
        name: "top_chat_questions",
        summary: "Most frequent chat questions in the window.",
        params: &[limit("10"), days("7")],
    },
    EndpointDescriptor {
        name: "daily_volume",
        summary: "Searches, chats and page views per day.",
        params: &[days("30"), START_DATE],
    },
    EndpointDescriptor {
        name: "event_totals",
        summary: "Event counts, unique sessions and average chat latency.",
        params: &[days("7")],
    },
    EndpointDescriptor {
        name: "zero_result_searches",
        summary: "Searches that returned nothing, by frequency.",
        params: &[limit("10"), days("7")],
    },
    EndpointDescriptor {
        name: "top_documents",
        summary: "Documents cited most often in answers.",
        params: &[limit("10"), days("7")],
    },
];

/// Look up an allowed endpoint by name.
pub fn lookup(name: &str) -> Option<&'static EndpointDescriptor> {
    ENDPOINTS.iter().find(|e| e.name == name)
}

pub fn is_allowed(name: &str) -> bool {
    lookup(name).is_some()
}

/// A validated read: an allowed endpoint plus a complete parameter set.
///
/// Only [`resolve`] constructs one, so holding a `ResolvedQuery` proves the
/// allow-list check happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
    endpoint: &'static str,
    params: Vec<(String, String)>,
}

impl ResolvedQuery {
    pub fn endpoint(&self) -> &'static str {
        self.endpoint
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Validate a read against the allow-list and fill in defaults.
///
/// Unknown endpoints, unknown or repeated parameters, and malformed values
/// are rejected with [`Error::InvalidRequest`].
pub fn resolve(name: &str, provided: &[(String, String)]) -> Result<ResolvedQuery> {
    let endpoint = lookup(name)
        .ok_or_else(|| Error::InvalidRequest(format!("unknown endpoint: {}", name)))?;

    for (i, (key, _)) in provided.iter().enumerate() {
        if endpoint.param(key).is_none() {
            return Err(Error::InvalidRequest(format!(
                "parameter '{}' is not accepted by {}",
                key, endpoint.name
            )));
        }
        if provided[..i].iter().any(|(earlier, _)| earlier == key) {
            return Err(Error::InvalidRequest(format!(
                "parameter '{}' given more than once",
                key
            )));
        }
    }

    let mut params = Vec::with_capacity(endpoint.params.len());
    for spec in endpoint.params {
        let value = provided
            .iter()
            .find(|(key, _)| key == spec.name)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty());

        match value {
            Some(value) => {
                validate_value(spec, &value)?;
                params.push((spec.name.to_string(), value));
            }
            None => {
                if let Some(default) = spec.default {
                    params.push((spec.name.to_string(), default.to_string()));
                }
            }
        }
    }

    Ok(ResolvedQuery {
        endpoint: endpoint.name,
        params,
    })
}

fn validate_value(spec: &ParamSpec, value: &str) -> Result<()> {
    let invalid = |why: &str| {
        Err(Error::InvalidRequest(format!(
            "parameter '{}' {}: {:?}",
            spec.name, why, value
        )))
    };

    match spec.kind {
        ParamKind::Integer { min, max } => match value.parse::<u32>() {
            Ok(n) if (min..=max).contains(&n) => Ok(()),
            Ok(_) => invalid(&format!("must be between {} and {}", min, max)),
            Err(_) => invalid("must be an integer"),
        },
        ParamKind::Date => match chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            Ok(_) => Ok(()),
            Err(_) => invalid("must be a YYYY-MM-DD date"),
        },
        ParamKind::Text => {
            if value.chars().count() > MAX_TEXT_PARAM_CHARS {
                invalid("is too long")
            } else if value.chars().any(char::is_control) {
                invalid("contains control characters")
            } else {
                Ok(())
            }
        }
    }
}
