//! Agent tool catalog
//!
//! Discovers the analytics tools a remote registry exposes, classifies them
//! for display, and invokes them on behalf of the agent.
//!
//! ## Usage
//!
//! ```toml
//! [registry]
//! url = "https://mcp.example.com/mcp"
//! admin_token = "xxxxxxxx"
//! ```
//!
//! Discovery failures and requests for tools outside the discovered list
//! propagate to the caller. Tool-level failures come back as
//! [`ToolResult::Error`] so the agent can report them.

mod cache;
mod classify;
mod mcp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::tabular::{decode_csv, Table};

pub use cache::{MemoryToolCache, ToolCache};
pub use classify::{classify, example_prompts, ToolCategory};
pub use mcp::{McpConnection, ToolOutput};

/// A remote tool registry.
///
/// [`McpConnection`] is the production implementation.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Raw tool definitions (`name`, `description`, `inputSchema`)
    async fn list_tools(&self) -> Result<Vec<Value>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput>;
}

/// One input parameter of a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolParameter {
    pub name: String,
    /// JSON Schema type (`string`, `integer`, ...)
    pub kind: String,
    pub description: String,
    pub required: bool,
}

/// A discovered tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDescriptor {
    /// Parse an MCP tool definition. Returns `None` without a valid name.
    pub fn from_mcp(definition: &Value) -> Option<Self> {
        let name = definition["name"].as_str().filter(|n| is_valid_tool_name(n))?;
        let description = definition["description"].as_str().unwrap_or("").trim().to_string();

        let schema = &definition["inputSchema"];
        let required: Vec<&str> = schema["required"]
            .as_array()
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let parameters = schema["properties"]
            .as_object()
            .map(|properties| {
                properties
                    .iter()
                    .map(|(name, property)| ToolParameter {
                        name: name.clone(),
                        kind: property["type"].as_str().unwrap_or("string").to_string(),
                        description: property["description"].as_str().unwrap_or("").to_string(),
                        required: required.contains(&name.as_str()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            name: name.to_string(),
            description,
            parameters,
        })
    }
}

/// A tool as shown to the agent and the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub descriptor: ToolDescriptor,
    pub category: ToolCategory,
    pub examples: Vec<String>,
}

impl CatalogEntry {
    pub fn new(descriptor: ToolDescriptor) -> Self {
        let category = classify(&descriptor);
        let examples = example_prompts(&descriptor, category);
        Self {
            descriptor,
            category,
            examples,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// Outcome of invoking a tool
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResult {
    Rows(Table),
    Error(String),
}

const MAX_TOOL_NAME_LEN: usize = 128;

/// Tool names are identifiers: letters, digits, `_`, `-` and `.`.
pub fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TOOL_NAME_LEN
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Decode tool output text into a table.
///
/// JSON arrays, `{"data": [...]}` envelopes and single objects are read as
/// JSON rows; anything else is decoded as CSV.
fn output_table(text: &str) -> Table {
    let trimmed = text.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return match value {
                Value::Array(rows) => Table::from_json_rows(&rows),
                Value::Object(ref object) => match object.get("data").and_then(Value::as_array) {
                    Some(rows) => Table::from_json_rows(rows),
                    None => Table::from_json_rows(std::slice::from_ref(&value)),
                },
                _ => Table::default(),
            };
        }
    }
    decode_csv(trimmed)
}

/// Cached catalog over a tool registry
pub struct ToolCatalog {
    registry: Option<Arc<dyn ToolRegistry>>,
    cache: Arc<dyn ToolCache>,
    /// Held while populating the cache so concurrent cold calls share one fetch
    fill: tokio::sync::Mutex<()>,
}

impl ToolCatalog {
    /// Build a catalog from configuration.
    ///
    /// Without a registry URL and admin token, discovery and invocation fail
    /// with [`Error::NotConfigured`].
    pub fn from_config(config: &Config) -> Self {
        let registry: Option<Arc<dyn ToolRegistry>> = if config.registry.is_ready() {
            match McpConnection::new(&config.registry) {
                Ok(connection) => Some(Arc::new(connection) as Arc<dyn ToolRegistry>),
                Err(e) => {
                    tracing::warn!(error = %e, "Tool registry unavailable");
                    None
                }
            }
        } else {
            None
        };

        let cache: Arc<dyn ToolCache> = match config.registry.cache_ttl_secs {
            0 => Arc::new(MemoryToolCache::new()),
            secs => Arc::new(MemoryToolCache::with_ttl(Duration::from_secs(secs))),
        };

        Self {
            registry,
            cache,
            fill: tokio::sync::Mutex::new(()),
        }
    }

    /// Catalog over an explicit registry with an in-memory cache
    pub fn with_registry(registry: Arc<dyn ToolRegistry>) -> Self {
        Self {
            registry: Some(registry),
            cache: Arc::new(MemoryToolCache::new()),
            fill: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ToolCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.registry.is_some()
    }

    fn registry(&self) -> Result<&Arc<dyn ToolRegistry>> {
        self.registry.as_ref().ok_or_else(|| {
            Error::NotConfigured("registry.url and registry.admin_token are required".to_string())
        })
    }

    /// Discovered tools, from cache when possible
    pub async fn list_tools(&self) -> Result<Arc<Vec<CatalogEntry>>> {
        if let Some(entries) = self.cache.get() {
            return Ok(entries);
        }

        let registry = self.registry()?;
        let _fill = self.fill.lock().await;

        // Another caller may have filled the cache while we waited
        if let Some(entries) = self.cache.get() {
            return Ok(entries);
        }

        let definitions = registry.list_tools().await?;
        let total = definitions.len();
        let entries: Vec<CatalogEntry> = definitions
            .iter()
            .filter_map(ToolDescriptor::from_mcp)
            .map(CatalogEntry::new)
            .collect();

        if entries.len() < total {
            tracing::debug!(skipped = total - entries.len(), "Skipped tools without a valid name");
        }
        tracing::info!(tools = entries.len(), "Tool catalog loaded");

        let entries = Arc::new(entries);
        self.cache.set(Arc::clone(&entries));
        Ok(entries)
    }

    /// Drop the cached list and fetch it again
    pub async fn refresh(&self) -> Result<Arc<Vec<CatalogEntry>>> {
        self.cache.invalidate();
        self.list_tools().await
    }

    /// Invoke a tool by name.
    ///
    /// Only tools the registry advertises may be called. Malformed names,
    /// non-object arguments and names missing from the discovered list fail
    /// with [`Error::InvalidRequest`] and never reach `tools/call`; a cold
    /// cache is filled first.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        if !is_valid_tool_name(name) {
            return Err(Error::InvalidRequest(format!("invalid tool name: {:?}", name)));
        }
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            Value::Object(_) => arguments,
            _ => {
                return Err(Error::InvalidRequest(
                    "tool arguments must be a JSON object".to_string(),
                ))
            }
        };

        let registry = self.registry()?;

        let entries = self.list_tools().await?;
        if !entries.iter().any(|e| e.name() == name) {
            tracing::warn!(tool = name, "Rejected invocation of unknown tool");
            return Err(Error::InvalidRequest(format!("unknown tool: {}", name)));
        }

        let output = registry.call_tool(name, arguments).await?;
        if output.is_error {
            tracing::warn!(tool = name, "Tool reported an error");
            return Ok(ToolResult::Error(output.text));
        }

        let table = output_table(&output.text);
        tracing::debug!(tool = name, rows = table.rows.len(), "Tool invoked");
        Ok(ToolResult::Rows(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::Scalar;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Registry answering from fixed data, counting calls
    struct CountingRegistry {
        tools: Vec<Value>,
        output: ToolOutput,
        list_calls: AtomicUsize,
        tool_calls: AtomicUsize,
        list_delay: Duration,
    }

    impl CountingRegistry {
        fn new(output: &str) -> Self {
            Self {
                tools: vec![
                    json!({
                        "name": "top_search_terms",
                        "description": "Most frequent search queries",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "days": {"type": "integer", "description": "Window size"},
                                "limit": {"type": "integer"}
                            },
                            "required": ["days"]
                        }
                    }),
                    json!({"name": "daily_volume"}),
                    json!({"name": "../etc/passwd"}),
                    json!({"description": "nameless"}),
                ],
                output: ToolOutput {
                    text: output.to_string(),
                    is_error: false,
                },
                list_calls: AtomicUsize::new(0),
                tool_calls: AtomicUsize::new(0),
                list_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl ToolRegistry for CountingRegistry {
        async fn list_tools(&self) -> Result<Vec<Value>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.list_delay).await;
            Ok(self.tools.clone())
        }

        async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<ToolOutput> {
            self.tool_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    #[test]
    fn test_descriptor_from_mcp() {
        let registry = CountingRegistry::new("");
        let descriptor = ToolDescriptor::from_mcp(&registry.tools[0]).unwrap();

        assert_eq!(descriptor.name, "top_search_terms");
        assert_eq!(descriptor.parameters.len(), 2);
        let days = descriptor.parameters.iter().find(|p| p.name == "days").unwrap();
        assert!(days.required);
        assert_eq!(days.kind, "integer");

        assert!(ToolDescriptor::from_mcp(&registry.tools[2]).is_none());
        assert!(ToolDescriptor::from_mcp(&registry.tools[3]).is_none());
    }

    #[test]
    fn test_tool_name_validation() {
        assert!(is_valid_tool_name("top_search_terms"));
        assert!(is_valid_tool_name("analytics.daily-volume"));
        assert!(!is_valid_tool_name(""));
        assert!(!is_valid_tool_name("1tool"));
        assert!(!is_valid_tool_name("drop table"));
        assert!(!is_valid_tool_name(&"a".repeat(200)));
    }

    #[test]
    fn test_output_table_formats() {
        let table = output_table("term,count\ninstall,4\n");
        assert_eq!(table.rows[0].get("count"), Some(&Scalar::Number(4.0)));

        let table = output_table(r#"{"data": [{"day": "2026-10-01", "chats": 3}], "rows": 1}"#);
        assert_eq!(table.rows.len(), 1);

        let table = output_table(r#"[{"a": 1}, {"a": 2}]"#);
        assert_eq!(table.rows.len(), 2);

        let table = output_table(r#"{"total": 9}"#);
        assert_eq!(table.rows[0].get("total"), Some(&Scalar::Number(9.0)));
    }

    #[tokio::test]
    async fn test_list_tools_classified_and_cached() {
        let registry = Arc::new(CountingRegistry::new(""));
        let catalog = ToolCatalog::with_registry(registry.clone());

        let entries = catalog.list_tools().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].category, ToolCategory::Search);
        assert_eq!(entries[1].category, ToolCategory::Traffic);
        assert!(entries.iter().all(|e| !e.examples.is_empty()));

        catalog.list_tools().await.unwrap();
        assert_eq!(registry.list_calls.load(Ordering::SeqCst), 1);

        catalog.refresh().await.unwrap();
        assert_eq!(registry.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_cold_calls_coalesce() {
        let mut registry = CountingRegistry::new("");
        registry.list_delay = Duration::from_millis(50);
        let registry = Arc::new(registry);
        let catalog = Arc::new(ToolCatalog::with_registry(registry.clone()));

        let calls = (0..8).map(|_| {
            let catalog = Arc::clone(&catalog);
            async move { catalog.list_tools().await }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(registry.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_decodes_rows() {
        let registry = Arc::new(CountingRegistry::new("term,count\ninstall,4\nupgrade,2"));
        let catalog = ToolCatalog::with_registry(registry.clone());

        let result = catalog
            .invoke("top_search_terms", json!({"days": 7}))
            .await
            .unwrap();
        match result {
            ToolResult::Rows(table) => {
                assert_eq!(table.columns, vec!["term", "count"]);
                assert_eq!(table.rows.len(), 2);
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invoke_rejects_without_network() {
        let registry = Arc::new(CountingRegistry::new("a\n1"));
        let catalog = ToolCatalog::with_registry(registry.clone());

        let result = catalog.invoke("../etc/passwd", Value::Null).await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));

        let result = catalog.invoke("daily_volume", json!([1, 2])).await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));

        catalog.list_tools().await.unwrap();
        let result = catalog.invoke("not_a_tool", Value::Null).await;
        match result {
            Err(Error::InvalidRequest(msg)) => assert_eq!(msg, "unknown tool: not_a_tool"),
            other => panic!("expected invalid request, got {:?}", other),
        }

        assert_eq!(registry.tool_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool_on_cold_cache() {
        let registry = Arc::new(CountingRegistry::new("a\n1"));
        let catalog = ToolCatalog::with_registry(registry.clone());

        let result = catalog.invoke("drop_everything", Value::Null).await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));

        // Discovery ran to fill the cache; the tool itself was never called
        assert_eq!(registry.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.tool_calls.load(Ordering::SeqCst), 0);

        let result = catalog.invoke("daily_volume", Value::Null).await.unwrap();
        assert!(matches!(result, ToolResult::Rows(_)));
        assert_eq!(registry.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.tool_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_tool_error() {
        let mut registry = CountingRegistry::new("pipe not found");
        registry.output.is_error = true;
        let catalog = ToolCatalog::with_registry(Arc::new(registry));

        let result = catalog.invoke("daily_volume", Value::Null).await.unwrap();
        assert_eq!(result, ToolResult::Error("pipe not found".to_string()));
    }

    #[tokio::test]
    async fn test_unconfigured_catalog() {
        let catalog = ToolCatalog::from_config(&Config::default());
        assert!(!catalog.is_configured());
        assert!(matches!(catalog.list_tools().await, Err(Error::NotConfigured(_))));
        assert!(matches!(
            catalog.invoke("daily_volume", Value::Null).await,
            Err(Error::NotConfigured(_))
        ));
    }
}
