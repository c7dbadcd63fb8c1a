//! Integration tests for the docsight pipeline
//!
//! These tests run the public API against `wiremock` stand-ins for the
//! analytics backend and the tool registry, and use fixture files in
//! `tests/fixtures/` for tool output and agent answers.

use std::path::PathBuf;
use std::sync::Arc;

use docsight_core::analytics::{proxy_read, SUMMARY_SLICES};
use docsight_core::catalog::ToolCategory;
use docsight_core::collector::{
    DirectLogger, FlushOutcome, IngestionClient, LogOutcome, LoggerFlavor,
};
use docsight_core::{
    decode_csv, extract_chart, get_or_create_session_id, AnalyticsReader, Config, Event, EventKind,
    Scalar, SessionCookiePolicy, SourceRef, ToolCatalog, ToolResult, Window,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).expect("fixture should exist")
}

/// Config pointing every client at one mock server
fn config_for(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.backend.base_url = Some(server.uri());
    config.backend.write_token = Some("p.write".to_string());
    config.backend.read_token = Some("p.read".to_string());
    config.backend.timeout_secs = 2;
    config.backend.summary_timeout_secs = 2;
    config.registry.url = Some(format!("{}/mcp", server.uri()));
    config.registry.admin_token = Some("admin".to_string());
    config.registry.timeout_secs = 2;
    config.privacy.ip_salt = Some("pepper".to_string());
    config
}

async fn mount_events_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v0/events"))
        .and(header("authorization", "Bearer p.write"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "successful_rows": 1,
            "quarantined_rows": 0
        })))
        .mount(server)
        .await;
}

/// NDJSON records received by the events endpoint, per request
async fn received_batches(server: &MockServer) -> Vec<Vec<Value>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == "/v0/events")
        .map(|r| {
            String::from_utf8(r.body)
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        })
        .collect()
}

// ============================================
// Write path
// ============================================

#[tokio::test]
async fn test_batched_ingestion_preserves_order() {
    docsight_core::logging::init_test();
    let server = MockServer::start().await;
    mount_events_endpoint(&server).await;

    let mut config = config_for(&server);
    config.ingest.batch_size = 5;
    config.ingest.max_backlog = 50;

    let client = IngestionClient::from_config(&config).expect("writes configured");
    client.start();

    for i in 0..4 {
        client.enqueue(
            Event::builder(EventKind::SearchQuery)
                .session_id("sess-1")
                .query(format!("query {}", i))
                .result_count(i)
                .build(),
        );
    }
    assert_eq!(client.pending_count(), 4);
    assert_eq!(client.flush().await, FlushOutcome::Sent(4));

    for i in 4..6 {
        client.enqueue(
            Event::builder(EventKind::SearchQuery)
                .query(format!("query {}", i))
                .build(),
        );
    }
    client.shutdown().await;

    let batches = received_batches(&server).await;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 4);
    assert_eq!(batches[1].len(), 2);

    let queries: Vec<&str> = batches
        .iter()
        .flatten()
        .map(|r| r["query"].as_str().unwrap())
        .collect();
    assert_eq!(
        queries,
        vec!["query 0", "query 1", "query 2", "query 3", "query 4", "query 5"]
    );
    assert_eq!(batches[0][0]["event_type"], "search_query");
    assert_eq!(batches[0][0]["session_id"], "sess-1");
    assert!(batches[0][0]["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_direct_loggers_anonymize_by_flavor() {
    let server = MockServer::start().await;
    mount_events_endpoint(&server).await;
    let config = config_for(&server);

    let server_logger = DirectLogger::from_config(&config, LoggerFlavor::Server);
    let event = Event::builder(EventKind::ChatQuery)
        .query("How do I rotate tokens?")
        .answer("Use the admin console.")
        .source(SourceRef::new("doc-7").with_title("Tokens"))
        .latency_ms(1200)
        .client_address("203.0.113.9", server_logger.anonymizer())
        .build();
    assert_eq!(server_logger.send(&event).await, LogOutcome::Sent);

    let edge_logger = DirectLogger::from_config(&config, LoggerFlavor::Edge);
    let event = Event::builder(EventKind::PageView)
        .path("/docs/install")
        .client_address("203.0.113.9", edge_logger.anonymizer())
        .build();
    assert_eq!(edge_logger.send(&event).await, LogOutcome::Sent);

    let batches = received_batches(&server).await;
    assert_eq!(batches.len(), 2);

    let chat = &batches[0][0];
    let ip_hash = chat["ip_hash"].as_str().unwrap();
    assert_eq!(ip_hash.len(), 32);
    assert!(!ip_hash.contains("203.0.113.9"));
    assert!(chat["sources"].as_str().unwrap().contains("doc-7"));

    let page = &batches[1][0];
    assert_eq!(page["path"], "/docs/install");
    assert!(page.get("ip_hash").is_none());
}

#[tokio::test]
async fn test_logger_failure_is_swallowed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let logger = DirectLogger::from_config(&config_for(&server), LoggerFlavor::Server);
    let event = Event::builder(EventKind::SearchQuery).query("q").build();
    assert_eq!(logger.send(&event).await, LogOutcome::Failed);

    let disabled = DirectLogger::from_config(&Config::default(), LoggerFlavor::Server);
    assert_eq!(disabled.send(&event).await, LogOutcome::Disabled);
}

// ============================================
// Read path
// ============================================

async fn mount_pipe(server: &MockServer, name: &str, status: u16, data: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/v0/pipes/{}.json", name)))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({
            "meta": [],
            "data": data,
            "rows": 0,
            "statistics": {}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_summary_survives_failing_pipe() {
    docsight_core::logging::init_test();
    let server = MockServer::start().await;
    mount_pipe(
        &server,
        "event_totals",
        200,
        json!([{"total_events": "310", "searches": 200, "chats": 90, "page_views": 20,
                "unique_sessions": 41, "avg_chat_latency_ms": 820.4}]),
    )
    .await;
    mount_pipe(
        &server,
        "daily_volume",
        200,
        json!([{"day": "2026-10-15", "searches": 30, "chats": 12, "page_views": 4}]),
    )
    .await;
    mount_pipe(&server, "top_search_terms", 200, json!([{"term": "install", "count": 42}])).await;
    mount_pipe(&server, "top_chat_questions", 200, json!([])).await;
    mount_pipe(&server, "zero_result_searches", 200, json!([{"term": "sso", "count": 5}])).await;
    mount_pipe(&server, "top_documents", 500, json!(null)).await;

    let reader = AnalyticsReader::from_config(&config_for(&server));
    let summary = reader.get_summary(Window::last_days(14)).await;

    assert_eq!(summary.degraded, vec!["top_documents"]);
    assert!(summary.top_documents.is_empty());
    assert_eq!(summary.totals.total_events, 310);
    assert_eq!(summary.top_search_terms[0].term, "install");
    assert_eq!(summary.zero_result_searches[0].count, 5);
    assert_eq!(summary.format_chat_latency(), "820ms");

    let days: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter_map(|r| {
            r.url
                .query_pairs()
                .find(|(k, _)| k == "days")
                .map(|(_, v)| v.into_owned())
        })
        .collect();
    assert_eq!(days.len(), SUMMARY_SLICES.len());
    assert!(days.iter().all(|d| d == "14"));
}

#[tokio::test]
async fn test_proxy_maps_upstream_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .mount(&server)
        .await;

    let reader = AnalyticsReader::from_config(&config_for(&server));
    let err = proxy_read(&reader, "top_documents", &[]).await.unwrap_err();
    assert_eq!(err.status, 401);

    let err = proxy_read(&reader, "raw_events", &[]).await.unwrap_err();
    assert_eq!(err.status, 400);

    // Only the allow-listed read reached the backend
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

// ============================================
// Tool catalog
// ============================================

async fn mount_registry(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Mcp-Session-Id", "s-42")
                .set_body_json(json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": {"protocolVersion": "2025-03-26", "serverInfo": {"name": "analytics"}}
                })),
        )
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "notifications/initialized"})))
        .respond_with(ResponseTemplate::new(202))
        .mount(server)
        .await;

    let tools: Value = serde_json::from_str(&fixture("tools_list.json")).unwrap();
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("mcp-session-id", "s-42"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(tools))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("mcp-session-id", "s-42"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "result": {"content": [{"type": "text", "text": fixture("top_search_terms.csv")}]}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_catalog_discovers_and_invokes_tools() {
    docsight_core::logging::init_test();
    let server = MockServer::start().await;
    mount_registry(&server).await;

    let catalog = ToolCatalog::from_config(&config_for(&server));

    let tools = catalog.list_tools().await.unwrap();
    let categories: Vec<(&str, ToolCategory)> =
        tools.iter().map(|t| (t.name(), t.category)).collect();
    assert_eq!(
        categories,
        vec![
            ("top_search_terms", ToolCategory::Search),
            ("chat_latency_p95", ToolCategory::Performance),
            ("explain", ToolCategory::Other),
        ]
    );
    assert!(tools.iter().all(|t| !t.examples.is_empty() && t.examples.len() <= 3));

    // Served from cache: tools/list is expected exactly once
    catalog.list_tools().await.unwrap();

    let result = catalog
        .invoke("top_search_terms", json!({"days": 7}))
        .await
        .unwrap();
    let ToolResult::Rows(table) = result else {
        panic!("expected rows");
    };
    assert_eq!(table.columns, vec!["term", "count", "share", "zero_results"]);
    assert_eq!(table.rows.len(), 4);
    assert_eq!(table.dropped_rows, 1);

    let unknown = catalog.invoke("drop_everything", Value::Null).await;
    assert!(matches!(unknown, Err(docsight_core::Error::InvalidRequest(_))));
}

#[tokio::test]
async fn test_catalog_unreachable_registry() {
    let mut config = Config::default();
    config.registry.url = Some("http://127.0.0.1:9/mcp".to_string());
    config.registry.admin_token = Some("admin".to_string());
    config.registry.timeout_secs = 1;

    let catalog = ToolCatalog::from_config(&config);
    let err = catalog.list_tools().await.unwrap_err();
    assert!(matches!(err, docsight_core::Error::Unreachable(_)));
}

// ============================================
// Decoding and rendering
// ============================================

#[test]
fn test_decode_fixture() {
    let table = decode_csv(&fixture("top_search_terms.csv"));

    assert_eq!(table.rows.len(), 4);
    assert_eq!(table.dropped_rows, 1);

    let upgrade = &table.rows[1];
    assert_eq!(
        upgrade.get("term"),
        Some(&Scalar::Text("upgrade, major version".to_string()))
    );
    assert_eq!(upgrade.get("share"), Some(&Scalar::Number(0.125)));
    assert_eq!(table.rows[2].get("zero_results"), Some(&Scalar::Bool(true)));
    assert_eq!(
        table.rows[3].get("term"),
        Some(&Scalar::Text("say \"hello\"".to_string()))
    );

    let again = decode_csv(&table.to_delimited(','));
    assert_eq!(again.columns, table.columns);
    assert_eq!(again.rows, table.rows);
}

#[test]
fn test_chart_fixture() {
    let answer = extract_chart(&fixture("answer_with_chart.md"));

    let chart = answer.chart.expect("chart should be extracted");
    assert_eq!(chart.data.len(), 3);
    assert_eq!(chart.title.as_deref(), Some("Searches per day"));
    assert!(answer.narrative.starts_with("Search volume roughly doubled"));
    assert!(answer.narrative.ends_with("air-gapped clusters."));
    assert!(!answer.narrative.contains("```"));
}

// ============================================
// Sessions
// ============================================

#[test]
fn test_session_issue_then_replay() {
    let policy = SessionCookiePolicy {
        cookie_name: "sid".to_string(),
        secure: true,
    };

    let first = get_or_create_session_id(&Default::default(), &policy);
    let set_cookie = first.set_cookie().expect("new session sets a cookie").to_string();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.ends_with("Secure"));

    let cookie = set_cookie.split(';').next().unwrap();
    let second = docsight_core::session_from_cookie_header(Some(cookie), &policy);
    assert!(!second.is_new());
    assert_eq!(second.token(), first.token());
}

#[test]
fn test_shared_reader_is_cloneable() {
    let reader = Arc::new(AnalyticsReader::from_config(&Config::default()));
    let clone = (*reader).clone();
    assert!(!clone.is_configured());
}
