//! docsight - operator CLI for the docsight analytics pipeline
//!
//! This tool provides commands for:
//! - Checking backend, registry and ingestion configuration
//! - Reading the dashboard summary and allow-listed pipes
//! - Listing and invoking agent tools
//! - Decoding tabular payloads and extracting chart blocks offline
//! - Emitting test events and resolving session cookies
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/docsight/config.toml (~/.config/docsight/config.toml)
//! - Logs: $XDG_STATE_HOME/docsight/ (~/.local/state/docsight/)

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docsight_core::analytics::{proxy_read, ENDPOINTS};
use docsight_core::collector::{DirectLogger, IngestionClient, LogOutcome, LoggerFlavor};
use docsight_core::{
    decode, extract_chart, extract_streaming, session_from_cookie_header, AnalyticsReader, Config,
    Event, EventKind, SessionCookiePolicy, ToolCatalog, ToolResult, Window,
};

#[derive(Parser)]
#[command(name = "docsight")]
#[command(about = "Analytics telemetry for a documentation assistant")]
#[command(version)]
struct Args {
    /// Write debug logs to the state directory
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and what is enabled
    Status,

    /// Print the dashboard summary
    Summary {
        /// Window size in days
        #[arg(short, long, default_value_t = 7)]
        days: u32,

        /// Print JSON instead of a report
        #[arg(long)]
        json: bool,
    },

    /// Read an allow-listed pipe
    Query {
        /// Pipe name (run without a name to list them)
        pipe: Option<String>,

        /// Parameter as key=value (repeatable)
        #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// List tools exposed by the registry
    Tools {
        /// Ignore the cached list
        #[arg(long)]
        refresh: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Invoke a registry tool
    Invoke {
        /// Tool name
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,

        /// Print CSV instead of JSON rows
        #[arg(long)]
        csv: bool,
    },

    /// Decode delimited text into JSON rows
    Decode {
        /// Input file (default: stdin)
        file: Option<PathBuf>,

        /// Field delimiter
        #[arg(short, long, default_value_t = ',')]
        delimiter: char,
    },

    /// Split an agent answer into narrative and chart
    Chart {
        /// Input file (default: stdin)
        file: Option<PathBuf>,

        /// Treat the input as a partial, still-streaming answer
        #[arg(long)]
        streaming: bool,
    },

    /// Send a test event to the backend
    Emit {
        /// Event kind: search, chat or page
        kind: EventKind,

        /// Search query or chat question
        #[arg(short, long)]
        query: Option<String>,

        /// Chat answer
        #[arg(long)]
        answer: Option<String>,

        /// Page path
        #[arg(long)]
        path: Option<String>,

        /// Session token
        #[arg(long)]
        session: Option<String>,

        /// Client address (hashed before sending)
        #[arg(long)]
        client_address: Option<String>,

        /// Latency to record, in milliseconds
        #[arg(long)]
        latency_ms: Option<u64>,

        /// Send this many copies through the batched client
        #[arg(long)]
        batch: Option<usize>,

        /// Use the edge logger (no address hashing)
        #[arg(long)]
        edge: bool,
    },

    /// Resolve a session from a Cookie header
    Session {
        /// Raw Cookie header value
        #[arg(long)]
        cookie: Option<String>,
    },
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
    Ok((key.trim().to_string(), value.to_string()))
}

fn read_input(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn set_or_unset(value: &Option<String>) -> &'static str {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => "<set>",
        _ => "<not set>",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(docsight_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Summary { days, json } => cmd_summary(&config, days, json).await,
        Command::Query { pipe, params } => cmd_query(&config, pipe.as_deref(), &params).await,
        Command::Tools { refresh, json } => cmd_tools(&config, refresh, json).await,
        Command::Invoke { tool, args, csv } => {
            cmd_invoke(&config, &tool, args.as_deref(), csv).await
        }
        Command::Decode { file, delimiter } => cmd_decode(file.as_ref(), delimiter),
        Command::Chart { file, streaming } => cmd_chart(file.as_ref(), streaming),
        Command::Emit {
            kind,
            query,
            answer,
            path,
            session,
            client_address,
            latency_ms,
            batch,
            edge,
        } => {
            let flavor = if edge { LoggerFlavor::Edge } else { LoggerFlavor::Server };
            let logger = DirectLogger::from_config(&config, flavor);

            let mut builder = Event::builder(kind);
            if let Some(q) = query {
                builder = builder.query(q);
            }
            if let Some(a) = answer {
                builder = builder.answer(a);
            }
            if let Some(p) = path {
                builder = builder.path(p);
            }
            if let Some(s) = session {
                builder = builder.session_id(s);
            }
            if let Some(addr) = client_address {
                builder = builder.client_address(&addr, logger.anonymizer());
            }
            if let Some(ms) = latency_ms {
                builder = builder.latency_ms(ms);
            }

            match batch {
                Some(count) => cmd_emit_batched(&config, builder, count).await,
                None => cmd_emit(&logger, builder.build()).await,
            }
        }
        Command::Session { cookie } => cmd_session(&config, cookie.as_deref()),
    }
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("docsight Configuration");
    println!("======================");
    println!();
    println!("Config file:     {}", Config::config_path().display());
    println!("Log file:        {}", Config::log_path().display());

    let backend = &config.backend;
    println!();
    println!("Backend");
    println!(
        "  URL:           {}",
        backend.base_url().unwrap_or("<not set>")
    );
    println!("  Write Token:   {}", set_or_unset(&backend.write_token));
    println!("  Read Token:    {}", set_or_unset(&backend.read_token));
    println!("  Datasource:    {}", backend.events_datasource);
    println!("  Timeout:       {}s", backend.timeout_secs);

    let ingest = &config.ingest;
    println!();
    println!("Ingestion");
    println!("  Batch Size:    {}", ingest.batch_size);
    println!("  Flush Every:   {}s", ingest.flush_interval_secs);
    println!("  Max Backlog:   {}", ingest.max_backlog);
    if let Err(e) = ingest.validate() {
        println!("  Invalid:       {}", e);
    }

    let registry = &config.registry;
    println!();
    println!("Tool Registry");
    println!(
        "  URL:           {}",
        registry.url.as_deref().unwrap_or("<not set>")
    );
    println!("  Admin Token:   {}", set_or_unset(&registry.admin_token));

    println!();
    println!("Privacy");
    println!("  IP Salt:       {}", set_or_unset(&config.privacy.ip_salt));
    println!("  Secure Cookie: {}", config.session.secure);

    println!();
    println!(
        "Event writes:    {}",
        if backend.can_write() { "enabled" } else { "disabled" }
    );
    println!(
        "Pipe reads:      {}",
        if backend.can_read() { "enabled" } else { "disabled" }
    );
    println!(
        "Tool catalog:    {}",
        if registry.is_ready() { "enabled" } else { "disabled" }
    );

    if !backend.can_write() && !backend.can_read() {
        println!();
        println!("Analytics is disabled. Configure it in config.toml:");
        println!();
        println!("  [backend]");
        println!("  base_url = \"https://api.tinybird.co\"");
        println!("  write_token = \"p.xxxxxxxxxxxx\"");
        println!("  read_token = \"p.xxxxxxxxxxxx\"");
    }

    Ok(())
}

async fn cmd_summary(config: &Config, days: u32, json: bool) -> Result<()> {
    let reader = AnalyticsReader::from_config(config);
    let summary = reader.get_summary(Window::last_days(days)).await;

    if json {
        return print_json(&summary);
    }

    println!("Summary (last {} days)", summary.window_days);
    println!("=======================");
    println!();
    let totals = &summary.totals;
    println!("Events:          {}", totals.total_events);
    println!("  Searches:      {}", totals.searches);
    println!("  Chats:         {}", totals.chats);
    println!("  Page Views:    {}", totals.page_views);
    println!("Sessions:        {}", totals.unique_sessions);
    println!("Chat Latency:    {}", summary.format_chat_latency());
    if let Some(rate) = summary.zero_result_rate() {
        println!("Zero Results:    {:.1}%", rate);
    }
    if let Some(day) = summary.busiest_day() {
        println!("Busiest Day:     {} ({} events)", day.day, day.total());
    }

    if !summary.top_search_terms.is_empty() {
        println!();
        println!("Top Searches:");
        for term in &summary.top_search_terms {
            println!("  {:>6}  {}", term.count, term.term);
        }
    }
    if !summary.top_chat_questions.is_empty() {
        println!();
        println!("Top Questions:");
        for question in &summary.top_chat_questions {
            println!("  {:>6}  {}", question.count, question.question);
        }
    }
    if !summary.zero_result_searches.is_empty() {
        println!();
        println!("Searches With No Results:");
        for term in &summary.zero_result_searches {
            println!("  {:>6}  {}", term.count, term.term);
        }
    }
    if !summary.top_documents.is_empty() {
        println!();
        println!("Most Cited Documents:");
        for doc in &summary.top_documents {
            println!(
                "  {:>6}  {}",
                doc.citations,
                doc.title.as_deref().unwrap_or(&doc.document_id)
            );
        }
    }

    if summary.is_empty_fallback() {
        println!();
        if reader.is_configured() {
            println!("No data could be read. Run with --verbose and check the log.");
        } else {
            println!("Pipe reads are not configured. Run 'status' for details.");
        }
    } else if summary.is_degraded() {
        println!();
        println!("Unavailable:     {}", summary.degraded.join(", "));
    }

    Ok(())
}

async fn cmd_query(config: &Config, pipe: Option<&str>, params: &[(String, String)]) -> Result<()> {
    let Some(pipe) = pipe else {
        println!("Available pipes:");
        for endpoint in ENDPOINTS {
            let params: Vec<String> = endpoint
                .params
                .iter()
                .map(|p| match p.default {
                    Some(d) => format!("{}={}", p.name, d),
                    None => format!("{}?", p.name),
                })
                .collect();
            println!("  {:<22} {}", endpoint.name, params.join(" "));
            println!("  {:<22} {}", "", endpoint.summary);
        }
        return Ok(());
    };

    let reader = AnalyticsReader::from_config(config);
    match proxy_read(&reader, pipe, params).await {
        Ok(response) => print_json(&response.data),
        Err(e) => bail!("query failed ({}): {}", e.status, e.message),
    }
}

async fn cmd_tools(config: &Config, refresh: bool, json: bool) -> Result<()> {
    let catalog = ToolCatalog::from_config(config);
    let entries = if refresh {
        catalog.refresh().await
    } else {
        catalog.list_tools().await
    }
    .context("failed to list tools")?;

    if json {
        return print_json(entries.as_ref());
    }

    if entries.is_empty() {
        println!("The registry exposes no tools.");
        return Ok(());
    }

    for entry in entries.iter() {
        println!("{} [{}]", entry.name(), entry.category);
        if !entry.descriptor.description.is_empty() {
            println!("  {}", entry.descriptor.description);
        }
        for param in &entry.descriptor.parameters {
            println!(
                "  - {}: {}{}",
                param.name,
                param.kind,
                if param.required { " (required)" } else { "" }
            );
        }
        for example in &entry.examples {
            println!("  > {}", example);
        }
        println!();
    }
    println!("{} tool(s)", entries.len());

    Ok(())
}

async fn cmd_invoke(config: &Config, tool: &str, args: Option<&str>, csv: bool) -> Result<()> {
    let arguments: serde_json::Value = match args {
        Some(raw) => serde_json::from_str(raw).context("--args must be valid JSON")?,
        None => serde_json::Value::Null,
    };

    let catalog = ToolCatalog::from_config(config);
    let result = catalog
        .invoke(tool, arguments)
        .await
        .with_context(|| format!("failed to invoke {}", tool))?;

    match result {
        ToolResult::Rows(table) if csv => {
            print!("{}", table.to_delimited(','));
            Ok(())
        }
        ToolResult::Rows(table) => print_json(&table.to_json_rows()),
        ToolResult::Error(message) => bail!("tool {} failed: {}", tool, message),
    }
}

fn cmd_decode(file: Option<&PathBuf>, delimiter: char) -> Result<()> {
    let text = read_input(file)?;
    let table = decode(&text, delimiter);

    if table.dropped_rows > 0 {
        eprintln!("Dropped {} malformed row(s)", table.dropped_rows);
    }
    print_json(&table.to_json_rows())
}

fn cmd_chart(file: Option<&PathBuf>, streaming: bool) -> Result<()> {
    let text = read_input(file)?;
    let answer = if streaming {
        extract_streaming(&text)
    } else {
        extract_chart(&text)
    };
    print_json(&answer)
}

async fn cmd_emit(logger: &DirectLogger, event: Event) -> Result<()> {
    println!("Sending {} event {}", event.kind(), event.id());
    match logger.send(&event).await {
        LogOutcome::Sent => {
            println!("Sent");
            Ok(())
        }
        LogOutcome::Disabled => {
            println!("Event writes are not configured. Run 'status' for details.");
            Ok(())
        }
        LogOutcome::Failed => bail!("event was not accepted (run with --verbose for details)"),
    }
}

async fn cmd_emit_batched(
    config: &Config,
    builder: docsight_core::EventBuilder,
    count: usize,
) -> Result<()> {
    config.ingest.validate().context("invalid [ingest] settings")?;

    let Some(client) = IngestionClient::from_config(config) else {
        println!("Event writes are not configured. Run 'status' for details.");
        return Ok(());
    };
    client.start();

    for _ in 0..count {
        client.enqueue(builder.clone().build());
    }
    let delivered = client.shutdown().await;
    tracing::debug!(delivered, "Batched emit finished");

    let stats = client.stats();
    println!("Stats:");
    println!("  API Calls:  {}", stats.api_calls);
    println!("  Sent:       {}", stats.events_sent);
    println!("  Rejected:   {}", stats.events_rejected);
    println!("  Dropped:    {}", stats.events_dropped);
    println!("  Failures:   {}", stats.api_failures);

    let undelivered = stats.events_dropped + client.pending_count();
    if undelivered > 0 {
        bail!("{} event(s) could not be delivered", undelivered);
    }
    Ok(())
}

fn cmd_session(config: &Config, cookie: Option<&str>) -> Result<()> {
    let policy = SessionCookiePolicy::from_config(config);
    let identity = session_from_cookie_header(cookie, &policy);

    println!("{}", identity.token());
    if let Some(set_cookie) = identity.set_cookie() {
        println!("Set-Cookie: {}", set_cookie);
    }
    Ok(())
}
