//! Chart blocks in agent answers
//!
//! The analytics agent may embed one chart in its answer as a fenced block
//! tagged `chart` holding a JSON spec:
//!
//! ````text
//! Searches doubled this week.
//!
//! ```chart
//! {"type": "line", "data": [{"day": "2026-10-01", "searches": 12}],
//!  "config": {"xAxis": "day", "yAxis": "searches"}}
//! ```
//! ````
//!
//! Extraction never fails. An invalid or missing block leaves the answer
//! untouched and yields no chart.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

/// First complete `chart` fence; group 1 is the body
static CHART_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```chart[ \t]*\r?\n(.*?)```").expect("chart fence regex should compile")
});

/// Opening `chart` fence, terminated or not
static CHART_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```chart\b").expect("chart open regex should compile"));

static EXTRA_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("blank line regex should compile"));

/// Kind of chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Area,
    Table,
    Metric,
}

impl ChartType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bar" => Some(ChartType::Bar),
            "line" => Some(ChartType::Line),
            "pie" => Some(ChartType::Pie),
            "area" => Some(ChartType::Area),
            "table" => Some(ChartType::Table),
            "metric" => Some(ChartType::Metric),
            _ => None,
        }
    }
}

/// Per-type rendering configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChartConfig {
    /// bar, line, area
    Axes {
        #[serde(rename = "xAxis")]
        x_axis: String,
        #[serde(rename = "yAxis")]
        y_axis: Vec<String>,
    },
    Pie {
        #[serde(rename = "nameKey")]
        name_key: String,
        #[serde(rename = "valueKey")]
        value_key: String,
    },
    Table {
        columns: Vec<String>,
    },
    Metric {
        value: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
}

/// A validated chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub data: Vec<Map<String, Value>>,
    pub config: ChartConfig,
}

/// An agent answer split into prose and an optional chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentAnswer {
    pub narrative: String,
    pub chart: Option<ChartSpec>,
}

impl AgentAnswer {
    fn plain(text: &str) -> Self {
        Self {
            narrative: text.to_string(),
            chart: None,
        }
    }
}

/// Split a complete answer into narrative and chart.
pub fn extract_chart(text: &str) -> AgentAnswer {
    let Some(fence) = CHART_FENCE.captures(text) else {
        return AgentAnswer::plain(text);
    };
    let (Some(block), Some(body)) = (fence.get(0), fence.get(1)) else {
        return AgentAnswer::plain(text);
    };

    match parse_chart(body.as_str()) {
        Ok(chart) => {
            let mut narrative = String::with_capacity(text.len());
            narrative.push_str(&text[..block.start()]);
            narrative.push_str(&text[block.end()..]);
            let narrative = EXTRA_BLANK_LINES.replace_all(narrative.trim(), "\n\n");
            AgentAnswer {
                narrative: narrative.into_owned(),
                chart: Some(chart),
            }
        }
        Err(reason) => {
            tracing::debug!(reason = %reason, "Ignoring invalid chart block");
            AgentAnswer::plain(text)
        }
    }
}

/// Like [`extract_chart`], for an answer still being streamed.
///
/// A chart fence that has opened but not yet closed is hidden from the
/// narrative so raw JSON never flashes on screen.
pub fn extract_streaming(text: &str) -> AgentAnswer {
    if CHART_FENCE.is_match(text) {
        return extract_chart(text);
    }
    match CHART_OPEN.find(text) {
        Some(open) => AgentAnswer {
            narrative: text[..open.start()].trim_end().to_string(),
            chart: None,
        },
        None => AgentAnswer::plain(text),
    }
}

fn parse_chart(body: &str) -> Result<ChartSpec, String> {
    let raw: Value = serde_json::from_str(body.trim()).map_err(|e| format!("invalid JSON: {}", e))?;
    let object = raw.as_object().ok_or("chart spec is not an object")?;

    let type_name = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or("missing type")?;
    let chart_type =
        ChartType::parse(type_name).ok_or_else(|| format!("unknown type {:?}", type_name))?;

    let data = object
        .get("data")
        .and_then(Value::as_array)
        .ok_or("data is not an array")?
        .iter()
        .map(|row| row.as_object().cloned().ok_or("data row is not an object"))
        .collect::<Result<Vec<_>, _>>()?;

    // Config keys may sit under "config" or at the top level
    let config = object.get("config").and_then(Value::as_object).unwrap_or(object);
    let config = parse_config(chart_type, config)?;

    let title = object
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    Ok(ChartSpec {
        chart_type,
        title,
        data,
        config,
    })
}

fn parse_config(chart_type: ChartType, config: &Map<String, Value>) -> Result<ChartConfig, String> {
    let text = |key: &str| {
        config
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| format!("{:?} chart requires {}", chart_type, key))
    };

    match chart_type {
        ChartType::Bar | ChartType::Line | ChartType::Area => {
            let x_axis = text("xAxis")?;
            let y_axis = match config.get("yAxis") {
                Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
                Some(Value::Array(keys)) => keys
                    .iter()
                    .map(|k| k.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .filter(|keys| !keys.is_empty())
                    .ok_or("yAxis must be a string or a list of strings")?,
                _ => return Err(format!("{:?} chart requires yAxis", chart_type)),
            };
            Ok(ChartConfig::Axes { x_axis, y_axis })
        }
        ChartType::Pie => Ok(ChartConfig::Pie {
            name_key: text("nameKey")?,
            value_key: text("valueKey")?,
        }),
        ChartType::Table => {
            let columns = config
                .get("columns")
                .and_then(Value::as_array)
                .ok_or("table chart requires columns")?
                .iter()
                .map(|c| match c {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(o) => o.get("key").and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .filter(|columns| !columns.is_empty())
                .ok_or("columns must be a non-empty list of names")?;
            Ok(ChartConfig::Table { columns })
        }
        ChartType::Metric => {
            let value = config
                .get("value")
                .filter(|v| v.is_number() || v.is_string())
                .cloned()
                .ok_or("metric chart requires a numeric or string value")?;
            let label = config.get("label").and_then(Value::as_str).map(str::to_string);
            Ok(ChartConfig::Metric { value, label })
        }
    }
}
