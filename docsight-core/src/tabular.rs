//! Tabular text decoder
//!
//! Parses quote-aware delimited text (CSV by default) into typed rows. The
//! first row names the columns; the column set is not known statically.
//!
//! Decoding is tolerant: rows whose field count differs from the header are
//! dropped, which is what truncated upstream responses look like.
//!
//! Every field that fully parses as a number becomes a number, including
//! identifiers such as `"00123"`. Callers that need numeric-looking strings
//! preserved must not route them through this decoder.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// One decoded cell
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Coerce a raw field: null tokens, then numbers, then booleans, else text
    pub fn coerce(raw: &str) -> Scalar {
        if raw.is_empty() || raw == "null" || raw == "NULL" {
            return Scalar::Null;
        }
        if let Some(n) = parse_number(raw) {
            return Scalar::Number(n);
        }
        if raw.eq_ignore_ascii_case("true") {
            return Scalar::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return Scalar::Bool(false);
        }
        Scalar::Text(raw.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a JSON value (integral numbers become JSON integers)
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Null => serde_json::Value::Null,
            Scalar::Bool(b) => serde_json::Value::Bool(*b),
            Scalar::Number(n) => match as_integer(*n) {
                Some(i) => serde_json::Value::from(i),
                None => serde_json::Number::from_f64(*n)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
            },
            Scalar::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Convert from a JSON value. Nested values are kept as compact JSON text.
    pub fn from_json(value: &serde_json::Value) -> Scalar {
        match value {
            serde_json::Value::Null => Scalar::Null,
            serde_json::Value::Bool(b) => Scalar::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map(Scalar::Number).unwrap_or(Scalar::Null),
            serde_json::Value::String(s) => Scalar::Text(s.clone()),
            other => Scalar::Text(other.to_string()),
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Number(n) => match as_integer(*n) {
                Some(i) => write!(f, "{}", i),
                None => write!(f, "{}", n),
            },
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Number(n) => match as_integer(*n) {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*n),
            },
            Scalar::Text(s) => serializer.serialize_str(s),
        }
    }
}

/// Largest integer an f64 represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn as_integer(n: f64) -> Option<i64> {
    (n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER).then_some(n as i64)
}

/// Whole-string numeric parse. `NaN`, `inf` and overflow stay text.
fn parse_number(raw: &str) -> Option<f64> {
    if !raw.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// One decoded row, cells in header order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    cells: Vec<(String, Scalar)>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// JSON object with keys in header order
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .cells
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Decoded payload
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Ragged rows skipped during decoding
    #[serde(skip)]
    pub dropped_rows: usize,
}

impl Table {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Re-encode as delimited text with minimal quoting
    pub fn to_delimited(&self, delimiter: char) -> String {
        let mut out = String::new();
        push_record(&mut out, self.columns.iter().map(String::as_str), delimiter);
        for row in &self.rows {
            let fields: Vec<String> = row.cells.iter().map(|(_, v)| v.to_string()).collect();
            push_record(&mut out, fields.iter().map(String::as_str), delimiter);
        }
        out
    }

    /// Rows as JSON objects
    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        self.rows.iter().map(Row::to_json).collect()
    }

    /// Build a table from JSON objects.
    ///
    /// Columns are the union of keys in first-seen order; missing keys are
    /// null. Entries that are not objects are dropped.
    pub fn from_json_rows(values: &[serde_json::Value]) -> Table {
        let mut columns: Vec<String> = Vec::new();
        for object in values.iter().filter_map(serde_json::Value::as_object) {
            for key in object.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut rows = Vec::new();
        let mut dropped_rows = 0;
        for value in values {
            let Some(object) = value.as_object() else {
                dropped_rows += 1;
                continue;
            };
            let cells = columns
                .iter()
                .map(|name| {
                    let cell = object.get(name).map(Scalar::from_json).unwrap_or(Scalar::Null);
                    (name.clone(), cell)
                })
                .collect();
            rows.push(Row { cells });
        }

        Table {
            columns,
            rows,
            dropped_rows,
        }
    }
}

fn push_record<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>, delimiter: char) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(delimiter);
        }
        let needs_quotes = field.contains(delimiter)
            || field.contains('"')
            || field.contains('\n')
            || field.contains('\r');
        if needs_quotes {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

/// Decode comma-separated text
pub fn decode_csv(text: &str) -> Table {
    decode(text, ',')
}

/// Decode delimited text. Row 0 is the header.
pub fn decode(text: &str, delimiter: char) -> Table {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = tokenize(text, delimiter).into_iter();

    let Some(columns) = records.next() else {
        return Table::default();
    };

    let mut rows = Vec::new();
    let mut dropped_rows = 0;

    for record in records {
        if record.len() != columns.len() {
            dropped_rows += 1;
            continue;
        }
        let cells = columns
            .iter()
            .cloned()
            .zip(record.iter().map(|raw| Scalar::coerce(raw)))
            .collect();
        rows.push(Row { cells });
    }

    if dropped_rows > 0 {
        tracing::debug!(dropped_rows, columns = columns.len(), "Dropped ragged rows");
    }

    Table {
        columns,
        rows,
        dropped_rows,
    }
}

/// Split text into records of raw fields.
///
/// A `"` toggles quoting and `""` inside quotes is a literal quote. The
/// delimiter and newlines only split outside quotes. Blank lines are skipped.
fn tokenize(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut started = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            '"' => {
                in_quotes = true;
                started = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                if started {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                started = false;
            }
            c if c == delimiter => {
                record.push(std::mem::take(&mut field));
                started = true;
            }
            c => {
                field.push(c);
                started = true;
            }
        }
    }

    if started {
        record.push(field);
        records.push(record);
    }

    records
}
