//! Result normalization.
//!
//! Every adapter hands its rows to this module and gets back `Record`s:
//! one mapping of column → `Value`, with the identifier and timestamps
//! lifted out. Temporal values leave this layer as ISO-8601 strings only.

use crate::ast::Value;
use crate::db::schema::{JSON_COLUMNS, TIMESTAMP_COLUMNS};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::Row;
use tracing::warn;

/// Record identifier: integer on relational backends, whatever the REST API returns otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RecordId::Int(i) => Some(*i),
            RecordId::Text(s) => s.parse().ok(),
        }
    }

    fn from_value(value: &Value) -> Option<RecordId> {
        match value {
            Value::Int(i) => Some(RecordId::Int(*i)),
            Value::Text(s) => Some(RecordId::Text(s.clone())),
            Value::Json(serde_json::Value::String(s)) => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        match id {
            RecordId::Int(i) => Value::Int(i),
            RecordId::Text(s) => Value::Text(s),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{}", i),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

/// Canonical normalized representation of one stored entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: Option<RecordId>,
    pub fields: BTreeMap<String, Value>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Record {
    /// Build a record from column/value pairs, lifting `id` and the timestamps out.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut fields: BTreeMap<String, Value> = pairs.into_iter().collect();
        let id = fields.remove("id").as_ref().and_then(RecordId::from_value);
        let created_at = fields.remove("created_at").and_then(into_timestamp_text);
        let updated_at = fields.remove("updated_at").and_then(into_timestamp_text);
        Self {
            id,
            fields,
            created_at,
            updated_at,
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.fields.get(column).and_then(Value::as_str)
    }

    pub fn int(&self, column: &str) -> Option<i64> {
        self.fields.get(column).and_then(Value::as_i64)
    }

    /// Flat JSON object: id, fields and timestamps side by side.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        if let Some(id) = &self.id {
            object.insert(
                "id".to_string(),
                serde_json::to_value(id).unwrap_or(serde_json::Value::Null),
            );
        }
        for (column, value) in &self.fields {
            object.insert(column.clone(), value.to_json());
        }
        for (column, ts) in [("created_at", &self.created_at), ("updated_at", &self.updated_at)] {
            if let Some(ts) = ts {
                object.insert(column.to_string(), serde_json::Value::String(ts.clone()));
            }
        }
        serde_json::Value::Object(object)
    }
}

fn into_timestamp_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Text(s) => Some(normalize_timestamp(&s)),
        other => Some(other.display()),
    }
}

/// Parse the timestamp shapes the three backends produce.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    // PostgREST renders offsets without minutes, e.g. `+00`
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    parse_naive_timestamp(text).map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_naive_timestamp(text: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

/// Render any recognized timestamp as ISO-8601; unknown text passes through.
///
/// Zoned values are rendered in UTC with a `Z` suffix, naive values keep
/// their wall-clock reading without an offset.
pub fn normalize_timestamp(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(naive) = parse_naive_timestamp(trimmed) {
        return format_naive(&naive);
    }
    match parse_timestamp(trimmed) {
        Some(dt) => format_utc(&dt),
        None => text.to_string(),
    }
}

fn format_naive(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

fn format_utc(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn is_timestamp_column(column: &str) -> bool {
    TIMESTAMP_COLUMNS.contains(&column)
}

fn is_json_column(column: &str) -> bool {
    JSON_COLUMNS.contains(&column)
}

/// Convert a PostgreSQL row.
pub fn record_from_pg_row(row: &Row) -> Record {
    let pairs = row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_string(), extract_pg_value(row, i, col.type_())))
        .collect::<Vec<_>>();
    Record::from_pairs(pairs)
}

fn extract_pg_value(row: &Row, idx: usize, pg_type: &Type) -> Value {
    let value = match *pg_type {
        Type::BOOL => typed::<bool>(row, idx).map(Value::Bool),
        Type::INT2 => typed::<i16>(row, idx).map(|v| Value::Int(i64::from(v))),
        Type::INT4 => typed::<i32>(row, idx).map(|v| Value::Int(i64::from(v))),
        Type::INT8 => typed::<i64>(row, idx).map(Value::Int),
        Type::OID => typed::<u32>(row, idx).map(|v| Value::Int(i64::from(v))),
        Type::FLOAT4 => typed::<f32>(row, idx).map(|v| Value::Float(f64::from(v))),
        Type::FLOAT8 => typed::<f64>(row, idx).map(Value::Float),
        // Rendered as text so no precision is lost
        Type::NUMERIC => typed::<PgNumeric>(row, idx).map(|n| Value::Text(n.0)),
        Type::UUID => typed::<PgUuid>(row, idx).map(|u| Value::Text(u.0)),
        Type::DATE => typed::<NaiveDate>(row, idx).map(|d| Value::Text(d.format("%Y-%m-%d").to_string())),
        Type::TIME => typed::<NaiveTime>(row, idx).map(|t| Value::Text(t.format("%H:%M:%S%.f").to_string())),
        Type::TIMESTAMP => typed::<NaiveDateTime>(row, idx).map(|dt| Value::Text(format_naive(&dt))),
        Type::TIMESTAMPTZ => typed::<DateTime<Utc>>(row, idx).map(|dt| Value::Text(format_utc(&dt))),
        Type::JSON | Type::JSONB => typed::<serde_json::Value>(row, idx).map(Value::Json),
        // Text-like types; anything else is reported by `typed`
        _ => typed::<String>(row, idx).map(Value::Text),
    };
    value.unwrap_or(Value::Null)
}

/// Read a nullable column, logging values the driver cannot decode instead
/// of dropping them silently.
fn typed<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    match row.try_get::<_, Option<T>>(idx) {
        Ok(value) => value,
        Err(e) => {
            let column = &row.columns()[idx];
            warn!(
                column = column.name(),
                pg_type = %column.type_(),
                error = %e,
                "cannot decode postgres value, returning null"
            );
            None
        }
    }
}

type BoxedError = Box<dyn std::error::Error + Sync + Send>;

/// Arbitrary-precision NUMERIC in its canonical decimal text form.
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxedError> {
        decode_numeric(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Decode the binary NUMERIC wire format: a header of digit count, weight,
/// sign and display scale, followed by base-10000 digits.
fn decode_numeric(raw: &[u8]) -> Result<String, BoxedError> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }
    let word = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);
    let ndigits = usize::from(word(0));
    let weight = i32::from(word(2) as i16);
    let sign = word(4);
    let dscale = usize::from(word(6));

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if raw.len() < 8 + 2 * ndigits {
        return Err("numeric value truncated".into());
    }
    let digit_at = |pos: i32| match usize::try_from(pos) {
        Ok(p) if p < ndigits => word(8 + 2 * p),
        _ => 0,
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            if pos == 0 {
                out.push_str(&digit_at(pos).to_string());
            } else {
                out.push_str(&format!("{:04}", digit_at(pos)));
            }
        }
    }
    if dscale > 0 {
        let mut fraction = String::new();
        let mut pos = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(pos)));
            pos += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

/// UUID in its hyphenated lowercase form.
struct PgUuid(String);

impl<'a> FromSql<'a> for PgUuid {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxedError> {
        if raw.len() != 16 {
            return Err(format!("uuid must be 16 bytes, got {}", raw.len()).into());
        }
        let hex: String = raw.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(PgUuid(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::UUID
    }
}

/// Convert a SQLite row given the statement's column names.
pub fn record_from_sqlite_row(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Record> {
    let mut pairs = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let value = sqlite_value(column, row.get_ref(i)?);
        pairs.push((column.clone(), value));
    }
    Ok(Record::from_pairs(pairs))
}

fn sqlite_value(column: &str, raw: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;

    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if is_json_column(column) {
                serde_json::from_str(&text)
                    .map(Value::Json)
                    .unwrap_or(Value::Text(text))
            } else if is_timestamp_column(column) {
                Value::Text(normalize_timestamp(&text))
            } else {
                Value::Text(text)
            }
        }
        ValueRef::Blob(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Convert one REST JSON object.
pub fn record_from_json(object: serde_json::Map<String, serde_json::Value>) -> Record {
    let pairs = object.into_iter().map(|(column, raw)| {
        let value = json_value(&column, raw);
        (column, value)
    });
    Record::from_pairs(pairs.collect::<Vec<_>>())
}

fn json_value(column: &str, raw: serde_json::Value) -> Value {
    match raw {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) if is_timestamp_column(column) => {
            Value::Text(normalize_timestamp(&s))
        }
        serde_json::Value::String(s) if is_json_column(column) => serde_json::from_str(&s)
            .map(Value::Json)
            .unwrap_or(Value::Text(s)),
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Json(other),
    }
}
