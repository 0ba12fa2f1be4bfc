//! Typed values and parameter lists exchanged with the engine.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;

/// A single SQL value.
///
/// `Timestamp` only travels towards the engine: it is rendered through the
/// connection's [`TimestampFormatter`] when one is installed, otherwise stored
/// as fractional seconds since the Unix epoch. Values read back are never
/// `Timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the storage class, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Timestamp(_) => "timestamp",
        }
    }

    /// Integer view with the engine's coercions: null is 0, reals truncate,
    /// numeric text parses and anything else is 0.
    pub fn as_i64(&self) -> i64 {
        match self {
            Value::Null => 0,
            Value::Integer(i) => *i,
            Value::Real(f) => *f as i64,
            Value::Text(t) => text_as_i64(t),
            Value::Blob(b) => text_as_i64(&String::from_utf8_lossy(b)),
            Value::Timestamp(ts) => ts.timestamp(),
        }
    }

    /// Floating point view with the same coercions as [`Value::as_i64`].
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Integer(i) => *i as f64,
            Value::Real(f) => *f,
            Value::Text(t) => text_as_f64(t),
            Value::Blob(b) => text_as_f64(&String::from_utf8_lossy(b)),
            Value::Timestamp(ts) => unix_seconds(ts),
        }
    }

    /// Text view; `None` for null.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Text(t) => Some(t.clone()),
            Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::Timestamp(ts) => Some(ts.to_rfc3339()),
        }
    }

    /// Byte view; `None` for null.
    pub fn as_blob(&self) -> Option<Vec<u8>> {
        match self {
            Value::Null => None,
            Value::Blob(b) => Some(b.clone()),
            Value::Text(t) => Some(t.as_bytes().to_vec()),
            other => other.as_text().map(String::into_bytes),
        }
    }
}

fn text_as_i64(text: &str) -> i64 {
    let text = text.trim();
    text.parse::<i64>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().map(|f| f as i64))
        .unwrap_or(0)
}

fn text_as_f64(text: &str) -> f64 {
    text.trim().parse::<f64>().unwrap_or(0.0)
}

pub(crate) fn unix_seconds(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) / 1e9
}

pub(crate) fn from_unix_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = (((seconds - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos)
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(t) => ToSqlOutput::Borrowed(ValueRef::Text(t.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Timestamp(ts) => ToSqlOutput::Owned(rusqlite::types::Value::Real(unix_seconds(ts))),
        })
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Parameters bound to a statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    /// No parameters.
    #[default]
    None,
    /// Values bound to `?` / `?NNN` placeholders in order, 1-based.
    Positional(Vec<Value>),
    /// Values bound by name; a name without a `:`, `@` or `$` prefix matches
    /// any of them.
    Named(Vec<(String, Value)>),
}

impl Params {
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Number of values carried.
    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(values) => values.len(),
            Params::Named(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::None
    }
}

/// Renders timestamps to text for binding and parses them back when reading.
pub trait TimestampFormatter {
    fn format(&self, ts: &DateTime<Utc>) -> String;
    fn parse(&self, text: &str) -> Option<DateTime<Utc>>;
}

/// `strftime`-style pattern formatter, always in UTC.
#[derive(Debug, Clone)]
pub struct PatternFormatter {
    pattern: String,
}

impl PatternFormatter {
    /// Sortable `YYYY-MM-DD HH:MM:SS` layout.
    pub const STORABLE: &'static str = "%Y-%m-%d %H:%M:%S";

    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl Default for PatternFormatter {
    fn default() -> Self {
        Self::new(Self::STORABLE)
    }
}

impl TimestampFormatter for PatternFormatter {
    fn format(&self, ts: &DateTime<Utc>) -> String {
        ts.format(&self.pattern).to_string()
    }

    fn parse(&self, text: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(text, &self.pattern)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn coercions_follow_engine_rules() {
        assert_eq!(Value::Null.as_i64(), 0);
        assert_eq!(Value::Real(3.9).as_i64(), 3);
        assert_eq!(Value::Text(" 42 ".into()).as_i64(), 42);
        assert_eq!(Value::Text("2.5".into()).as_f64(), 2.5);
        assert_eq!(Value::Text("abc".into()).as_i64(), 0);
        assert_eq!(Value::Integer(7).as_text().as_deref(), Some("7"));
        assert_eq!(Value::Null.as_text(), None);
        assert_eq!(Value::Text("hi".into()).as_blob(), Some(b"hi".to_vec()));
    }

    #[test]
    fn option_maps_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert_eq!(Value::from(true), Value::Integer(1));
    }

    #[test]
    fn unix_seconds_keep_sub_second_precision() {
        let ts = Utc.with_ymd_and_hms(2020, 4, 29, 8, 30, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        let secs = unix_seconds(&ts);
        assert_eq!(from_unix_seconds(secs), Some(ts));
        assert_eq!(from_unix_seconds(f64::NAN), None);
    }

    #[test]
    fn pattern_formatter_round_trips_whole_seconds() {
        let formatter = PatternFormatter::default();
        let ts = Utc.with_ymd_and_hms(2018, 4, 24, 17, 5, 9).unwrap();
        let text = formatter.format(&ts);
        assert_eq!(text, "2018-04-24 17:05:09");
        assert_eq!(formatter.parse(&text), Some(ts));
        assert_eq!(formatter.parse("not a date"), None);
    }

    #[test]
    fn params_builders() {
        let params = Params::positional([1_i64, 2, 3]);
        assert_eq!(params.len(), 3);
        let named = Params::named([("name", "alice")]);
        assert!(matches!(named, Params::Named(ref p) if p[0].0 == "name"));
        assert!(Params::from(()).is_empty());
    }

    #[test]
    fn values_serialize_untagged() {
        let json = serde_json::to_string(&vec![
            Value::Null,
            Value::Integer(1),
            Value::Text("a".into()),
        ])
        .unwrap();
        assert_eq!(json, r#"[null,1,"a"]"#);
    }
}
