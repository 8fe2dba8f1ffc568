use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::Result;
use crate::error::Error;

/// Field holding the event time in an incoming JSON object.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// One log entry, as handed over by the ingestion side.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    timestamp: DateTime<Utc>,
    attributes: Map<String, Value>,
    /// Text the ingestion codec already produced for this record, if any.
    rendered_message: Option<String>,
}

impl Record {
    pub fn new(timestamp: DateTime<Utc>, attributes: Map<String, Value>) -> Self {
        Self {
            timestamp,
            attributes,
            rendered_message: None,
        }
    }

    pub fn with_rendered_message(mut self, message: impl Into<String>) -> Self {
        self.rendered_message = Some(message.into());
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Millisecond precision, as sent on the wire.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn rendered_message(&self) -> Option<&str> {
        self.rendered_message.as_deref()
    }

    /// Looks up a (possibly nested) field. `["a", "b"]` reads `attributes.a.b`.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.attributes.get(first.as_ref())?, |value, segment| {
                value.as_object()?.get(segment.as_ref())
            })
    }

    /// The attributes as compact JSON with object keys sorted at every level.
    pub fn canonical_json(&self) -> String {
        let mut out = String::new();
        write_canonical_object(&self.attributes, &mut out);
        out
    }
}

/// Builds a record from a decoded JSON object. The event time is taken from
/// [`TIMESTAMP_FIELD`] (RFC 3339 text or epoch milliseconds) and defaults to now.
impl TryFrom<Value> for Record {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let Value::Object(attributes) = value else {
            return Err(Error::Record(format!(
                "expected a JSON object, got {}",
                kind_of(&value)
            )));
        };

        let timestamp = match attributes.get(TIMESTAMP_FIELD) {
            None => Utc::now(),
            Some(Value::String(text)) => DateTime::parse_from_rfc3339(text)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| Error::Record(format!("invalid {TIMESTAMP_FIELD} {text:?}: {e}")))?,
            Some(Value::Number(millis)) => millis
                .as_i64()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
                .ok_or_else(|| Error::Record(format!("invalid {TIMESTAMP_FIELD} {millis}")))?,
            Some(other) => {
                return Err(Error::Record(format!(
                    "{TIMESTAMP_FIELD} must be a string or a number, got {}",
                    kind_of(other)
                )));
            }
        };

        Ok(Record::new(timestamp, attributes))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub(crate) fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_canonical_object(map: &Map<String, Value>, out: &mut String) {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(value, out);
    }
    out.push('}');
}
