//! `%{field}` templates used for group, stream and message names.
//!
//! - `%{host}` is the top-level field `host`, `%{[k8s][pod]}` a nested one.
//! - `%{+yyyy.MM.dd}` formats the record timestamp (UTC) with a Joda-style pattern and
//!   `%{+%s}` is the timestamp in epoch seconds.
//! - A reference to a field the record does not have is kept as written.
use std::fmt;

use chrono::format::{Item, StrftimeItems};
use serde_json::Value;

use crate::Result;
use crate::error::Error;
use crate::record::{Record, write_canonical};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field { path: Vec<String>, raw: String },
    /// A chrono strftime pattern.
    Timestamp(String),
    EpochSeconds,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("%{") {
            let (literal, tail) = rest.split_at(start);
            push_literal(&mut segments, literal);

            let body_and_rest = tail.get(2..).unwrap_or_default();
            let end = body_and_rest.find('}').ok_or_else(|| {
                Error::Template(format!("unterminated reference in {source:?}"))
            })?;
            let (body, after) = body_and_rest.split_at(end);
            segments.push(parse_reference(source, body)?);
            rest = after.get(1..).unwrap_or_default();
        }
        push_literal(&mut segments, rest);

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// True when the template has no references and renders the same for every record.
    pub fn is_constant(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    pub fn render(&self, record: &Record) -> String {
        if self.is_constant() {
            return self.source.clone();
        }

        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { path, raw } => match record.lookup(path.as_slice()) {
                    None | Some(Value::Null) => out.push_str(raw),
                    Some(value) => render_value(value, &mut out),
                },
                Segment::Timestamp(pattern) => {
                    out.push_str(&record.timestamp().format(pattern).to_string())
                }
                Segment::EpochSeconds => out.push_str(&record.timestamp().timestamp().to_string()),
            }
        }
        out
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Literal(previous)) = segments.last_mut() {
        previous.push_str(text);
    } else {
        segments.push(Segment::Literal(text.to_string()));
    }
}

fn parse_reference(source: &str, body: &str) -> Result<Segment> {
    if body.trim().is_empty() {
        return Err(Error::Template(format!("empty reference in {source:?}")));
    }

    if let Some(pattern) = body.strip_prefix('+') {
        if pattern == "%s" {
            return Ok(Segment::EpochSeconds);
        }
        let strftime = joda_to_strftime(pattern);
        if StrftimeItems::new(&strftime).any(|item| matches!(item, Item::Error)) {
            return Err(Error::Template(format!(
                "unsupported date pattern {pattern:?} in {source:?}"
            )));
        }
        return Ok(Segment::Timestamp(strftime));
    }

    let path: Vec<String> = if body.starts_with('[') {
        let inner = body
            .strip_prefix('[')
            .and_then(|b| b.strip_suffix(']'))
            .ok_or_else(|| Error::Template(format!("malformed field path %{{{body}}}")))?;
        inner.split("][").map(str::to_string).collect()
    } else {
        vec![body.to_string()]
    };

    if path.iter().any(|segment| segment.is_empty()) {
        return Err(Error::Template(format!("malformed field path %{{{body}}}")));
    }

    Ok(Segment::Field {
        path,
        raw: format!("%{{{body}}}"),
    })
}

/// Translates the common Joda-time tokens. Text in single quotes is literal and `''` is a
/// single quote; any other character is copied as is.
fn joda_to_strftime(pattern: &str) -> String {
    let mut out = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.next_if_eq(&'\'').is_some() {
                out.push('\'');
                continue;
            }
            while let Some(quoted) = chars.next() {
                if quoted == '\'' && chars.next_if_eq(&'\'').is_none() {
                    break;
                }
                push_literal_char(&mut out, quoted);
            }
            continue;
        }

        let mut run = 1;
        while chars.next_if_eq(&c).is_some() {
            run += 1;
        }
        let token = match (c, run) {
            ('y' | 'Y', 2) => Some("%y"),
            ('y' | 'Y', _) => Some("%Y"),
            ('M', 1 | 2) => Some("%m"),
            ('M', 3) => Some("%b"),
            ('M', _) => Some("%B"),
            ('d', _) => Some("%d"),
            ('H', _) => Some("%H"),
            ('m', _) => Some("%M"),
            ('s', _) => Some("%S"),
            ('S', _) => Some("%3f"),
            _ => None,
        };
        match token {
            Some(token) => out.push_str(token),
            None => (0..run).for_each(|_| push_literal_char(&mut out, c)),
        }
    }
    out
}

fn push_literal_char(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

fn render_value(value: &Value, out: &mut String) {
    match value {
        Value::String(text) => out.push_str(text),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render_value(item, out);
            }
        }
        Value::Object(_) => write_canonical(value, out),
        Value::Null => {}
        scalar => out.push_str(&scalar.to_string()),
    }
}
