//! Dotted-path lookups over JSON documents.
//!
//! A path expression is a dotted path (`user.address.city`, `items.0.amount`,
//! `items.#`) optionally followed by a pipe-delimited chain. Each chain
//! segment is either a modifier (`@name` or `@name:arg`) applied to the
//! current value, or another dotted path into the current value:
//!
//! ```text
//! private.phone|@phone:61|n
//! ```
//!
//! A literal `.` or `|` inside a key is escaped with a backslash.

use crate::source::{as_float, as_int, as_string};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use std::borrow::Cow;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PathError {
    #[error("unknown path modifier: @{0}")]
    UnknownModifier(String),

    #[error("modifier @{name} requires an argument")]
    MissingArgument { name: String },

    #[error("invalid argument {arg:?} for modifier @{name}")]
    InvalidArgument { name: String, arg: String },

    #[error("empty segment in path expression {0:?}")]
    EmptySegment(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Modifier {
    Currency(String),
    Distance(String),
    Contains(String),
    Gte(f64),
    Percent,
    Now,
    PathJoinUrl(String),
    Phone(String),
    Lower,
    Upper,
}

impl Modifier {
    fn parse(raw: &str) -> Result<Self, PathError> {
        let (name, arg) = match raw.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (raw, None),
        };
        let required = |arg: Option<&str>| {
            arg.map(str::to_string).ok_or_else(|| PathError::MissingArgument {
                name: name.to_string(),
            })
        };

        match name {
            "currency" => Ok(Modifier::Currency(required(arg)?)),
            "distance" => Ok(Modifier::Distance(required(arg)?)),
            "contains" => Ok(Modifier::Contains(arg.unwrap_or_default().to_string())),
            "gte" => {
                let raw = required(arg)?;
                raw.parse::<f64>()
                    .map(Modifier::Gte)
                    .map_err(|_| PathError::InvalidArgument {
                        name: name.to_string(),
                        arg: raw,
                    })
            }
            "percent" => Ok(Modifier::Percent),
            "now" => Ok(Modifier::Now),
            "pathJoinURL" => Ok(Modifier::PathJoinUrl(required(arg)?)),
            "phone" => Ok(Modifier::Phone(arg.unwrap_or_default().to_string())),
            "lower" => Ok(Modifier::Lower),
            "upper" => Ok(Modifier::Upper),
            other => Err(PathError::UnknownModifier(other.to_string())),
        }
    }

    fn apply(&self, input: Option<Value>) -> Option<Value> {
        if let Modifier::Now = self {
            return Some(now());
        }
        let value = input.filter(|v| !v.is_null())?;

        match self {
            // Amounts arrive in the smallest currency unit. The target expects the
            // larger unit scaled by 1000, so the net conversion is x10.
            Modifier::Currency(unit) if unit == "RAISELY_2DP" => {
                Some(Value::Number((as_int(&value) * 10).into()))
            }
            // Metres already equal kilometres scaled by 1000.
            Modifier::Distance(unit) if unit == "RAISELY_KM" => {
                Some(Value::Number(as_int(&value).into()))
            }
            Modifier::Currency(_) | Modifier::Distance(_) => Some(value),
            Modifier::Contains(needle) => {
                let found = match &value {
                    Value::Array(items) => items
                        .iter()
                        .any(|item| as_string(item).contains(needle.as_str())),
                    other => as_string(other).contains(needle.as_str()),
                };
                Some(Value::Bool(found))
            }
            Modifier::Gte(threshold) => Some(Value::Bool(as_float(&value) >= *threshold)),
            Modifier::Percent => Some(Value::Number(
                ((as_float(&value) * 1000.0) as i64).into(),
            )),
            Modifier::PathJoinUrl(base) => {
                let tail = as_string(&value);
                Some(Value::String(format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    tail.trim_start_matches('/')
                )))
            }
            Modifier::Phone(country_code) => Some(split_phone(&as_string(&value), country_code)),
            Modifier::Lower => Some(Value::String(as_string(&value).to_lowercase())),
            Modifier::Upper => Some(Value::String(as_string(&value).to_uppercase())),
            Modifier::Now => Some(now()),
        }
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Splits a phone number into `{"c": country code, "n": national number}`.
fn split_phone(raw: &str, country_code: &str) -> Value {
    let number: String = raw
        .trim_matches('"')
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '(' && *c != ')')
        .collect();

    let prefix = format!("+{country_code}");
    let (code, national) = if !country_code.is_empty() && number.starts_with(&prefix) {
        (country_code.to_string(), number[prefix.len()..].to_string())
    } else if let Some(international) = number.strip_prefix('+') {
        // Foreign number; the country code length cannot be known without a
        // numbering plan, so the whole number is kept.
        (String::new(), international.to_string())
    } else {
        (
            country_code.to_string(),
            number.trim_start_matches('0').to_string(),
        )
    };

    let mut object = Map::new();
    object.insert("c".into(), Value::String(code));
    object.insert("n".into(), Value::String(national));
    Value::Object(object)
}

#[derive(Debug, PartialEq)]
enum Segment {
    Path(Vec<String>),
    Modifier(Modifier),
}

/// Splits `input` on `delimiter`, honouring backslash escapes. Escape
/// sequences for the delimiter are kept so nested splits still see them.
fn split_unescaped(input: &str, delimiter: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                current.push(c);
                current.push(next);
            }
            continue;
        }
        if c == delimiter {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn unescape(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse(expr: &str) -> Result<Vec<Segment>, PathError> {
    let mut segments = Vec::new();

    for (i, raw) in split_unescaped(expr, '|').into_iter().enumerate() {
        if let Some(modifier) = raw.strip_prefix('@') {
            segments.push(Segment::Modifier(Modifier::parse(modifier)?));
            continue;
        }
        if raw.is_empty() {
            // An empty leading path addresses the whole document.
            if i == 0 {
                segments.push(Segment::Path(Vec::new()));
                continue;
            }
            return Err(PathError::EmptySegment(expr.to_string()));
        }
        let keys = split_unescaped(&raw, '.')
            .iter()
            .map(|k| unescape(k))
            .collect();
        segments.push(Segment::Path(keys));
    }

    Ok(segments)
}

fn walk<'a>(value: &'a Value, keys: &[String]) -> Option<Cow<'a, Value>> {
    let mut current = value;
    for (i, key) in keys.iter().enumerate() {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) if key == "#" && i == keys.len() - 1 => {
                return Some(Cow::Owned(Value::Number(Number::from(items.len()))));
            }
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(Cow::Borrowed(current))
}

/// Checks that a path expression parses and only uses known modifiers.
pub fn validate(expr: &str) -> Result<(), PathError> {
    parse(expr).map(|_| ())
}

/// Resolves a path expression against `root`. Returns `None` when the path is
/// missing. Invalid expressions resolve to `None` and are logged.
pub fn resolve(root: &Value, expr: &str) -> Option<Value> {
    let segments = match parse(expr) {
        Ok(segments) => segments,
        Err(e) => {
            tracing::warn!(path = expr, error = %e, "Invalid path expression");
            return None;
        }
    };

    // Stays borrowed from `root` until a modifier produces a new value.
    let mut current = Some(Cow::Borrowed(root));
    for segment in &segments {
        current = match (segment, current) {
            (Segment::Path(keys), Some(Cow::Borrowed(value))) => walk(value, keys),
            (Segment::Path(keys), Some(Cow::Owned(value))) => {
                walk(&value, keys).map(|leaf| Cow::Owned(leaf.into_owned()))
            }
            (Segment::Path(_), None) => None,
            (Segment::Modifier(modifier), current) => {
                modifier.apply(current.map(Cow::into_owned)).map(Cow::Owned)
            }
        };
    }
    current.map(Cow::into_owned)
}
