//! Partial page updates written back to the donation platform.

use serde_json::{Map, Value};
use std::fmt;

/// A set of dotted-path assignments under the page's `data` object.
///
/// Renders as `{"data":{...}}`, or as the empty string when nothing was set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    data: Map<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `path` (e.g. `public.challenge_total`) to `value`, creating
    /// intermediate objects and replacing any non-object in the way.
    pub fn set(&mut self, path: &str, value: Value) {
        let mut segments = path.split('.').peekable();
        let mut current = &mut self.data;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                current.insert(segment.to_string(), value);
                return;
            }
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(next) = entry else {
                return;
            };
            current = next;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The full document, `None` when nothing was set.
    pub fn to_value(&self) -> Option<Value> {
        if self.data.is_empty() {
            return None;
        }
        let mut root = Map::new();
        root.insert("data".to_string(), Value::Object(self.data.clone()));
        Some(Value::Object(root))
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_value() {
            Some(value) => write!(f, "{value}"),
            None => Ok(()),
        }
    }
}

/// A patch addressed to one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagePatch {
    pub page_id: String,
    pub patch: Patch,
}
