//! Writes mapped source values into a record.
//!
//! Every mapped field is written. A path that does not resolve sets the field
//! to `null` so the CRM clears it, and a phone or geo whose components are all
//! empty is `null` rather than an object of empty strings.

use crate::mappings::{FieldMappings, FieldSource, MappingKind, SourcePath};
use crate::record::Mappable;
use serde_json::{Map, Number, Value};
use upstream::SourceDocument;

pub fn map_fields(mappings: &FieldMappings, source: &SourceDocument, record: &mut dyn Mappable) {
    for mapping in mappings.iter() {
        let value = match &mapping.source {
            FieldSource::Scalar(path) => scalar(mapping.kind, path, source),
            FieldSource::Nested(components) => nested(components, source),
        };
        record.set_field(&mapping.id.to_string(), value);
    }
}

/// Nulls every mapped field.
pub fn clear_fields(mappings: &FieldMappings, record: &mut dyn Mappable) {
    map_fields(mappings, &SourceDocument::empty(), record);
}

fn scalar(kind: MappingKind, path: &SourcePath, source: &SourceDocument) -> Value {
    let path = match path {
        SourcePath::Constant(value) => return value.clone(),
        SourcePath::Path(path) => path,
    };
    let value = match kind {
        MappingKind::Decimals | MappingKind::Integers => {
            source.int_at(path).map(|n| Value::Number(Number::from(n)))
        }
        MappingKind::Booleans => source.bool_at(path).map(Value::Bool),
        _ => source.string_at(path).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

fn nested(components: &indexmap::IndexMap<String, SourcePath>, source: &SourceDocument) -> Value {
    let mut object = Map::new();
    for (component, path) in components {
        let value = match path {
            SourcePath::Constant(value) => upstream::source::as_string(value),
            SourcePath::Path(path) => source.string_at(path).unwrap_or_default(),
        };
        object.insert(component.clone(), Value::String(value));
    }

    let all_empty = object
        .values()
        .all(|v| v.as_str().is_some_and(str::is_empty));
    if all_empty {
        Value::Null
    } else {
        Value::Object(object)
    }
}
