//! Field mapping tables.
//!
//! Tables are authored with bare field names grouped by collection:
//!
//! ```yaml
//! strings:
//!   first-name: user.firstName
//!   source: "`p2p`"
//! integers:
//!   walk-total: exerciseTotal|@distance:RAISELY_KM
//! phones:
//!   mobile:
//!     c: user.phoneNumber|@phone:61|c
//!     n: user.phoneNumber|@phone:61|n
//! ```
//!
//! Expansion turns every name into a full [`FieldId`]. A path wrapped in
//! backticks is a constant rather than a lookup.

use crate::errors::MappingError;
use crate::field_id::{FieldId, FieldKind, FieldScope};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Number, Value};
use std::collections::HashMap;
use upstream::path;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawFieldMappings {
    pub strings: IndexMap<String, String>,
    pub texts: IndexMap<String, String>,
    pub decimals: IndexMap<String, String>,
    pub booleans: IndexMap<String, String>,
    pub timestamps: IndexMap<String, String>,
    pub phones: IndexMap<String, IndexMap<String, String>>,
    pub geos: IndexMap<String, IndexMap<String, String>>,
    pub integers: IndexMap<String, String>,
}

impl RawFieldMappings {
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
            && self.texts.is_empty()
            && self.decimals.is_empty()
            && self.booleans.is_empty()
            && self.timestamps.is_empty()
            && self.phones.is_empty()
            && self.geos.is_empty()
            && self.integers.is_empty()
    }
}

/// The collection a field was authored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKind {
    Strings,
    Texts,
    Decimals,
    Booleans,
    Timestamps,
    Phones,
    Geos,
    Integers,
}

impl MappingKind {
    pub const fn collection(&self) -> &'static str {
        match self {
            MappingKind::Strings => "strings",
            MappingKind::Texts => "texts",
            MappingKind::Decimals => "decimals",
            MappingKind::Booleans => "booleans",
            MappingKind::Timestamps => "timestamps",
            MappingKind::Phones => "phones",
            MappingKind::Geos => "geos",
            MappingKind::Integers => "integers",
        }
    }

    pub const fn field_kind(&self) -> FieldKind {
        match self {
            MappingKind::Strings => FieldKind::Str,
            MappingKind::Texts => FieldKind::Txt,
            MappingKind::Decimals | MappingKind::Integers => FieldKind::Int,
            MappingKind::Booleans => FieldKind::Bol,
            MappingKind::Timestamps => FieldKind::Tme,
            MappingKind::Phones => FieldKind::Phn,
            MappingKind::Geos => FieldKind::Geo,
        }
    }

    /// The field type name used by the CRM's field catalogue.
    pub const fn type_name(&self) -> &'static str {
        match self {
            MappingKind::Strings => "Text",
            MappingKind::Texts => "Long text",
            MappingKind::Decimals => "Decimal number",
            MappingKind::Booleans => "Boolean",
            MappingKind::Timestamps => "Time and date",
            MappingKind::Phones => "Phone number",
            MappingKind::Geos => "Geo",
            MappingKind::Integers => "Number",
        }
    }

    fn constant(&self, literal: &str) -> Option<Value> {
        match self {
            MappingKind::Decimals | MappingKind::Integers => {
                literal.trim().parse::<i64>().ok().map(|n| Value::Number(Number::from(n)))
            }
            MappingKind::Booleans => match literal {
                "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(Value::Bool(true)),
                "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => Some(Value::String(literal.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourcePath {
    Constant(Value),
    Path(String),
}

fn constant_literal(raw: &str) -> Option<&str> {
    raw.strip_prefix('`').and_then(|s| s.strip_suffix('`'))
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldSource {
    Scalar(SourcePath),
    /// Component name to source path, e.g. `c`/`n` for phones.
    Nested(IndexMap<String, SourcePath>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub id: FieldId,
    pub kind: MappingKind,
    pub source: FieldSource,
}

/// Expanded mappings for one entity, in authoring order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMappings {
    fields: IndexMap<FieldId, FieldMapping>,
    names: HashMap<String, MappingKind>,
}

impl FieldMappings {
    pub fn expand(raw: &RawFieldMappings, scope: FieldScope) -> Result<Self, MappingError> {
        let mut mappings = FieldMappings::default();

        let scalars = [
            (MappingKind::Strings, &raw.strings),
            (MappingKind::Texts, &raw.texts),
            (MappingKind::Decimals, &raw.decimals),
            (MappingKind::Booleans, &raw.booleans),
            (MappingKind::Timestamps, &raw.timestamps),
        ];
        for (kind, collection) in scalars {
            mappings.expand_scalars(kind, collection, scope)?;
        }
        for (kind, collection) in [(MappingKind::Phones, &raw.phones), (MappingKind::Geos, &raw.geos)] {
            for (name, components) in collection {
                let id = field_id(kind, scope, name)?;
                let components = components
                    .iter()
                    .map(|(component, raw_path)| {
                        Ok((component.clone(), source_path(&id, MappingKind::Strings, raw_path)?))
                    })
                    .collect::<Result<IndexMap<_, _>, MappingError>>()?;
                mappings.insert(FieldMapping {
                    id,
                    kind,
                    source: FieldSource::Nested(components),
                })?;
            }
        }
        mappings.expand_scalars(MappingKind::Integers, &raw.integers, scope)?;

        Ok(mappings)
    }

    fn expand_scalars(
        &mut self,
        kind: MappingKind,
        collection: &IndexMap<String, String>,
        scope: FieldScope,
    ) -> Result<(), MappingError> {
        for (name, raw_path) in collection {
            let id = field_id(kind, scope, name)?;
            let source = source_path(&id, kind, raw_path)?;
            self.insert(FieldMapping {
                id,
                kind,
                source: FieldSource::Scalar(source),
            })?;
        }
        Ok(())
    }

    fn insert(&mut self, mapping: FieldMapping) -> Result<(), MappingError> {
        let name = mapping.id.name().to_string();
        if self.names.insert(name.clone(), mapping.kind).is_some() {
            return Err(MappingError::DuplicateField(name));
        }
        self.fields.insert(mapping.id.clone(), mapping);
        Ok(())
    }

    /// Merges another table for the same entity. A field name may only be
    /// mapped once across both.
    pub fn extend(&mut self, other: FieldMappings) -> Result<(), MappingError> {
        for (_, mapping) in other.fields {
            self.insert(mapping)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldMapping> {
        self.fields.values()
    }

    pub fn all_keys(&self) -> impl Iterator<Item = &FieldId> {
        self.fields.keys()
    }

    pub fn get(&self, id: &FieldId) -> Option<&FieldMapping> {
        self.fields.get(id)
    }

    /// Looks a field up by its encoded identifier.
    pub fn get_encoded(&self, id: &str) -> Option<&FieldMapping> {
        id.parse::<FieldId>().ok().and_then(|id| self.fields.get(&id))
    }

    pub fn type_name_of(&self, id: &FieldId) -> Option<&'static str> {
        self.fields.get(id).map(|m| m.kind.type_name())
    }

    /// `"Walk Total (Number)"`, as listed in missing-field reports.
    pub fn describe(&self, id: &FieldId) -> String {
        format!(
            "{} ({})",
            id.label(),
            self.type_name_of(id).unwrap_or("Unknown")
        )
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn field_id(kind: MappingKind, scope: FieldScope, name: &str) -> Result<FieldId, MappingError> {
    FieldId::new(kind.field_kind(), scope, name).map_err(|source| MappingError::InvalidField {
        collection: kind.collection(),
        name: name.to_string(),
        source,
    })
}

fn source_path(id: &FieldId, kind: MappingKind, raw: &str) -> Result<SourcePath, MappingError> {
    if let Some(literal) = constant_literal(raw) {
        return kind
            .constant(literal)
            .map(SourcePath::Constant)
            .ok_or_else(|| MappingError::InvalidConstant {
                field: id.to_string(),
                value: literal.to_string(),
            });
    }
    path::validate(raw).map_err(|source| MappingError::InvalidPath {
        field: id.to_string(),
        source,
    })?;
    Ok(SourcePath::Path(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(yaml: &str) -> RawFieldMappings {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_expand_custom() {
        let mappings = FieldMappings::expand(
            &raw(r#"
strings:
  first-name: user.firstName
  source: "`p2p`"
decimals:
  raised: sum|@currency:RAISELY_2DP
phones:
  mobile:
    c: user.phone|@phone:61|c
    n: user.phone|@phone:61|n
integers:
  walk-total: exerciseTotal
"#),
            FieldScope::Custom,
        )
        .unwrap();

        let keys: Vec<String> = mappings.all_keys().map(|k| k.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "str:cm:first-name",
                "str:cm:source",
                "int:cm:raised",
                "phn:cm:mobile",
                "int:cm:walk-total"
            ]
        );

        let source = mappings.get_encoded("str:cm:source").unwrap();
        assert_eq!(
            source.source,
            FieldSource::Scalar(SourcePath::Constant(json!("p2p")))
        );

        let raised = "int:cm:raised".parse().unwrap();
        assert_eq!(mappings.type_name_of(&raised), Some("Decimal number"));
        let walk = "int:cm:walk-total".parse().unwrap();
        assert_eq!(mappings.describe(&walk), "WALK Total (Number)");
    }

    #[test]
    fn test_expand_builtin() {
        let mappings = FieldMappings::expand(
            &raw("strings:\n  email: user.email\nbooleans:\n  opted-in: \"`true`\"\n"),
            FieldScope::Builtin,
        )
        .unwrap();
        let opted_in = mappings.get_encoded("bol::opted-in").unwrap();
        assert_eq!(
            opted_in.source,
            FieldSource::Scalar(SourcePath::Constant(json!(true)))
        );
        assert!(mappings.get_encoded("str::email").is_some());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = FieldMappings::expand(
            &raw("strings:\n  total: a\nintegers:\n  total: b\n"),
            FieldScope::Custom,
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::DuplicateField(name) if name == "total"));

        let mut builtin =
            FieldMappings::expand(&raw("strings:\n  email: user.email\n"), FieldScope::Builtin)
                .unwrap();
        let custom =
            FieldMappings::expand(&raw("strings:\n  email: user.email\n"), FieldScope::Custom)
                .unwrap();
        assert!(matches!(
            builtin.extend(custom),
            Err(MappingError::DuplicateField(_))
        ));
    }

    #[test]
    fn test_invalid_entries() {
        assert!(matches!(
            FieldMappings::expand(&raw("strings:\n  First: a\n"), FieldScope::Custom),
            Err(MappingError::InvalidField { collection: "strings", .. })
        ));
        assert!(matches!(
            FieldMappings::expand(&raw("integers:\n  total: \"`ten`\"\n"), FieldScope::Custom),
            Err(MappingError::InvalidConstant { .. })
        ));
        assert!(matches!(
            FieldMappings::expand(&raw("strings:\n  name: a|@shout\n"), FieldScope::Custom),
            Err(MappingError::InvalidPath { .. })
        ));
    }
}
