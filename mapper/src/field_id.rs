//! Target field identifiers of the form `kind:scope:name`.
//!
//! Builtin fields have an empty scope (`str::email`), custom fields use the
//! `cm` scope (`int:cm:walk-total`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldIdError {
    #[error("unknown field kind: {0:?}")]
    UnknownKind(String),

    #[error("unknown field scope: {0:?}")]
    UnknownScope(String),

    #[error("invalid field name: {0:?}")]
    InvalidName(String),

    #[error("field identifier must have three segments: {0:?}")]
    SegmentCount(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldKind {
    Str,
    Txt,
    Int,
    Bol,
    Tme,
    Phn,
    Geo,
}

impl FieldKind {
    pub const fn tag(&self) -> &'static str {
        match self {
            FieldKind::Str => "str",
            FieldKind::Txt => "txt",
            FieldKind::Int => "int",
            FieldKind::Bol => "bol",
            FieldKind::Tme => "tme",
            FieldKind::Phn => "phn",
            FieldKind::Geo => "geo",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, FieldIdError> {
        match tag {
            "str" => Ok(FieldKind::Str),
            "txt" => Ok(FieldKind::Txt),
            "int" => Ok(FieldKind::Int),
            "bol" => Ok(FieldKind::Bol),
            "tme" => Ok(FieldKind::Tme),
            "phn" => Ok(FieldKind::Phn),
            "geo" => Ok(FieldKind::Geo),
            other => Err(FieldIdError::UnknownKind(other.to_string())),
        }
    }

    /// Phone and geo fields hold a small object of components.
    pub const fn is_nested(&self) -> bool {
        matches!(self, FieldKind::Phn | FieldKind::Geo)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldScope {
    Builtin,
    Custom,
}

impl FieldScope {
    pub const fn tag(&self) -> &'static str {
        match self {
            FieldScope::Builtin => "",
            FieldScope::Custom => "cm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId {
    kind: FieldKind,
    scope: FieldScope,
    name: String,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

impl FieldId {
    pub fn new(kind: FieldKind, scope: FieldScope, name: &str) -> Result<Self, FieldIdError> {
        if !valid_name(name) {
            return Err(FieldIdError::InvalidName(name.to_string()));
        }
        Ok(FieldId {
            kind,
            scope,
            name: name.to_string(),
        })
    }

    pub fn builtin(kind: FieldKind, name: &str) -> Result<Self, FieldIdError> {
        Self::new(kind, FieldScope::Builtin, name)
    }

    pub fn custom(kind: FieldKind, name: &str) -> Result<Self, FieldIdError> {
        Self::new(kind, FieldScope::Custom, name)
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn scope(&self) -> FieldScope {
        self.scope
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_builtin(&self) -> bool {
        self.scope == FieldScope::Builtin
    }

    /// Human label: the first hyphen segment upper-cased, the rest
    /// capitalised. `p2p-walk-total` becomes `P2P Walk Total`.
    pub fn label(&self) -> String {
        let mut segments = self.name.split('-');
        let mut label = segments.next().unwrap_or_default().to_uppercase();
        for segment in segments {
            label.push(' ');
            let mut chars = segment.chars();
            if let Some(first) = chars.next() {
                label.extend(first.to_uppercase());
                label.push_str(chars.as_str());
            }
        }
        label
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind.tag(), self.scope.tag(), self.name)
    }
}

impl FromStr for FieldId {
    type Err = FieldIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [kind, scope, name] = parts.as_slice() else {
            return Err(FieldIdError::SegmentCount(s.to_string()));
        };
        let kind = FieldKind::from_tag(kind)?;
        let scope = match *scope {
            "" => FieldScope::Builtin,
            "cm" => FieldScope::Custom,
            other => return Err(FieldIdError::UnknownScope(other.to_string())),
        };
        FieldId::new(kind, scope, name)
    }
}

impl Serialize for FieldId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
