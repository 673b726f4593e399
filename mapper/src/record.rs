//! Target records that mapped fields are written into.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

/// Attribute recording the person fields carried by an activity.
pub const CDP_FIELDS_ATTRIBUTE: &str = "obj:cm:cdp-fields";

/// A record with a flat map of named fields.
pub trait Mappable: Send + Sync {
    fn fields(&self) -> &IndexMap<String, Value>;

    fn set_field(&mut self, id: &str, value: Value);

    fn delete_field(&mut self, id: &str) -> Option<Value>;

    fn get_field(&self, id: &str) -> Option<&Value> {
        self.fields().get(id)
    }

    fn has_field(&self, id: &str) -> bool {
        self.fields().contains_key(id)
    }
}

/// A CRM contact.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Contact {
    pub fields: IndexMap<String, Value>,
}

impl Mappable for Contact {
    fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    fn set_field(&mut self, id: &str, value: Value) {
        self.fields.insert(id.to_string(), value);
    }

    fn delete_field(&mut self, id: &str) -> Option<Value> {
        self.fields.shift_remove(id)
    }
}

/// Decides which fields belong on the person rather than the activity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonFieldClassifier {
    merge_field: String,
}

impl PersonFieldClassifier {
    pub fn new(merge_field: impl Into<String>) -> Self {
        PersonFieldClassifier {
            merge_field: merge_field.into(),
        }
    }

    pub fn merge_field(&self) -> &str {
        &self.merge_field
    }

    pub fn is_person_field(&self, id: &str) -> bool {
        id.contains("::")
            || (!self.merge_field.is_empty() && id == self.merge_field)
            || id == "str:cm:address"
            || id == "str:cm:address-2"
    }
}

/// A CRM activity. Mapped data lands in `attributes` until
/// [`Activity::separate_person_fields`] moves the person fields out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Activity {
    pub activity_id: String,
    pub fields: IndexMap<String, Value>,
    pub attributes: IndexMap<String, Value>,
}

impl Activity {
    pub fn new(activity_id: impl Into<String>) -> Self {
        Activity {
            activity_id: activity_id.into(),
            ..Default::default()
        }
    }

    pub fn separate_person_fields(&mut self, classifier: &PersonFieldClassifier) {
        let person: Vec<String> = self
            .attributes
            .keys()
            .filter(|id| classifier.is_person_field(id))
            .cloned()
            .collect();
        for id in person {
            if let Some(value) = self.attributes.shift_remove(&id) {
                self.fields.insert(id, value);
            }
        }

        let mut flattened = Map::new();
        for (id, value) in &self.fields {
            match value {
                Value::Object(nested) => {
                    for (component, nested_value) in nested {
                        flattened.insert(format!("{id}.{component}"), nested_value.clone());
                    }
                }
                other => {
                    flattened.insert(id.clone(), other.clone());
                }
            }
        }
        self.attributes
            .insert(CDP_FIELDS_ATTRIBUTE.to_string(), Value::Object(flattened));
    }
}

impl Mappable for Activity {
    fn fields(&self) -> &IndexMap<String, Value> {
        &self.attributes
    }

    fn set_field(&mut self, id: &str, value: Value) {
        self.attributes.insert(id.to_string(), value);
    }

    fn delete_field(&mut self, id: &str) -> Option<Value> {
        self.attributes.shift_remove(id)
    }
}
