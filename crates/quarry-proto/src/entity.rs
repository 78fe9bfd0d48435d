//! Hydrated entities.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::row::Row;
use crate::value::Value;

/// A materialized record: ordered fields plus attribute-join fields.
///
/// Entities are only produced by hydration; callers read them.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id_field: String,
    id: Value,
    fields: Vec<(String, Value)>,
    attributes: Vec<(String, Value)>,
}

impl Entity {
    /// Create an entity with its identity and no fields.
    pub fn new(id_field: impl Into<String>, id: Value) -> Self {
        Self {
            id_field: id_field.into(),
            id,
            fields: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Builder-style field append.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Set a plain field, replacing an existing one.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        upsert(&mut self.fields, name.into(), value.into());
    }

    /// Set an attribute-join field, replacing an existing one.
    pub fn set_attribute(&mut self, code: impl Into<String>, value: impl Into<Value>) {
        upsert(&mut self.attributes, code.into(), value.into());
    }

    /// Name of the identity field.
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Identity value.
    pub fn id(&self) -> &Value {
        &self.id
    }

    /// Look up a field, then an attribute, by name.
    ///
    /// The identity field always resolves, even when it was not projected.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.field(name)
            .or_else(|| self.attribute(name))
            .or_else(|| (name == self.id_field).then_some(&self.id))
    }

    /// Look up a plain field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Look up an attribute-join field.
    pub fn attribute(&self, code: &str) -> Option<&Value> {
        self.attributes.iter().find(|(n, _)| n == code).map(|(_, v)| v)
    }

    /// Plain fields in projection order.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Attribute fields in join order.
    pub fn attributes(&self) -> &[(String, Value)] {
        &self.attributes
    }

    /// Flatten into a row: identity (if not a field), fields, then attributes.
    pub fn to_row(&self) -> Row {
        let mut row = Row::with_capacity(self.fields.len() + self.attributes.len() + 1);
        if self.field(&self.id_field).is_none() {
            row.set(self.id_field.clone(), self.id.clone());
        }
        for (name, value) in self.fields.iter().chain(&self.attributes) {
            row.set(name.clone(), value.clone());
        }
        row
    }
}

fn upsert(columns: &mut Vec<(String, Value)>, name: String, value: Value) {
    match columns.iter_mut().find(|(n, _)| *n == name) {
        Some(slot) => slot.1 = value,
        None => columns.push((name, value)),
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let row = self.to_row();
        let mut map = serializer.serialize_map(Some(row.len()))?;
        for (name, value) in row.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
