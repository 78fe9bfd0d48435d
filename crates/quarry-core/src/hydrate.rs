//! Hydration: raw rows to entities.
//!
//! Rows are grouped by base identity in first-appearance order, so the plan's
//! ordering carries over to entities. Attribute joins are merged into their
//! owning entity; a required attribute without a matching row fails the
//! whole batch.

use std::collections::HashMap;

use quarry_proto::{Entity, Row, Value};
use tracing::trace;

use crate::error::Error;
use crate::query::{AttributeSlot, ColumnRole, Projection, QueryPlan, ValueKey, IDENTITY_OUTPUT};

/// Turns a plan's raw rows into entities.
pub struct Hydrator<'p> {
    plan: &'p QueryPlan,
    slots: Vec<AttributeSlot<'p>>,
}

struct Group {
    entity: Entity,
    matched: Vec<bool>,
}

impl<'p> Hydrator<'p> {
    /// Create a hydrator for rows produced by `plan`.
    pub fn new(plan: &'p QueryPlan) -> Self {
        Self {
            plan,
            slots: plan.attribute_slots(),
        }
    }

    /// Group rows into entities.
    pub fn hydrate(&self, rows: Vec<Row>) -> Result<Vec<Entity>, Error> {
        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<ValueKey, usize> = HashMap::new();

        for row in &rows {
            let id = row
                .get(IDENTITY_OUTPUT)
                .filter(|v| !v.is_null())
                .ok_or_else(|| Error::MissingIdentity {
                    table: self.plan.from.table.clone(),
                    column: self.plan.identity.column.clone(),
                })?;

            let key = ValueKey::from_value(id);
            let position = match index.get(&key) {
                Some(&position) => {
                    self.merge_fields(&mut groups[position].entity, row);
                    position
                }
                None => {
                    groups.push(Group {
                        entity: self.new_entity(id.clone(), row),
                        matched: vec![false; self.slots.len()],
                    });
                    index.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };

            let group = &mut groups[position];
            for (slot, matched) in self.slots.iter().zip(group.matched.iter_mut()) {
                if !row.get(slot.marker_output).map(Value::is_null).unwrap_or(true) {
                    *matched = true;
                }
                if let Some(value) = row.get(slot.value_output).filter(|v| !v.is_null()) {
                    if group.entity.attribute(slot.code).map(Value::is_null).unwrap_or(true) {
                        group.entity.set_attribute(slot.code, value.clone());
                    }
                }
            }
        }

        let mut entities = Vec::with_capacity(groups.len());
        for group in groups {
            for (slot, matched) in self.slots.iter().zip(&group.matched) {
                if slot.required && !matched {
                    return Err(Error::IncompleteHydration {
                        identity: group.entity.id().clone(),
                        attribute: slot.code.to_string(),
                    });
                }
            }
            entities.push(group.entity);
        }

        trace!(rows = rows.len(), entities = entities.len(), "hydrated rows");
        Ok(entities)
    }

    fn new_entity(&self, id: Value, row: &Row) -> Entity {
        let mut entity = Entity::new(self.plan.identity.column.clone(), id);
        for (name, value) in self.base_fields(row) {
            entity.set_field(name, value);
        }
        // Reserve attribute slots so they keep join order.
        for slot in &self.slots {
            entity.set_attribute(slot.code, Value::Null);
        }
        entity
    }

    /// Fill fields that are still NULL from a later row of the same entity.
    fn merge_fields(&self, entity: &mut Entity, row: &Row) {
        for (name, value) in self.base_fields(row) {
            if value.is_null() {
                continue;
            }
            if entity.field(&name).map(Value::is_null).unwrap_or(true) {
                entity.set_field(name, value);
            }
        }
    }

    /// Visible non-attribute columns of a row, in projection order.
    fn base_fields(&self, row: &Row) -> Vec<(String, Value)> {
        let mut fields = Vec::new();
        for item in &self.plan.projection {
            match item {
                Projection::AllColumns { .. } => {
                    for (name, value) in row.iter() {
                        if !self.plan.column_outputs().any(|output| output == name) {
                            fields.push((name.to_string(), value.clone()));
                        }
                    }
                }
                Projection::Column {
                    output,
                    role: ColumnRole::Field,
                    ..
                } => {
                    let value = row.get(output).cloned().unwrap_or(Value::Null);
                    fields.push((output.clone(), value));
                }
                Projection::Column { .. } => {}
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{CollectionQuery, FieldSelection, QueryPlanBuilder};
    use quarry_proto::JoinSpec;

    fn attribute_plan(required: bool) -> QueryPlan {
        let mut query = CollectionQuery::new("product", "id");
        let color = JoinSpec::attribute("color", "attribute_value", 93);
        query.joins.push(if required { color.required() } else { color });
        query.joins.push(JoinSpec::attribute("size", "attribute_value", 94));
        QueryPlanBuilder::new().build(&query).unwrap()
    }

    fn raw(id: i64, name: &str, color: Option<&str>, size: Option<&str>) -> Row {
        Row::new()
            .with("__identity", id)
            .with("id", id)
            .with("name", name)
            .with("color", color)
            .with("__match_at_color", color.map(|_| id))
            .with("size", size)
            .with("__match_at_size", size.map(|_| id))
    }

    #[test]
    fn test_merges_attributes_in_join_order() {
        let plan = attribute_plan(false);
        let rows = vec![
            raw(1, "A", Some("red"), Some("L")),
            raw(2, "B", None, None),
        ];

        let entities = Hydrator::new(&plan).hydrate(rows).unwrap();
        assert_eq!(entities.len(), 2);

        let first = &entities[0];
        assert_eq!(first.id(), &Value::Int64(1));
        assert_eq!(
            first.fields(),
            &[
                ("id".to_string(), Value::Int64(1)),
                ("name".to_string(), Value::from("A"))
            ]
        );
        assert_eq!(
            first.attributes(),
            &[
                ("color".to_string(), Value::from("red")),
                ("size".to_string(), Value::from("L"))
            ]
        );

        let second = &entities[1];
        assert_eq!(second.attribute("color"), Some(&Value::Null));
        assert_eq!(second.get("__identity"), None);
        assert_eq!(second.get("__match_at_color"), None);
    }

    #[test]
    fn test_duplicate_rows_collapse() {
        let plan = attribute_plan(false);
        let rows = vec![
            raw(1, "A", None, Some("L")),
            raw(1, "A", Some("red"), None),
            raw(3, "C", None, None),
        ];

        let entities = Hydrator::new(&plan).hydrate(rows).unwrap();
        let ids: Vec<_> = entities.iter().map(|e| e.id().clone()).collect();
        assert_eq!(ids, vec![Value::Int64(1), Value::Int64(3)]);
        assert_eq!(entities[0].attribute("color"), Some(&Value::from("red")));
        assert_eq!(entities[0].attribute("size"), Some(&Value::from("L")));
    }

    #[test]
    fn test_required_attribute_missing() {
        let plan = attribute_plan(true);
        let rows = vec![raw(1, "A", Some("red"), None), raw(2, "B", None, Some("S"))];

        let err = Hydrator::new(&plan).hydrate(rows).unwrap_err();
        match err {
            Error::IncompleteHydration {
                identity,
                attribute,
            } => {
                assert_eq!(identity, Value::Int64(2));
                assert_eq!(attribute, "color");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_identity() {
        let plan = attribute_plan(false);
        let rows = vec![Row::new().with("id", 1i64)];

        let err = Hydrator::new(&plan).hydrate(rows).unwrap_err();
        assert!(matches!(err, Error::MissingIdentity { column, .. } if column == "id"));
    }

    #[test]
    fn test_selected_fields_only() {
        let mut query = CollectionQuery::new("product", "id");
        query.fields = FieldSelection::only(["name"]);
        let plan = QueryPlanBuilder::new().build(&query).unwrap();

        let rows = vec![Row::new().with("__identity", 5i64).with("name", "E")];
        let entities = Hydrator::new(&plan).hydrate(rows).unwrap();
        assert_eq!(entities[0].fields(), &[("name".to_string(), Value::from("E"))]);
        assert_eq!(entities[0].get("id"), Some(&Value::Int64(5)));
    }

    #[test]
    fn test_empty_rows() {
        let plan = attribute_plan(true);
        assert!(Hydrator::new(&plan).hydrate(Vec::new()).unwrap().is_empty());
    }
}
