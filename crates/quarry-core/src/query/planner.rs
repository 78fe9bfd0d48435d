//! Query planner turning collection configuration into executable plans.
//!
//! The planner assigns every field to a table alias, validates joins against
//! the catalog, appends the identity tie-breaker to the sort and derives the
//! pagination window. It never talks to a data source.

use quarry_proto::{split_qualified, ColumnRef, JoinCondition, JoinKind, JoinSpec, SortDirection, SortSpec};
use tracing::trace;

use crate::catalog::{Catalog, TableDef};
use crate::error::Error;

use super::plan::{
    match_marker, ColumnRole, JoinPredicate, PlannedAttribute, PlannedJoin, Projection, QueryPlan,
    TableRef, IDENTITY_OUTPUT,
};
use super::snapshot::{CollectionQuery, FieldSelection};

/// Builds a [`QueryPlan`] from a [`CollectionQuery`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryPlanBuilder<'a> {
    catalog: Option<&'a Catalog>,
}

impl<'a> QueryPlanBuilder<'a> {
    /// Create a builder that trusts every field name.
    pub fn new() -> Self {
        Self { catalog: None }
    }

    /// Validate fields against a catalog.
    pub fn with_catalog(mut self, catalog: &'a Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Build the plan for a query.
    pub fn build(&self, query: &CollectionQuery) -> Result<QueryPlan, Error> {
        let mut scope = Scope::new(query, self.catalog);
        scope.check_column(&query.base_alias, &query.id_field)?;
        let identity = ColumnRef::new(query.base_alias.clone(), query.id_field.clone());

        let mut joins = Vec::with_capacity(query.joins.len());
        for join in &query.joins {
            joins.push(scope.plan_join(join, &identity)?);
        }

        let predicate = match &query.filter {
            Some(filter) => {
                let mut qualify = |field: &str| scope.resolve(field).map(|c| c.qualified());
                Some(filter.map_fields(&mut qualify)?)
            }
            None => None,
        };

        let mut order_by = SortSpec::new();
        for key in &query.sort {
            let column = scope.resolve(&key.field)?;
            order_by = order_by.append(column.qualified(), key.direction);
        }
        let identity_key = identity.qualified();
        if !order_by.contains(&identity_key) {
            order_by = order_by.append(identity_key, SortDirection::Asc);
        }
        for (_, source) in &scope.join_outputs {
            let key = source.qualified();
            if !order_by.contains(&key) {
                order_by = order_by.append(key, SortDirection::Asc);
            }
        }

        let projection = scope.projection(query, &identity)?;

        let plan = QueryPlan {
            from: TableRef {
                table: query.table.clone(),
                alias: query.base_alias.clone(),
            },
            identity,
            joins,
            predicate,
            order_by,
            limit: query.page_size.map(u64::from),
            offset: query.offset(),
            projection,
        };
        trace!(table = %plan.from.table, joins = plan.joins.len(), "built query plan");
        Ok(plan)
    }
}

/// Aliases visible to the query and the outputs the joins contribute.
struct Scope<'s> {
    catalog: Option<&'s Catalog>,
    aliases: Vec<(&'s str, &'s str)>,
    join_outputs: Vec<(&'s str, ColumnRef)>,
}

impl<'s> Scope<'s> {
    fn new(query: &'s CollectionQuery, catalog: Option<&'s Catalog>) -> Self {
        Self {
            catalog,
            aliases: vec![(query.base_alias.as_str(), query.table.as_str())],
            join_outputs: Vec::new(),
        }
    }

    fn base_alias(&self) -> &'s str {
        self.aliases[0].0
    }

    fn table_of(&self, alias: &str) -> Option<&'s str> {
        self.aliases
            .iter()
            .find(|(a, _)| *a == alias)
            .map(|(_, table)| *table)
    }

    fn table_def(&self, alias: &str) -> Option<&'s TableDef> {
        let table = self.table_of(alias)?;
        self.catalog?.table(table)
    }

    /// Fail when a registered table lacks the column.
    fn check_column(&self, alias: &str, column: &str) -> Result<(), Error> {
        match self.table_def(alias) {
            Some(def) if !def.has_column(column) => Err(Error::UnknownField {
                field: format!("{}.{}", alias, column),
                scope: format!("table '{}'", def.name),
            }),
            _ => Ok(()),
        }
    }

    /// Assign a field name to exactly one column.
    fn resolve(&self, field: &str) -> Result<ColumnRef, Error> {
        match split_qualified(field) {
            (Some(_), _) => {
                let column = ColumnRef::parse(field)?;
                if self.table_of(&column.table).is_none() {
                    return Err(Error::UnknownField {
                        field: field.to_string(),
                        scope: "query".to_string(),
                    });
                }
                self.check_column(&column.table, &column.column)?;
                Ok(column)
            }
            (None, column) => {
                let mut candidates: Vec<ColumnRef> = Vec::new();
                for (output, source) in &self.join_outputs {
                    if *output == column && !candidates.contains(source) {
                        candidates.push(source.clone());
                    }
                }
                for (alias, _) in &self.aliases {
                    if let Some(def) = self.table_def(alias) {
                        let candidate = ColumnRef::new(*alias, column);
                        if def.has_column(column) && !candidates.contains(&candidate) {
                            candidates.push(candidate);
                        }
                    }
                }

                match candidates.len() {
                    1 => Ok(candidates.remove(0)),
                    0 => {
                        let base = self.base_alias();
                        match self.table_def(base) {
                            Some(def) => Err(Error::UnknownField {
                                field: field.to_string(),
                                scope: format!("table '{}'", def.name),
                            }),
                            None => Ok(ColumnRef::new(base, column)),
                        }
                    }
                    _ => Err(Error::AmbiguousColumn {
                        field: field.to_string(),
                        candidates: candidates.iter().map(ColumnRef::qualified).collect(),
                    }),
                }
            }
        }
    }

    /// Resolve the left side of an ON term against aliases declared so far.
    fn resolve_join_left(&self, join: &JoinSpec, left: &str) -> Result<ColumnRef, Error> {
        let column = match split_qualified(left) {
            (Some(_), _) => ColumnRef::parse(left)?,
            (None, column) => ColumnRef::new(self.base_alias(), column),
        };
        if self.table_of(&column.table).is_none() {
            return Err(Error::InvalidJoin {
                alias: join.alias.clone(),
                reason: format!("'{}' refers to an alias declared later or not at all", left),
            });
        }
        self.check_column(&column.table, &column.column)?;
        Ok(column)
    }

    fn plan_join(&mut self, join: &'s JoinSpec, identity: &ColumnRef) -> Result<PlannedJoin, Error> {
        join.validate()?;
        if self.table_of(&join.alias).is_some() {
            return Err(Error::DuplicateAlias {
                alias: join.alias.clone(),
            });
        }

        let mut on = Vec::with_capacity(join.conditions.len() + 2);
        if let Some(attribute) = &join.attribute {
            on.push(JoinPredicate::Columns {
                left: identity.clone(),
                right: ColumnRef::new(join.alias.clone(), attribute.entity_column.clone()),
            });
            on.push(JoinPredicate::Value {
                column: ColumnRef::new(join.alias.clone(), attribute.attribute_column.clone()),
                value: attribute.attribute_id.clone(),
            });
        }
        for condition in &join.conditions {
            match condition {
                JoinCondition::Columns { left, right } => {
                    let left = self.resolve_join_left(join, left)?;
                    let (_, right) = split_qualified(right);
                    on.push(JoinPredicate::Columns {
                        left,
                        right: ColumnRef::new(join.alias.clone(), right),
                    });
                }
                JoinCondition::Value { column, value } => {
                    let (_, column) = split_qualified(column);
                    on.push(JoinPredicate::Value {
                        column: ColumnRef::new(join.alias.clone(), column),
                        value: value.clone(),
                    });
                }
            }
        }

        self.aliases.push((&join.alias, &join.table));
        for predicate in &on {
            let column = match predicate {
                JoinPredicate::Columns { right, .. } => right,
                JoinPredicate::Value { column, .. } => column,
            };
            self.check_column(&column.table, &column.column)?;
        }

        for (output, column) in &join.columns {
            self.check_column(&join.alias, column)?;
            if let Some((_, existing)) = self.join_outputs.iter().find(|(o, _)| o == output) {
                return Err(Error::AmbiguousColumn {
                    field: output.clone(),
                    candidates: vec![
                        existing.qualified(),
                        format!("{}.{}", join.alias, column),
                    ],
                });
            }
            self.join_outputs
                .push((output.as_str(), ColumnRef::new(join.alias.clone(), column.clone())));
        }

        Ok(PlannedJoin {
            alias: join.alias.clone(),
            table: join.table.clone(),
            kind: if join.is_attribute() {
                JoinKind::Left
            } else {
                join.kind
            },
            on,
            attribute: join.attribute.as_ref().map(|a| PlannedAttribute {
                code: a.code.clone(),
                required: join.kind == JoinKind::Inner,
            }),
        })
    }

    fn projection(
        &self,
        query: &'s CollectionQuery,
        identity: &ColumnRef,
    ) -> Result<Vec<Projection>, Error> {
        let mut projection = vec![Projection::Column {
            output: IDENTITY_OUTPUT.to_string(),
            source: identity.clone(),
            role: ColumnRole::Identity,
        }];
        let mut claimed: Vec<(String, ColumnRef)> = Vec::new();

        match &query.fields {
            FieldSelection::All => {
                projection.push(Projection::AllColumns {
                    alias: query.base_alias.clone(),
                });
                if let Some(def) = self.table_def(&query.base_alias) {
                    for name in def.column_names() {
                        claimed.push((name.to_string(), ColumnRef::new(query.base_alias.clone(), name)));
                    }
                }
            }
            FieldSelection::Only(fields) => {
                for field in fields {
                    let (qualifier, output) = split_qualified(field);
                    if qualifier.is_none() && self.join_outputs.iter().any(|(o, _)| *o == output) {
                        continue;
                    }
                    let source = self.resolve(field)?;
                    claim(&mut claimed, output, &source)?;
                    projection.push(Projection::Column {
                        output: output.to_string(),
                        source,
                        role: ColumnRole::Field,
                    });
                }
            }
        }

        for (output, source) in &self.join_outputs {
            claim(&mut claimed, output, source)?;
            let join = query.join(&source.table);
            let role = match join.and_then(|j| j.attribute.as_ref()) {
                Some(attribute) => ColumnRole::Attribute {
                    code: attribute.code.clone(),
                },
                None => ColumnRole::Field,
            };
            projection.push(Projection::Column {
                output: output.to_string(),
                source: source.clone(),
                role,
            });
            if let Some(attribute) = join.and_then(|j| j.attribute.as_ref()) {
                projection.push(Projection::Column {
                    output: match_marker(&source.table),
                    source: ColumnRef::new(source.table.clone(), attribute.entity_column.clone()),
                    role: ColumnRole::MatchMarker {
                        join: source.table.clone(),
                    },
                });
            }
        }

        Ok(projection)
    }
}

/// Record an output name, failing when another column already uses it.
fn claim(claimed: &mut Vec<(String, ColumnRef)>, output: &str, source: &ColumnRef) -> Result<(), Error> {
    match claimed.iter().find(|(name, _)| name == output) {
        Some((_, existing)) if existing == source => Ok(()),
        Some((_, existing)) => Err(Error::AmbiguousColumn {
            field: output.to_string(),
            candidates: vec![existing.qualified(), source.qualified()],
        }),
        None => {
            claimed.push((output.to_string(), source.clone()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_proto::{FilterExpr, SortKey};

    fn catalog() -> Catalog {
        Catalog::new()
            .with_table(
                TableDef::new("product")
                    .with_identity("id")
                    .with_columns(["name", "status", "price", "category_id"]),
            )
            .with_table(TableDef::new("category").with_identity("id").with_column("name"))
            .with_table(
                TableDef::new("attribute_value")
                    .with_columns(["entity_id", "attribute_id", "value"]),
            )
    }

    fn products() -> CollectionQuery {
        CollectionQuery::new("product", "id")
    }

    #[test]
    fn test_filter_is_qualified() {
        let mut query = products();
        query.filter = Some(
            FilterExpr::eq("status", 1i64)
                .unwrap()
                .and_with(FilterExpr::gt("price", 100i64).unwrap()),
        );

        let catalog = catalog();
        let plan = QueryPlanBuilder::new().with_catalog(&catalog).build(&query).unwrap();
        let fields = plan.predicate.as_ref().unwrap().fields();
        assert_eq!(fields, vec!["main_table.status", "main_table.price"]);
    }

    #[test]
    fn test_identity_tie_breaker_appended() {
        let mut query = products();
        query.sort = vec![SortKey::desc("price")].into_iter().collect();

        let plan = QueryPlanBuilder::new().build(&query).unwrap();
        let keys: Vec<_> = plan
            .order_by
            .iter()
            .map(|k| (k.field.as_str(), k.direction))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("main_table.price", SortDirection::Desc),
                ("main_table.id", SortDirection::Asc)
            ]
        );
    }

    #[test]
    fn test_join_outputs_follow_identity_in_order() {
        let mut query = products();
        query.joins.push(
            JoinSpec::left("cat", "category")
                .on("category_id", "id")
                .select("category_name", "name"),
        );
        query.joins.push(JoinSpec::attribute("color", "attribute_value", 93));
        query.sort = vec![SortKey::desc("color")].into_iter().collect();

        let plan = QueryPlanBuilder::new().build(&query).unwrap();
        let keys: Vec<_> = plan
            .order_by
            .iter()
            .map(|k| (k.field.as_str(), k.direction))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("at_color.value", SortDirection::Desc),
                ("main_table.id", SortDirection::Asc),
                ("cat.name", SortDirection::Asc),
            ]
        );
    }

    #[test]
    fn test_identity_sort_not_duplicated() {
        let mut query = products();
        query.sort = vec![SortKey::desc("id")].into_iter().collect();

        let plan = QueryPlanBuilder::new().build(&query).unwrap();
        assert_eq!(plan.order_by.len(), 1);
        assert_eq!(plan.order_by.direction_of("main_table.id"), Some(SortDirection::Desc));
    }

    #[test]
    fn test_pagination_window() {
        let mut query = products();
        query.page_size = Some(2);
        query.current_page = 3;

        let plan = QueryPlanBuilder::new().build(&query).unwrap();
        assert_eq!(plan.limit, Some(2));
        assert_eq!(plan.offset, Some(4));

        query.page_size = None;
        let plan = QueryPlanBuilder::new().build(&query).unwrap();
        assert_eq!(plan.limit, None);
        assert_eq!(plan.offset, None);
    }

    #[test]
    fn test_unknown_field_rejected_with_catalog() {
        let mut query = products();
        query.filter = Some(FilterExpr::eq("colour", "red").unwrap());

        let catalog = catalog();
        let err = QueryPlanBuilder::new().with_catalog(&catalog).build(&query).unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));

        // Without a catalog the field is assumed to live on the base table.
        let plan = QueryPlanBuilder::new().build(&query).unwrap();
        assert_eq!(plan.predicate.unwrap().fields(), vec!["main_table.colour"]);
    }

    #[test]
    fn test_ambiguous_unqualified_field() {
        let mut query = products();
        query.joins.push(
            JoinSpec::left("cat", "category")
                .on("category_id", "id")
                .select("category_name", "name"),
        );
        query.filter = Some(FilterExpr::eq("name", "A").unwrap());

        let catalog = catalog();
        let err = QueryPlanBuilder::new().with_catalog(&catalog).build(&query).unwrap_err();
        match err {
            Error::AmbiguousColumn { field, candidates } => {
                assert_eq!(field, "name");
                assert_eq!(candidates, vec!["main_table.name", "cat.name"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        query.filter = Some(FilterExpr::eq("main_table.name", "A").unwrap());
        assert!(QueryPlanBuilder::new().with_catalog(&catalog).build(&query).is_ok());
    }

    #[test]
    fn test_malformed_qualified_field() {
        let mut query = products();
        for field in ["main_table.", ".price", "main_table.price.cents"] {
            query.filter = Some(FilterExpr::eq(field, 1i64).unwrap());
            let err = QueryPlanBuilder::new().build(&query).unwrap_err();
            assert!(
                matches!(err, Error::InvalidColumnRef(ref column) if column == field),
                "{field}: {err:?}"
            );
        }

        query.filter = Some(FilterExpr::eq("nope.price", 1i64).unwrap());
        assert!(matches!(
            QueryPlanBuilder::new().build(&query),
            Err(Error::UnknownField { .. })
        ));
    }

    #[test]
    fn test_join_output_resolves() {
        let mut query = products();
        query.joins.push(JoinSpec::attribute("color", "attribute_value", 93));
        query.filter = Some(FilterExpr::eq("color", "red").unwrap());
        query.sort = vec![SortKey::asc("color")].into_iter().collect();

        let catalog = catalog();
        let plan = QueryPlanBuilder::new().with_catalog(&catalog).build(&query).unwrap();
        assert_eq!(plan.predicate.unwrap().fields(), vec!["at_color.value"]);
        assert!(plan.order_by.contains("at_color.value"));
    }

    #[test]
    fn test_attribute_join_planned_as_left_with_marker() {
        let mut query = products();
        query.joins.push(JoinSpec::attribute("color", "attribute_value", 93).required());

        let plan = QueryPlanBuilder::new().build(&query).unwrap();
        let join = &plan.joins[0];
        assert_eq!(join.kind, JoinKind::Left);
        assert!(join.attribute.as_ref().unwrap().required);
        assert_eq!(
            join.on,
            vec![
                JoinPredicate::Columns {
                    left: ColumnRef::new("main_table", "id"),
                    right: ColumnRef::new("at_color", "entity_id"),
                },
                JoinPredicate::Value {
                    column: ColumnRef::new("at_color", "attribute_id"),
                    value: 93i32.into(),
                },
            ]
        );
        assert_eq!(
            plan.column_outputs().collect::<Vec<_>>(),
            vec![IDENTITY_OUTPUT, "color", "__match_at_color"]
        );
        assert_eq!(plan.attribute_slots().len(), 1);
    }

    #[test]
    fn test_join_left_side_must_be_declared() {
        let mut query = products();
        query
            .joins
            .push(JoinSpec::left("cat", "category").on("later.category_id", "id"));

        let err = QueryPlanBuilder::new().build(&query).unwrap_err();
        assert!(matches!(err, Error::InvalidJoin { .. }));
    }

    #[test]
    fn test_duplicate_alias() {
        let mut query = products();
        query.joins.push(JoinSpec::attribute("color", "attribute_value", 93));
        query.joins.push(JoinSpec::attribute("color", "attribute_value", 94));

        let err = QueryPlanBuilder::new().build(&query).unwrap_err();
        assert!(matches!(err, Error::DuplicateAlias { alias } if alias == "at_color"));

        let mut query = products();
        query
            .joins
            .push(JoinSpec::left("main_table", "category").on("category_id", "id"));
        assert!(matches!(
            QueryPlanBuilder::new().build(&query),
            Err(Error::DuplicateAlias { .. })
        ));
    }

    #[test]
    fn test_selected_fields_collide_with_join_output() {
        let mut query = products();
        query.joins.push(
            JoinSpec::left("cat", "category")
                .on("category_id", "id")
                .select("label", "name"),
        );
        query.fields = FieldSelection::only(["name", "main_table.label"]);

        let err = QueryPlanBuilder::new().build(&query).unwrap_err();
        assert!(matches!(err, Error::AmbiguousColumn { field, .. } if field == "label"));
    }

    #[test]
    fn test_selected_fields_projection() {
        let mut query = products();
        query.fields = FieldSelection::only(["name", "price"]);

        let plan = QueryPlanBuilder::new().build(&query).unwrap();
        assert_eq!(
            plan.column_outputs().collect::<Vec<_>>(),
            vec![IDENTITY_OUTPUT, "name", "price"]
        );
        assert!(!plan
            .projection
            .iter()
            .any(|p| matches!(p, Projection::AllColumns { .. })));
    }
}
