//! The collection type.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use quarry_proto::{
    split_qualified, Entity, FilterExpr, FilterOp, FilterValue, JoinCondition, JoinSpec,
    SortDirection, SortSpec, Value,
};
use tracing::{debug, debug_span, trace};

use crate::catalog::Catalog;
use crate::error::Error;
use crate::hydrate::Hydrator;
use crate::query::{
    values_equal, CollectionQuery, FieldSelection, PlanSummary, QueryPlan, QueryPlanBuilder,
    RowBudget, ValueKey, IDENTITY_OUTPUT,
};
use crate::source::{CancelToken, DataSource, Executor};

use super::cache::{LoadState, Materialized};
use super::options::CollectionOptions;

/// A lazily materialized, filterable, sortable, paginated set of entities
/// from one base table.
///
/// Configuration methods take `&mut self` and invalidate cached results.
/// Read methods take `&self`; concurrent readers share one materialization.
pub struct Collection {
    query: CollectionQuery,
    source: Arc<dyn DataSource>,
    catalog: Option<Arc<Catalog>>,
    discovered: RwLock<Option<Arc<Catalog>>>,
    budget: RowBudget,
    cancel: CancelToken,
    cache: RwLock<Materialized>,
}

impl Collection {
    /// Create a collection over `table`, identified by `id_field`.
    pub fn new(
        table: impl Into<String>,
        id_field: impl Into<String>,
        source: Arc<dyn DataSource>,
    ) -> Self {
        Self::with_options(table, id_field, source, CollectionOptions::default())
    }

    /// Create a collection with explicit options.
    pub fn with_options(
        table: impl Into<String>,
        id_field: impl Into<String>,
        source: Arc<dyn DataSource>,
        options: CollectionOptions,
    ) -> Self {
        let mut query =
            CollectionQuery::new(table, id_field).with_base_alias(options.base_alias);
        query.page_size = options.default_page_size;
        Self {
            query,
            source,
            catalog: None,
            discovered: RwLock::new(None),
            budget: options.budget,
            cancel: CancelToken::new(),
            cache: RwLock::new(Materialized::default()),
        }
    }

    /// Create a collection over a catalog table, using its identity column.
    pub fn from_catalog(
        catalog: Arc<Catalog>,
        table: &str,
        source: Arc<dyn DataSource>,
    ) -> Result<Self, Error> {
        let def = catalog.table(table).ok_or_else(|| Error::UnknownField {
            field: table.to_string(),
            scope: "catalog".to_string(),
        })?;
        let id_field = def.identity.clone().ok_or_else(|| Error::UnknownField {
            field: "identity".to_string(),
            scope: format!("table '{}'", table),
        })?;
        Ok(Self::new(table, id_field, source).with_catalog(catalog))
    }

    /// Validate fields against a catalog when planning.
    ///
    /// Without one, the data source's own description is used.
    pub fn with_catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = Some(catalog);
        self.invalidate();
        self
    }

    /// Use a shared cancellation token for every data source call.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    // Configuration

    /// AND a filter into the current filter.
    pub fn add_filter(&mut self, filter: FilterExpr) -> &mut Self {
        self.query.filter = Some(match self.query.filter.take() {
            Some(existing) => existing.and_with(filter),
            None => filter,
        });
        self.invalidate();
        self
    }

    /// AND a single condition into the current filter.
    pub fn add_field_filter(
        &mut self,
        field: impl Into<String>,
        operator: FilterOp,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self, Error> {
        let filter = FilterExpr::leaf(field, operator, value)?;
        Ok(self.add_filter(filter))
    }

    /// Drop every filter.
    pub fn reset_filters(&mut self) -> &mut Self {
        self.query.filter = None;
        self.invalidate();
        self
    }

    /// Add a join.
    ///
    /// Fails when the alias is taken, the join is malformed, or an ON term
    /// refers to an alias that is not declared yet.
    pub fn add_join(&mut self, join: JoinSpec) -> Result<&mut Self, Error> {
        join.validate()?;
        if self.query.has_alias(&join.alias) {
            return Err(Error::DuplicateAlias { alias: join.alias });
        }
        for condition in &join.conditions {
            if let JoinCondition::Columns { left, .. } = condition {
                if let (Some(alias), _) = split_qualified(left) {
                    if !self.query.has_alias(alias) {
                        return Err(Error::InvalidJoin {
                            alias: join.alias.clone(),
                            reason: format!("'{}' refers to an unknown alias", left),
                        });
                    }
                }
            }
        }
        self.query.joins.push(join);
        self.invalidate();
        Ok(self)
    }

    /// Add an optional attribute join reading `code` from an attribute table.
    pub fn add_attribute(
        &mut self,
        code: impl Into<String>,
        table: impl Into<String>,
        attribute_id: impl Into<Value>,
    ) -> Result<&mut Self, Error> {
        self.add_join(JoinSpec::attribute(code, table, attribute_id))
    }

    /// Replace the sort.
    pub fn set_sort(&mut self, sort: SortSpec) -> &mut Self {
        self.query.sort = sort;
        self.invalidate();
        self
    }

    /// Add a sort key with the lowest priority. No-op for a field already sorted.
    pub fn add_sort(&mut self, field: impl Into<String>, direction: SortDirection) -> &mut Self {
        self.query.sort = std::mem::take(&mut self.query.sort).append(field, direction);
        self.invalidate();
        self
    }

    /// Add a sort key with the highest priority, replacing any key for the field.
    pub fn unshift_sort(&mut self, field: impl Into<String>, direction: SortDirection) -> &mut Self {
        self.query.sort = std::mem::take(&mut self.query.sort).prepend(field, direction);
        self.invalidate();
        self
    }

    /// Drop every sort key.
    pub fn reset_sort(&mut self) -> &mut Self {
        self.query.sort = SortSpec::new();
        self.invalidate();
        self
    }

    /// Choose the projected base fields.
    pub fn select_fields(&mut self, fields: FieldSelection) -> &mut Self {
        self.query.fields = fields;
        self.invalidate();
        self
    }

    /// Paginate with `size` items per page.
    pub fn set_page_size(&mut self, size: u32) -> Result<&mut Self, Error> {
        if size == 0 {
            return Err(Error::InvalidPagination {
                reason: "page size must be greater than 0".to_string(),
            });
        }
        self.query.page_size = Some(size);
        self.invalidate();
        Ok(self)
    }

    /// Disable pagination.
    pub fn unset_page_size(&mut self) -> &mut Self {
        self.query.page_size = None;
        self.invalidate();
        self
    }

    /// Select the 1-based page. Pages past the end are empty.
    pub fn set_current_page(&mut self, page: u32) -> Result<&mut Self, Error> {
        if page == 0 {
            return Err(Error::InvalidPagination {
                reason: "page numbers start at 1".to_string(),
            });
        }
        self.query.current_page = page;
        self.invalidate();
        Ok(self)
    }

    /// Drop cached items and size; configuration is kept.
    pub fn clear(&self) -> &Self {
        self.cache.write().clear_results();
        trace!(table = %self.query.table, "cleared collection cache");
        self
    }

    fn invalidate(&mut self) {
        self.cache.get_mut().invalidate();
        trace!(table = %self.query.table, "invalidated collection cache");
    }

    // Accessors

    /// The current configuration snapshot.
    pub fn query(&self) -> &CollectionQuery {
        &self.query
    }

    /// Base table name.
    pub fn table(&self) -> &str {
        &self.query.table
    }

    /// Identity column.
    pub fn id_field(&self) -> &str {
        &self.query.id_field
    }

    /// Current filter.
    pub fn filter(&self) -> Option<&FilterExpr> {
        self.query.filter.as_ref()
    }

    /// Current sort.
    pub fn sort(&self) -> &SortSpec {
        &self.query.sort
    }

    /// Joins in order.
    pub fn joins(&self) -> &[JoinSpec] {
        &self.query.joins
    }

    /// Page size, if paginated.
    pub fn page_size(&self) -> Option<u32> {
        self.query.page_size
    }

    /// 1-based page number.
    pub fn current_page(&self) -> u32 {
        self.query.current_page
    }

    /// The cancellation token used for data source calls.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Materialization state.
    pub fn state(&self) -> LoadState {
        self.cache.read().state()
    }

    /// Check if items are cached.
    pub fn is_materialized(&self) -> bool {
        self.state() == LoadState::Materialized
    }

    // Materialization

    fn build_plan(&self) -> Result<QueryPlan, Error> {
        let catalog = match &self.catalog {
            Some(catalog) => catalog.clone(),
            None => self.source_catalog()?,
        };
        QueryPlanBuilder::new().with_catalog(&catalog).build(&self.query)
    }

    /// The data source's description of its tables, fetched once.
    ///
    /// A source that cannot describe itself yields an empty catalog, which
    /// accepts every field.
    fn source_catalog(&self) -> Result<Arc<Catalog>, Error> {
        if let Some(catalog) = self.discovered.read().as_ref() {
            return Ok(catalog.clone());
        }
        let catalog = Arc::new(self.executor().describe()?.unwrap_or_default());
        *self.discovered.write() = Some(catalog.clone());
        Ok(catalog)
    }

    fn plan_from(&self, cache: &Materialized) -> Result<Arc<QueryPlan>, Error> {
        match &cache.plan {
            Some(plan) => Ok(plan.clone()),
            None => Ok(Arc::new(self.build_plan()?)),
        }
    }

    fn executor(&self) -> Executor<'_> {
        Executor::new(self.source.as_ref(), &self.cancel)
    }

    /// The plan for the current configuration, without executing it.
    pub fn plan(&self) -> Result<Arc<QueryPlan>, Error> {
        let cache = self.cache.upgradable_read();
        if let Some(plan) = &cache.plan {
            return Ok(plan.clone());
        }
        let plan = Arc::new(self.build_plan()?);
        let mut cache = RwLockUpgradableReadGuard::upgrade(cache);
        cache.plan = Some(plan.clone());
        Ok(plan)
    }

    /// Summarize the plan for the current configuration.
    pub fn explain(&self) -> Result<PlanSummary, Error> {
        Ok(PlanSummary::from_plan(&*self.plan()?))
    }

    /// The entities of the current page, materializing on first use.
    ///
    /// Repeated calls return the cached items without touching the data
    /// source. On failure nothing is cached.
    pub fn items(&self) -> Result<Arc<[Entity]>, Error> {
        let cache = self.cache.upgradable_read();
        if let Some(items) = &cache.items {
            trace!(table = %self.query.table, "item cache hit");
            return Ok(items.clone());
        }

        let span = debug_span!("materialize", table = %self.query.table);
        let _enter = span.enter();

        debug!(state = ?LoadState::Building, "building plan");
        let plan = self.plan_from(&cache)?;

        debug!(
            state = ?LoadState::Executing,
            joins = plan.joins.len(),
            limit = ?plan.limit,
            offset = ?plan.offset,
            "executing plan"
        );
        let rows = self.executor().execute(&plan)?;
        self.budget.check(rows.len())?;

        debug!(state = ?LoadState::Hydrating, rows = rows.len(), "hydrating rows");
        let items: Arc<[Entity]> = Hydrator::new(&plan).hydrate(rows)?.into();
        debug!(state = ?LoadState::Materialized, entities = items.len(), "materialized");

        let mut cache = RwLockUpgradableReadGuard::upgrade(cache);
        if !plan.is_paginated() && cache.size.is_none() {
            cache.size = Some(items.len() as u64);
        }
        cache.plan = Some(plan);
        cache.items = Some(items.clone());
        Ok(items)
    }

    /// Number of distinct matching entities, ignoring pagination.
    ///
    /// Issues a count query unless the size is already known; never
    /// materializes items.
    pub fn size(&self) -> Result<u64, Error> {
        let cache = self.cache.upgradable_read();
        if let Some(size) = cache.size {
            trace!(table = %self.query.table, "size cache hit");
            return Ok(size);
        }

        let plan = self.plan_from(&cache)?;
        let size = self.executor().execute_count(&plan)?;
        debug!(table = %self.query.table, size, "counted collection");

        let mut cache = RwLockUpgradableReadGuard::upgrade(cache);
        cache.plan = Some(plan);
        cache.size = Some(size);
        Ok(size)
    }

    /// Number of items on the current page.
    pub fn count(&self) -> Result<usize, Error> {
        Ok(self.items()?.len())
    }

    /// Check if the current page has no items.
    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.items()?.is_empty())
    }

    /// First item of the current page.
    pub fn first(&self) -> Result<Entity, Error> {
        self.items()?
            .first()
            .cloned()
            .ok_or_else(|| self.empty_error())
    }

    /// Last item of the current page.
    pub fn last(&self) -> Result<Entity, Error> {
        self.items()?
            .last()
            .cloned()
            .ok_or_else(|| self.empty_error())
    }

    fn empty_error(&self) -> Error {
        Error::EmptyCollection {
            table: self.query.table.clone(),
        }
    }

    /// Find a loaded item by identity.
    pub fn get_item_by_id(&self, id: &Value) -> Result<Option<Entity>, Error> {
        Ok(self
            .items()?
            .iter()
            .find(|entity| values_equal(entity.id(), id))
            .cloned())
    }

    /// Values of one field across the loaded items; NULL where absent.
    pub fn column_values(&self, field: &str) -> Result<Vec<Value>, Error> {
        Ok(self
            .items()?
            .iter()
            .map(|entity| entity.get(field).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Every matching identity in plan order, ignoring pagination.
    ///
    /// Runs its own query and does not touch the item cache.
    pub fn all_ids(&self) -> Result<Vec<Value>, Error> {
        let plan = self.plan()?.for_identities();
        let rows = self.executor().execute(&plan)?;
        self.budget.check(rows.len())?;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for row in rows {
            let Some(id) = row.get(IDENTITY_OUTPUT).filter(|v| !v.is_null()) else {
                return Err(Error::MissingIdentity {
                    table: plan.from.table.clone(),
                    column: plan.identity.column.clone(),
                });
            };
            if seen.insert(ValueKey::from_value(id)) {
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }

    /// Number of the last page; 1 when unpaginated or empty.
    pub fn last_page_number(&self) -> Result<u64, Error> {
        let Some(page_size) = self.query.page_size else {
            return Ok(1);
        };
        let size = self.size()?;
        Ok(size.div_ceil(u64::from(page_size)).max(1))
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("query", &self.query)
            .field("source", &self.source.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::testing::CountingSource;
    use crate::source::MemorySource;
    use quarry_proto::Row;

    fn source() -> Arc<MemorySource> {
        Arc::new(MemorySource::new().with_table(
            "product",
            vec![
                Row::new().with("id", 1i64).with("name", "A").with("price", 150i64),
                Row::new().with("id", 2i64).with("name", "B").with("price", 90i64),
                Row::new().with("id", 3i64).with("name", "C").with("price", 200i64),
            ],
        ))
    }

    fn counted() -> (Arc<CountingSource>, Collection) {
        let counting = Arc::new(CountingSource::new(source()));
        let collection = Collection::new("product", "id", counting.clone());
        (counting, collection)
    }

    #[test]
    fn test_items_are_memoized() {
        let (counting, collection) = counted();
        assert_eq!(collection.state(), LoadState::Unmaterialized);

        assert_eq!(collection.items().unwrap().len(), 3);
        assert_eq!(collection.items().unwrap().len(), 3);
        assert_eq!(collection.first().unwrap().id(), &Value::Int64(1));
        assert_eq!(collection.last().unwrap().id(), &Value::Int64(3));
        assert_eq!(counting.queries(), 1);
        assert!(collection.is_materialized());

        // Unpaginated size comes from the loaded items.
        assert_eq!(collection.size().unwrap(), 3);
        assert_eq!(counting.counts(), 0);
    }

    #[test]
    fn test_mutation_invalidates() {
        let (counting, mut collection) = counted();
        collection.items().unwrap();

        collection.add_sort("price", SortDirection::Desc);
        assert!(!collection.is_materialized());

        let ids = collection.column_values("id").unwrap();
        assert_eq!(ids, vec![Value::Int64(3), Value::Int64(1), Value::Int64(2)]);
        assert_eq!(counting.queries(), 2);
    }

    #[test]
    fn test_clear_keeps_configuration() {
        let (counting, mut collection) = counted();
        collection.add_filter(FilterExpr::gt("price", 100i64).unwrap());
        assert_eq!(collection.count().unwrap(), 2);

        collection.clear();
        assert!(!collection.is_materialized());
        assert_eq!(collection.count().unwrap(), 2);
        assert_eq!(counting.queries(), 2);
    }

    #[test]
    fn test_size_ignores_pagination() {
        let (counting, mut collection) = counted();
        collection.set_page_size(2).unwrap();

        assert_eq!(collection.size().unwrap(), 3);
        assert_eq!(counting.counts(), 1);
        assert_eq!(counting.queries(), 0);
        assert_eq!(collection.last_page_number().unwrap(), 2);
        assert_eq!(collection.count().unwrap(), 2);

        collection.set_current_page(2).unwrap();
        assert_eq!(collection.column_values("id").unwrap(), vec![Value::Int64(3)]);

        collection.set_current_page(5).unwrap();
        assert!(collection.is_empty().unwrap());
        assert!(matches!(
            collection.first(),
            Err(Error::EmptyCollection { .. })
        ));
    }

    #[test]
    fn test_invalid_pagination() {
        let (_, mut collection) = counted();
        assert!(matches!(
            collection.set_page_size(0),
            Err(Error::InvalidPagination { .. })
        ));
        assert!(matches!(
            collection.set_current_page(0),
            Err(Error::InvalidPagination { .. })
        ));
        assert_eq!(collection.page_size(), None);
        assert_eq!(collection.current_page(), 1);
    }

    #[test]
    fn test_add_join_fails_fast() {
        let (counting, mut collection) = counted();
        collection
            .add_attribute("color", "attribute_value", 93)
            .unwrap();

        let err = collection
            .add_attribute("color", "attribute_value", 94)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateAlias { alias } if alias == "at_color"));

        let err = collection
            .add_join(JoinSpec::left("cat", "category").on("nope.category_id", "id"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidJoin { .. }));

        let err = collection
            .add_join(JoinSpec::left("main_table", "category").on("category_id", "id"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateAlias { .. }));

        assert_eq!(collection.joins().len(), 1);
        assert_eq!(counting.calls(), 0);
    }

    #[test]
    fn test_add_field_filter_validates() {
        let (_, mut collection) = counted();
        let err = collection
            .add_field_filter("price", FilterOp::Gt, FilterValue::None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { .. }));
        assert!(collection.filter().is_none());

        collection
            .add_field_filter("price", FilterOp::Gt, Value::Int64(100))
            .unwrap();
        collection
            .add_field_filter("name", FilterOp::In, vec![Value::from("A"), Value::from("B")])
            .unwrap();
        assert_eq!(collection.column_values("name").unwrap(), vec![Value::from("A")]);
    }

    #[test]
    fn test_get_item_by_id_and_all_ids() {
        let (counting, mut collection) = counted();
        collection.set_page_size(1).unwrap();

        let item = collection.get_item_by_id(&Value::Int32(1)).unwrap().unwrap();
        assert_eq!(item.get("name"), Some(&Value::from("A")));
        assert!(collection.get_item_by_id(&Value::Int64(3)).unwrap().is_none());

        let ids = collection.all_ids().unwrap();
        assert_eq!(ids, vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]);
        assert_eq!(counting.queries(), 2);
        assert!(collection.is_materialized());
    }

    #[test]
    fn test_budget_exceeded() {
        let options = CollectionOptions::default().with_budget(RowBudget::new(2));
        let collection = Collection::with_options("product", "id", source(), options);

        assert!(matches!(
            collection.items(),
            Err(Error::BudgetExceeded { rows: 3, max_rows: 2 })
        ));
        assert!(!collection.is_materialized());
    }

    #[test]
    fn test_default_page_size_option() {
        let options = CollectionOptions::default().with_default_page_size(2);
        let collection = Collection::with_options("product", "id", source(), options);
        assert_eq!(collection.page_size(), Some(2));
        assert_eq!(collection.count().unwrap(), 2);
    }

    #[test]
    fn test_from_catalog() {
        use crate::catalog::TableDef;

        let catalog = Arc::new(
            Catalog::new()
                .with_table(TableDef::new("product").with_identity("id").with_columns(["name", "price"])),
        );
        let mut collection = Collection::from_catalog(catalog.clone(), "product", source()).unwrap();
        assert_eq!(collection.id_field(), "id");

        collection.add_filter(FilterExpr::eq("colour", "red").unwrap());
        assert!(matches!(collection.items(), Err(Error::UnknownField { .. })));

        assert!(Collection::from_catalog(catalog, "order", source()).is_err());
    }

    #[test]
    fn test_explain() {
        let (counting, mut collection) = counted();
        collection.add_sort("price", SortDirection::Desc);

        let summary = collection.explain().unwrap();
        assert_eq!(summary.order_by, vec!["main_table.price DESC", "main_table.id ASC"]);
        assert_eq!(counting.calls(), 0);
        assert!(Arc::ptr_eq(&collection.plan().unwrap(), &collection.plan().unwrap()));
    }
}
