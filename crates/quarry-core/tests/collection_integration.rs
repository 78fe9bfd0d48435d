//! Integration tests for collections over the in-process data sources.

use std::sync::Arc;
use std::thread;

use quarry_core::catalog::{Catalog, TableDef};
use quarry_core::query::FieldSelection;
use quarry_core::source::testing::{CountingSource, FailingSource};
use quarry_core::{
    CancelToken, Collection, DataSource, Error, FilterEvaluator, LoadState, MemorySource,
    SledConfig, SledSource,
};
use quarry_proto::{FilterExpr, FilterOp, JoinSpec, Row, SortDirection, SortKey, Value};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn product(id: i64, name: &str, status: i64, price: i64) -> Row {
    Row::new()
        .with("id", id)
        .with("name", name)
        .with("status", status)
        .with("price", price)
}

fn product_rows() -> Vec<Row> {
    vec![
        product(1, "A", 1, 150),
        product(2, "B", 1, 90),
        product(3, "C", 1, 200),
        product(4, "D", 0, 300),
    ]
}

fn attribute_rows() -> Vec<Row> {
    vec![Row::new()
        .with("entity_id", 1i64)
        .with("attribute_id", 93i64)
        .with("value", "red")]
}

struct TestContext {
    memory: Arc<MemorySource>,
    sled: Arc<SledSource>,
}

impl TestContext {
    fn new() -> Self {
        init_tracing();
        let memory = Arc::new(
            MemorySource::new()
                .with_table("product", product_rows())
                .with_table("attribute_value", attribute_rows()),
        );

        let sled = Arc::new(SledSource::open(SledConfig::temporary()).unwrap());
        sled.insert_many("product", product_rows()).unwrap();
        sled.insert_many("attribute_value", attribute_rows()).unwrap();

        Self { memory, sled }
    }

    fn sources(&self) -> Vec<Arc<dyn DataSource>> {
        let memory: Arc<dyn DataSource> = self.memory.clone();
        let sled: Arc<dyn DataSource> = self.sled.clone();
        vec![memory, sled]
    }
}

fn ids(collection: &Collection) -> Vec<Value> {
    collection
        .items()
        .unwrap()
        .iter()
        .map(|entity| entity.id().clone())
        .collect()
}

fn int_ids(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| Value::Int64(*v)).collect()
}

#[test]
fn test_product_scenario() {
    let ctx = TestContext::new();
    for source in ctx.sources() {
        let mut collection = Collection::new("product", "id", source);
        collection
            .add_filter(FilterExpr::eq("status", 1i64).unwrap())
            .add_filter(FilterExpr::gt("price", 100i64).unwrap())
            .add_sort("price", SortDirection::Desc);
        collection.set_page_size(2).unwrap().set_current_page(1).unwrap();

        let items = collection.items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get("id"), Some(&Value::Int64(3)));
        assert_eq!(items[0].get("name"), Some(&Value::from("C")));
        assert_eq!(items[0].get("status"), Some(&Value::Int64(1)));
        assert_eq!(items[0].get("price"), Some(&Value::Int64(200)));
        assert_eq!(items[1].get("id"), Some(&Value::Int64(1)));
        assert_eq!(items[1].get("price"), Some(&Value::Int64(150)));
        assert_eq!(collection.size().unwrap(), 2);
    }
}

#[test]
fn test_left_attribute_join_scenario() {
    let ctx = TestContext::new();
    for source in ctx.sources() {
        let mut collection = Collection::new("product", "id", source);
        collection
            .add_attribute("color", "attribute_value", 93i64)
            .unwrap();
        collection.add_filter(FilterExpr::in_values("id", vec![1i64, 2]).unwrap());

        let items = collection.items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get("color"), Some(&Value::from("red")));
        assert_eq!(items[1].get("color"), Some(&Value::Null));
        assert_eq!(items[1].get("name"), Some(&Value::from("B")));
    }
}

#[test]
fn test_required_attribute_join_fails_hydration() {
    let ctx = TestContext::new();
    let mut collection = Collection::new("product", "id", ctx.memory.clone());
    collection
        .add_join(JoinSpec::attribute("color", "attribute_value", 93i64).required())
        .unwrap();

    let err = collection.items().unwrap_err();
    assert!(matches!(
        err,
        Error::IncompleteHydration { ref identity, ref attribute }
            if *identity == Value::Int64(2) && attribute == "color"
    ));
    assert_eq!(collection.state(), LoadState::Unmaterialized);

    // Restricting to entities that have the attribute succeeds.
    collection.add_filter(FilterExpr::eq("id", 1i64).unwrap());
    assert_eq!(ids(&collection), int_ids(&[1]));
}

#[test]
fn test_eav_completeness() {
    init_tracing();
    let source = Arc::new(MemorySource::new());
    let colors = ["red", "green", "blue"];
    for id in 1..=30i64 {
        source.insert("product", product(id, &format!("P{}", id), id % 2, id * 10));
        if id % 3 != 0 {
            source.insert(
                "attribute_value",
                Row::new()
                    .with("entity_id", id)
                    .with("attribute_id", 93i64)
                    .with("value", colors[(id % 3) as usize]),
            );
        }
        if id % 5 == 0 {
            source.insert(
                "attribute_value",
                Row::new()
                    .with("entity_id", id)
                    .with("attribute_id", 94i64)
                    .with("value", "XL"),
            );
        }
    }

    let mut collection = Collection::new("product", "id", source.clone());
    collection
        .add_attribute("color", "attribute_value", 93i64)
        .unwrap()
        .add_attribute("size", "attribute_value", 94i64)
        .unwrap();

    let items = collection.items().unwrap();
    assert_eq!(items.len(), 30);
    assert_eq!(collection.size().unwrap(), 30);
    for entity in items.iter() {
        let id = entity.id().as_i64().unwrap();
        let codes: Vec<&str> = entity.attributes().iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(codes, vec!["color", "size"]);

        let expected_color = if id % 3 == 0 {
            Value::Null
        } else {
            Value::from(colors[(id % 3) as usize])
        };
        assert_eq!(entity.attribute("color"), Some(&expected_color));
        let expected_size = if id % 5 == 0 { Value::from("XL") } else { Value::Null };
        assert_eq!(entity.attribute("size"), Some(&expected_size));
    }
}

#[test]
fn test_filter_matches_row_oracle() {
    init_tracing();
    let rows: Vec<Row> = (1..=40i64)
        .map(|id| {
            let name = match id % 4 {
                0 => Value::from(format!("alpha{}", id)),
                1 => Value::from(format!("Beta_{}", id)),
                2 => Value::from("gamma%"),
                _ => Value::Null,
            };
            let price = if id % 7 == 0 {
                Value::Null
            } else {
                Value::Float64((id * 13 % 50) as f64 + 0.5)
            };
            Row::new()
                .with("id", id)
                .with("name", name)
                .with("status", id % 3)
                .with("price", price)
        })
        .collect();
    let source = Arc::new(MemorySource::new().with_table("product", rows.clone()));

    let filters = vec![
        FilterExpr::eq("status", 1i64).unwrap(),
        FilterExpr::neq("status", 1i64).unwrap(),
        FilterExpr::gt("price", 20i64).unwrap(),
        FilterExpr::lte("price", 20.5f64).unwrap(),
        FilterExpr::like("name", "alpha%").unwrap(),
        FilterExpr::not_like("name", "%\\%").unwrap(),
        FilterExpr::like("name", "Beta\\__").unwrap(),
        FilterExpr::in_values("status", vec![0i64, 2]).unwrap(),
        FilterExpr::not_in("name", vec!["gamma%"]).unwrap(),
        FilterExpr::is_null("price").unwrap(),
        FilterExpr::not_null("name").unwrap(),
        FilterExpr::between("price", 10i64, 30i64).unwrap(),
        FilterExpr::or(vec![
            FilterExpr::eq("status", 0i64).unwrap(),
            FilterExpr::and(vec![
                FilterExpr::gte("price", 40i64).unwrap(),
                FilterExpr::is_null("name").unwrap(),
            ])
            .unwrap(),
        ])
        .unwrap(),
    ];

    for filter in filters {
        let mut collection = Collection::new("product", "id", source.clone());
        collection.add_filter(filter.clone());

        let expected: Vec<Value> = rows
            .iter()
            .filter(|row| FilterEvaluator::evaluate(&filter, row))
            .map(|row| row.get("id").cloned().unwrap())
            .collect();
        assert_eq!(ids(&collection), expected, "filter: {}", filter);
        assert_eq!(collection.size().unwrap(), expected.len() as u64);
    }
}

#[test]
fn test_materialization_is_idempotent() {
    let ctx = TestContext::new();
    let counting = Arc::new(CountingSource::new(ctx.memory.clone()));
    let collection = Collection::new("product", "id", counting.clone());

    let first = collection.items().unwrap();
    let second = collection.items().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    collection.first().unwrap();
    collection.last().unwrap();
    collection.column_values("name").unwrap();
    assert_eq!(counting.queries(), 1);
}

#[test]
fn test_concurrent_readers_share_one_query() {
    let ctx = TestContext::new();
    let counting = Arc::new(CountingSource::new(ctx.memory.clone()));
    let collection = Arc::new(Collection::new("product", "id", counting.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let collection = collection.clone();
            thread::spawn(move || collection.items().unwrap().len())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 4);
    }
    assert_eq!(counting.queries(), 1);
}

#[test]
fn test_every_mutation_invalidates() {
    let ctx = TestContext::new();
    let counting = Arc::new(CountingSource::new(ctx.memory.clone()));
    let mut collection = Collection::new("product", "id", counting.clone());

    let mutations: Vec<Box<dyn Fn(&mut Collection)>> = vec![
        Box::new(|c| {
            c.add_filter(FilterExpr::not_null("name").unwrap());
        }),
        Box::new(|c| {
            c.add_sort("price", SortDirection::Asc);
        }),
        Box::new(|c| {
            c.unshift_sort("name", SortDirection::Desc);
        }),
        Box::new(|c| {
            c.add_attribute("color", "attribute_value", 93i64).unwrap();
        }),
        Box::new(|c| {
            c.select_fields(FieldSelection::only(["name"]));
        }),
        Box::new(|c| {
            c.set_page_size(3).unwrap();
        }),
        Box::new(|c| {
            c.set_current_page(2).unwrap();
        }),
        Box::new(|c| {
            c.reset_sort();
        }),
        Box::new(|c| {
            c.reset_filters();
        }),
    ];

    collection.items().unwrap();
    let mut expected_queries = 1;
    for mutate in mutations {
        mutate(&mut collection);
        assert_eq!(collection.state(), LoadState::Unmaterialized);
        collection.items().unwrap();
        expected_queries += 1;
        assert_eq!(counting.queries(), expected_queries);
    }
}

#[test]
fn test_pagination_is_deterministic() {
    init_tracing();
    // Many ties on the sort key; only the identity breaks them.
    let rows: Vec<Row> = (1..=23i64)
        .rev()
        .map(|id| product(id, "X", 1, id % 3))
        .collect();
    let source = Arc::new(MemorySource::new().with_table("product", rows));

    let mut collection = Collection::new("product", "id", source);
    collection.add_sort("price", SortDirection::Desc);
    let all = ids(&collection);
    assert_eq!(all.len(), 23);

    for page_size in [1u32, 4, 5, 23, 30] {
        collection.set_page_size(page_size).unwrap();
        let last = collection.last_page_number().unwrap();
        let mut paged = Vec::new();
        for page in 1..=last as u32 {
            collection.set_current_page(page).unwrap();
            paged.extend(ids(&collection));
        }
        assert_eq!(paged, all, "page size {}", page_size);
        collection.set_current_page(1).unwrap();
    }

    collection.unset_page_size();
    assert_eq!(collection.all_ids().unwrap(), all);
}

fn review(product_id: i64, rating: i64) -> Row {
    Row::new()
        .with("product_id", product_id)
        .with("rating", rating)
}

#[test]
fn test_pages_count_entities_across_one_to_many_joins() {
    init_tracing();
    let products = vec![product(1, "A", 1, 10), product(2, "B", 1, 20)];
    let reviews = vec![review(1, 5), review(1, 3), review(2, 4)];

    let memory: Arc<dyn DataSource> = Arc::new(
        MemorySource::new()
            .with_table("product", products.clone())
            .with_table("review", reviews.clone()),
    );
    let sled = Arc::new(SledSource::open(SledConfig::temporary()).unwrap());
    sled.insert_many("product", products).unwrap();
    sled.insert_many("review", reviews).unwrap();
    let sled: Arc<dyn DataSource> = sled;

    for source in [memory, sled] {
        let mut collection = Collection::new("product", "id", source);
        collection
            .add_join(
                JoinSpec::left("rev", "review")
                    .on("id", "product_id")
                    .select("rating", "rating"),
            )
            .unwrap();
        let all = ids(&collection);
        assert_eq!(all, vec![Value::Int64(1), Value::Int64(2)]);

        collection.set_page_size(1).unwrap();
        assert_eq!(collection.last_page_number().unwrap(), 2);
        let mut paged = Vec::new();
        for page in 1..=2u32 {
            collection.set_current_page(page).unwrap();
            let items = collection.items().unwrap();
            assert_eq!(items.len(), 1, "page {}", page);
            paged.push(items[0].id().clone());
        }
        assert_eq!(paged, all);

        // Rows of one entity arrive ordered by the join output.
        collection.set_current_page(1).unwrap();
        assert_eq!(collection.first().unwrap().get("rating"), Some(&Value::Int64(3)));
    }
}

#[test]
fn test_shared_column_is_ambiguous_without_explicit_catalog() {
    init_tracing();
    let products = vec![
        Row::new().with("id", 1i64).with("name", "Boots").with("category_id", 10i64),
        Row::new().with("id", 2i64).with("name", "Sandals").with("category_id", 11i64),
    ];
    let categories = vec![
        Row::new().with("id", 10i64).with("name", "Shoes"),
        Row::new().with("id", 11i64).with("name", "Summer"),
    ];

    let memory: Arc<dyn DataSource> = Arc::new(
        MemorySource::new()
            .with_table("product", products.clone())
            .with_table("category", categories.clone()),
    );
    let sled = Arc::new(SledSource::open(SledConfig::temporary()).unwrap());
    sled.insert_many("product", products).unwrap();
    sled.insert_many("category", categories).unwrap();
    let sled: Arc<dyn DataSource> = sled;

    for source in [memory, sled] {
        let mut collection = Collection::new("product", "id", source);
        collection
            .add_join(JoinSpec::inner("cat", "category").on("category_id", "id"))
            .unwrap();
        collection.add_filter(FilterExpr::eq("name", "Shoes").unwrap());

        let err = collection.items().unwrap_err();
        assert!(matches!(
            err,
            Error::AmbiguousColumn { ref field, ref candidates }
                if field == "name" && candidates.len() == 2
        ));

        collection
            .reset_filters()
            .add_filter(FilterExpr::eq("cat.name", "Shoes").unwrap());
        assert_eq!(ids(&collection), vec![Value::Int64(1)]);

        collection
            .reset_filters()
            .add_filter(FilterExpr::eq("main_table.name", "Sandals").unwrap());
        assert_eq!(ids(&collection), vec![Value::Int64(2)]);
    }
}

#[test]
fn test_malformed_conditions_rejected_before_querying() {
    let ctx = TestContext::new();
    let counting = Arc::new(CountingSource::new(ctx.memory.clone()));
    let mut collection = Collection::new("product", "id", counting.clone());

    assert!(matches!(
        collection.add_field_filter("price", FilterOp::Gt, Value::Float64(f64::NAN)),
        Err(Error::InvalidFilter { ref field, .. }) if field == "price"
    ));
    assert!(matches!(
        collection.add_field_filter("", FilterOp::IsNull, quarry_proto::FilterValue::None),
        Err(Error::InvalidFilter { .. })
    ));
    assert!(collection.filter().is_none());
    assert_eq!(collection.items().unwrap().len(), 4);
    assert_eq!(counting.queries(), 1);
}

#[test]
fn test_sort_priority() {
    let ctx = TestContext::new();
    let mut collection = Collection::new("product", "id", ctx.memory.clone());
    collection
        .add_sort("b", SortDirection::Desc)
        .add_sort("a", SortDirection::Asc)
        .unshift_sort("a", SortDirection::Asc);

    let keys: Vec<SortKey> = collection.sort().iter().cloned().collect();
    assert_eq!(keys, vec![SortKey::asc("a"), SortKey::desc("b")]);

    // Adding an existing field is a no-op; unshifting moves it to the front.
    collection.add_sort("b", SortDirection::Asc);
    assert_eq!(collection.sort().direction_of("b"), Some(SortDirection::Desc));
    collection.unshift_sort("b", SortDirection::Asc);
    let fields: Vec<&str> = collection.sort().iter().map(|k| k.field.as_str()).collect();
    assert_eq!(fields, vec!["b", "a"]);
}

#[test]
fn test_data_source_error_is_retryable() {
    let ctx = TestContext::new();
    let failing = Arc::new(FailingSource::new(ctx.memory.clone()));
    let collection = Collection::new("product", "id", failing.clone());

    let err = collection.items().unwrap_err();
    assert!(matches!(err, Error::DataSource { operation: "query", .. }));
    assert!(err.is_retryable());
    assert!(!collection.is_materialized());
    assert!(matches!(collection.size(), Err(Error::DataSource { operation: "count", .. })));

    failing.set_failing(false);
    assert_eq!(collection.items().unwrap().len(), 4);
    assert_eq!(collection.size().unwrap(), 4);
}

#[test]
fn test_cancellation() {
    let ctx = TestContext::new();
    let token = CancelToken::new();
    let collection =
        Collection::new("product", "id", ctx.memory.clone()).with_cancel_token(token.clone());

    token.cancel();
    assert!(matches!(collection.items(), Err(Error::Cancelled { .. })));
    assert!(matches!(collection.size(), Err(Error::Cancelled { .. })));
    assert!(!collection.is_materialized());

    token.reset();
    assert_eq!(collection.count().unwrap(), 4);
}

#[test]
fn test_catalog_validation() {
    let ctx = TestContext::new();
    let catalog = Arc::new(
        Catalog::new()
            .with_table(
                TableDef::new("product")
                    .with_identity("id")
                    .with_columns(["name", "status", "price"]),
            )
            .with_table(
                TableDef::new("category")
                    .with_identity("id")
                    .with_column("name"),
            ),
    );

    let mut collection =
        Collection::from_catalog(catalog.clone(), "product", ctx.memory.clone()).unwrap();
    collection
        .add_join(
            JoinSpec::left("cat", "category")
                .on("status", "id")
                .select("category_name", "name"),
        )
        .unwrap();
    collection.add_filter(FilterExpr::eq("name", "A").unwrap());

    let err = collection.plan().unwrap_err();
    assert!(matches!(err, Error::AmbiguousColumn { ref field, .. } if field == "name"));

    collection
        .reset_filters()
        .add_filter(FilterExpr::eq("missing", 1i64).unwrap());
    assert!(matches!(collection.plan(), Err(Error::UnknownField { .. })));
}

#[test]
fn test_selected_fields() {
    let ctx = TestContext::new();
    for source in ctx.sources() {
        let mut collection = Collection::new("product", "id", source);
        collection.select_fields(FieldSelection::only(["name"]));
        collection.add_filter(FilterExpr::eq("id", 4i64).unwrap());

        let entity = collection.first().unwrap();
        assert_eq!(entity.fields(), &[("name".to_string(), Value::from("D"))]);
        assert_eq!(entity.get("id"), Some(&Value::Int64(4)));
        assert_eq!(entity.get("price"), None);
    }
}

#[test]
fn test_empty_collection() {
    let ctx = TestContext::new();
    let mut collection = Collection::new("product", "id", ctx.memory.clone());
    collection.add_filter(FilterExpr::gt("price", 1000i64).unwrap());

    assert!(matches!(collection.first(), Err(Error::EmptyCollection { .. })));
    assert!(matches!(collection.last(), Err(Error::EmptyCollection { .. })));
    assert_eq!(collection.size().unwrap(), 0);
    assert_eq!(collection.last_page_number().unwrap(), 1);
}

#[test]
fn test_entities_serialize_flat() {
    let ctx = TestContext::new();
    let mut collection = Collection::new("product", "id", ctx.memory.clone());
    collection
        .add_attribute("color", "attribute_value", 93i64)
        .unwrap();
    collection.add_filter(FilterExpr::eq("id", 1i64).unwrap());

    let json = serde_json::to_string(&collection.first().unwrap()).unwrap();
    assert_eq!(
        json,
        r#"{"id":1,"name":"A","status":1,"price":150,"color":"red"}"#
    );
}
