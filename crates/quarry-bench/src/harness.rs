//! Shared benchmark setup: the same data loaded into every source.

use std::sync::Arc;

use quarry_core::{Collection, DataSource, MemorySource, SledConfig, SledSource};
use quarry_sqlite::SqliteSource;

use crate::fixtures::{
    generate_attributes, generate_categories, generate_products, Scale, ATTRIBUTE_COLUMNS,
    CATEGORY_COLUMNS, PRODUCT_COLUMNS,
};

/// Sources loaded with one generated data set.
pub struct TestContext {
    pub scale: Scale,
    pub memory: Arc<MemorySource>,
    pub sled: Arc<SledSource>,
    pub sqlite: Arc<SqliteSource>,
}

impl TestContext {
    /// Generate data at `scale` and load it into every source.
    pub fn with_scale(scale: Scale) -> Self {
        init_tracing();

        let products = generate_products(scale.count(), scale.categories());
        let categories = generate_categories(scale.categories());
        let attributes = generate_attributes(scale.count());

        let memory = MemorySource::new()
            .with_table("product", products.clone())
            .with_table("category", categories.clone())
            .with_table("attribute_value", attributes.clone());

        let sled = SledSource::open(SledConfig::temporary()).expect("Failed to open sled source");
        sled.insert_many("product", products.clone()).expect("Failed to load products");
        sled.insert_many("category", categories.clone()).expect("Failed to load categories");
        sled.insert_many("attribute_value", attributes.clone()).expect("Failed to load attributes");

        let sqlite = SqliteSource::in_memory().expect("Failed to open SQLite in-memory database");
        sqlite.create_table("product", &PRODUCT_COLUMNS).expect("Failed to create schema");
        sqlite.create_table("category", &CATEGORY_COLUMNS).expect("Failed to create schema");
        sqlite
            .create_table("attribute_value", &ATTRIBUTE_COLUMNS)
            .expect("Failed to create schema");
        sqlite
            .execute_batch(
                "CREATE INDEX IF NOT EXISTS idx_attribute_entity ON attribute_value(entity_id, attribute_id);
                 CREATE INDEX IF NOT EXISTS idx_product_status ON product(status);",
            )
            .expect("Failed to create indexes");
        sqlite.insert_many("product", products).expect("Failed to load products");
        sqlite.insert_many("category", categories).expect("Failed to load categories");
        sqlite.insert_many("attribute_value", attributes).expect("Failed to load attributes");

        Self {
            scale,
            memory: Arc::new(memory),
            sled: Arc::new(sled),
            sqlite: Arc::new(sqlite),
        }
    }

    /// Every source under a display name.
    pub fn sources(&self) -> Vec<(&'static str, Arc<dyn DataSource>)> {
        let memory: Arc<dyn DataSource> = self.memory.clone();
        let sled: Arc<dyn DataSource> = self.sled.clone();
        let sqlite: Arc<dyn DataSource> = self.sqlite.clone();
        vec![("memory", memory), ("sled", sled), ("sqlite", sqlite)]
    }

    /// A fresh product collection over `source`.
    pub fn products(&self, source: Arc<dyn DataSource>) -> Collection {
        Collection::new("product", "id", source)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
