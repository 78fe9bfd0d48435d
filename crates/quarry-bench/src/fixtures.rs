//! Test data generation for benchmarks.
//!
//! Generators are seeded so every run sees the same rows.

use quarry_proto::{Row, Value};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Attribute identifier of the `color` attribute.
pub const COLOR_ATTRIBUTE: i64 = 93;
/// Attribute identifier of the `size` attribute.
pub const SIZE_ATTRIBUTE: i64 = 94;

/// Column layout of the generated `product` table.
pub const PRODUCT_COLUMNS: [&str; 5] = ["id", "name", "status", "price", "category_id"];
/// Column layout of the generated `category` table.
pub const CATEGORY_COLUMNS: [&str; 2] = ["id", "title"];
/// Column layout of the generated `attribute_value` table.
pub const ATTRIBUTE_COLUMNS: [&str; 3] = ["entity_id", "attribute_id", "value"];

/// Scale factor for benchmark data generation.
#[derive(Clone, Copy, Debug, Default)]
pub enum Scale {
    /// 100 products. Use for quick iteration.
    Small,
    /// 2,000 products.
    #[default]
    Medium,
    /// 20,000 products.
    Large,
}

impl Scale {
    /// Number of products at this scale.
    pub fn count(&self) -> usize {
        match self {
            Scale::Small => 100,
            Scale::Medium => 2_000,
            Scale::Large => 20_000,
        }
    }

    /// Number of categories at this scale.
    pub fn categories(&self) -> usize {
        (self.count() / 50).max(2)
    }
}

/// Generate a random string of specified length.
fn random_string(rng: &mut StdRng, len: usize) -> String {
    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}

/// Generate products with a realistic spread of NULLs and duplicate values.
pub fn generate_products(count: usize, categories: usize) -> Vec<Row> {
    const SEED: u64 = 12345;
    let mut rng = StdRng::seed_from_u64(SEED);
    let prefixes = ["Shirt", "Shoe", "Hat", "Bag", "Sock", "Belt"];

    (0..count)
        .map(|i| {
            let name = format!("{}_{}", prefixes[i % prefixes.len()], random_string(&mut rng, 6));
            let price = if rng.gen_ratio(1, 20) {
                Value::Null
            } else {
                Value::Float64(f64::from(rng.gen_range(100..100_000u32)) / 100.0)
            };
            let category = if rng.gen_ratio(1, 10) {
                Value::Null
            } else {
                Value::Int64(rng.gen_range(1..=categories as i64))
            };
            Row::new()
                .with("id", i as i64 + 1)
                .with("name", name)
                .with("status", (i % 3) as i64)
                .with("price", price)
                .with("category_id", category)
        })
        .collect()
}

/// Generate categories with identities `1..=count`.
pub fn generate_categories(count: usize) -> Vec<Row> {
    (1..=count as i64)
        .map(|id| Row::new().with("id", id).with("title", format!("Category {}", id)))
        .collect()
}

/// Generate attribute rows: most products get a color, some a size.
pub fn generate_attributes(products: usize) -> Vec<Row> {
    const SEED: u64 = 54321;
    let mut rng = StdRng::seed_from_u64(SEED);
    let colors = ["red", "green", "blue", "black", "white"];

    let mut rows = Vec::with_capacity(products * 2);
    for id in 1..=products as i64 {
        if rng.gen_ratio(4, 5) {
            rows.push(
                Row::new()
                    .with("entity_id", id)
                    .with("attribute_id", COLOR_ATTRIBUTE)
                    .with("value", colors[rng.gen_range(0..colors.len())]),
            );
        }
        if rng.gen_ratio(1, 2) {
            rows.push(
                Row::new()
                    .with("entity_id", id)
                    .with("attribute_id", SIZE_ATTRIBUTE)
                    .with("value", rng.gen_range(36..48i64)),
            );
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        assert_eq!(generate_products(50, 3), generate_products(50, 3));
        assert_eq!(generate_attributes(50), generate_attributes(50));
    }

    #[test]
    fn test_product_shape() {
        let products = generate_products(10, 2);
        assert_eq!(products.len(), 10);
        for row in &products {
            assert_eq!(row.names().collect::<Vec<_>>(), PRODUCT_COLUMNS.to_vec());
        }
        assert_eq!(products[9].get("id"), Some(&Value::Int64(10)));
    }
}
