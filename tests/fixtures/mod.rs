//! Product fixtures shared by the renewal tests.

use product_renewal::models::product::{Overrides, ProductData, ProductKey};
use serde_json::json;

/// A catalog entry with a title and optional editorial overrides.
pub fn product(title: &str, overrides: Option<serde_json::Value>) -> ProductData {
    let overrides: Option<Overrides> = overrides.map(|v| match v {
        serde_json::Value::Object(map) => map,
        other => panic!("overrides fixture must be an object, got {other}"),
    });

    let mut fields = serde_json::Map::new();
    fields.insert("title".to_string(), json!(title));
    ProductData { overrides, fields }
}

/// Three products: a lamp with overrides, a kettle and a toaster without.
pub fn catalog() -> Vec<(ProductKey, ProductData)> {
    vec![
        (
            ProductKey::parse("AE91ECBUDA").unwrap(),
            product("Desk Lamp", Some(json!({ "title": "Our favourite lamp", "price": "19.99" }))),
        ),
        (ProductKey::parse("B00KETTLE1").unwrap(), product("Kettle", None)),
        (ProductKey::parse("B00TOAST01").unwrap(), product("Toaster", None)),
    ]
}
