use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Catalog row as the storefront reads it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub is_active: bool,
}

impl Product {
    pub fn new(name: &str, price_cents: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            price_cents,
            is_active: true,
        }
    }

    pub fn to_row(&self) -> Value {
        serde_json::to_value(self).unwrap()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expert {
    pub id: Uuid,
    pub name: String,
}

impl Expert {
    #[allow(dead_code)]
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }

    #[allow(dead_code)]
    pub fn to_row(&self) -> Value {
        json!({"id": self.id, "name": self.name})
    }
}
