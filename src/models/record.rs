//! Canonical record models
//!
//! Platform adapters translate their native payloads into [`CanonicalRecord`]s.
//! Only the comparable fields take part in diffing; the `native` bag is carried
//! through untouched for write-back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Entity types the engine knows how to synchronize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Catalog products, keyed by SKU
    Products,
    /// Stock levels, keyed by SKU
    Inventory,
    /// Orders, keyed by order number
    Orders,
    /// Customers (not synchronized by this engine version)
    Customers,
}

impl EntityType {
    /// All entity types, in pass order
    pub const ALL: [EntityType; 4] = [
        EntityType::Products,
        EntityType::Inventory,
        EntityType::Orders,
        EntityType::Customers,
    ];

    /// Stable lowercase name, also used as the capability key
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Products => "products",
            EntityType::Inventory => "inventory",
            EntityType::Orders => "orders",
            EntityType::Customers => "customers",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "products" | "product" => Ok(EntityType::Products),
            "inventory" => Ok(EntityType::Inventory),
            "orders" | "order" => Ok(EntityType::Orders),
            "customers" | "customer" => Ok(EntityType::Customers),
            _ => Err(format!("Invalid entity type: {}", s)),
        }
    }
}

/// Filters passed to `get_entities`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    /// Only return records updated at or after this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_since: Option<DateTime<Utc>>,

    /// Page size hint for adapters that paginate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,

    /// Hard cap on records returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl EntityFilter {
    /// Filter with only a page size hint
    pub fn paged(page_size: usize) -> Self {
        Self {
            page_size: Some(page_size),
            ..Default::default()
        }
    }
}

/// Platform-agnostic representation of a product, inventory level or order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Cross-platform identity (SKU or order number)
    pub key: String,

    /// The platform's own identifier, used for updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,

    /// Display name / title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Stock quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,

    /// Unit price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    /// Lifecycle status (e.g. "active", "paid", "cancelled")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Last modification time reported by the platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Stock location for inventory levels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,

    /// Platform-native passthrough fields, never compared
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub native: Map<String, Value>,
}

const PRICE_EPSILON: f64 = 1e-9;

impl CanonicalRecord {
    /// Creates a record with only its key set
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            remote_id: None,
            name: None,
            quantity: None,
            price: None,
            status: None,
            updated_at: None,
            location_id: None,
            native: Map::new(),
        }
    }

    /// Set the platform identifier
    pub fn with_remote_id(mut self, id: impl Into<String>) -> Self {
        self.remote_id = Some(id.into());
        self
    }

    /// Set the name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the quantity
    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    /// Set the price
    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Set the modification time
    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Set the stock location
    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = Some(location_id.into());
        self
    }

    /// Add a native passthrough field
    pub fn with_native(mut self, field: impl Into<String>, value: Value) -> Self {
        self.native.insert(field.into(), value);
        self
    }

    /// Identifier to address this record on its own platform
    pub fn platform_id(&self) -> &str {
        self.remote_id.as_deref().unwrap_or(&self.key)
    }

    /// Compares the comparable fields (name, quantity, price, status)
    ///
    /// `updated_at` only orders conflicting versions and is not compared here.
    pub fn same_fields(&self, other: &CanonicalRecord) -> bool {
        self.name == other.name
            && self.quantity == other.quantity
            && self.status == other.status
            && prices_equal(self.price, other.price)
    }

    /// Copy of this record addressed at `target`'s platform identity
    ///
    /// Comparable fields come from `self`; `remote_id`, `location_id` and the
    /// native bag come from `target`.
    pub fn rebased_onto(&self, target: &CanonicalRecord) -> CanonicalRecord {
        CanonicalRecord {
            remote_id: target.remote_id.clone(),
            location_id: target.location_id.clone(),
            native: target.native.clone(),
            ..self.clone()
        }
    }

    /// Copy of this record stripped of platform-specific identity
    pub fn detached(&self) -> CanonicalRecord {
        CanonicalRecord {
            remote_id: None,
            location_id: None,
            native: Map::new(),
            ..self.clone()
        }
    }

    /// Cancelled and test orders are never replicated
    pub fn is_excluded_order(&self) -> bool {
        let status_excluded = self
            .status
            .as_deref()
            .map(|s| {
                matches!(
                    s.to_lowercase().as_str(),
                    "cancelled" | "canceled" | "test"
                )
            })
            .unwrap_or(false);

        let flagged_test = matches!(self.native.get("test"), Some(Value::Bool(true)));

        status_excluded || flagged_test
    }
}

fn prices_equal(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).abs() < PRICE_EPSILON,
        (None, None) => true,
        _ => false,
    }
}
