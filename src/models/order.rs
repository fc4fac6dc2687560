use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::driver::{DriverId, RestaurantId};

pub type OrderId = i64;

/// Field bag carried by `updated_order`; must contain `order_id`.
pub type OrderPatch = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RestaurantRef {
    #[serde(default)]
    pub name: String,
}

/// Only `order_id` and `restaurant_id` are strict. The rest is display data
/// and a malformed value degrades to empty rather than rejecting the order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub order_id: OrderId,
    #[serde(default, deserialize_with = "lenient::status")]
    pub order_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restaurant_id: Option<RestaurantId>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub order_total_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub order_delivery_cost: Option<f64>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub order_receipt: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub order_notes: Option<String>,
    #[serde(default, deserialize_with = "lenient::id", skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<DriverId>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub user_phone: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub user_address: Option<String>,
    #[serde(default, deserialize_with = "lenient::object", skip_serializing_if = "Option::is_none")]
    pub restaurant: Option<RestaurantRef>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Server fields this client does not interpret, kept so merges and
    /// re-serialization are lossless.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(status) => status,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    /// Numbers and numeric strings, as decimal columns often arrive quoted.
    pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(number) => number.as_f64(),
            Value::String(raw) => raw.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(number) => number.as_i64(),
            Value::String(raw) => raw.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(text) => Some(text),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        })
    }

    pub fn object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(serde_json::from_value(Value::deserialize(deserializer)?).ok())
    }
}

impl Order {
    pub fn new(order_id: OrderId, restaurant_id: Option<RestaurantId>) -> Self {
        Self {
            order_id,
            order_status: "pending".to_string(),
            restaurant_id,
            order_total_price: None,
            order_delivery_cost: None,
            order_receipt: None,
            order_notes: None,
            driver_id: None,
            user_name: None,
            user_phone: None,
            user_address: None,
            restaurant: None,
            created_at: None,
            extra: Map::new(),
        }
    }

    /// Shallow merge: every top-level key in `patch` replaces the stored value,
    /// all other fields are kept.
    pub fn merged(&self, patch: &OrderPatch) -> Result<Order, serde_json::Error> {
        let Value::Object(mut fields) = serde_json::to_value(self)? else {
            return Err(<serde_json::Error as serde::de::Error>::custom(
                "order did not serialize to an object",
            ));
        };

        for (key, value) in patch {
            fields.insert(key.clone(), value.clone());
        }

        serde_json::from_value(Value::Object(fields))
    }

    pub fn restaurant_name(&self) -> Option<&str> {
        self.restaurant
            .as_ref()
            .map(|restaurant| restaurant.name.as_str())
            .filter(|name| !name.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Ready,
    Delivered,
    Other,
}

impl StatusKind {
    pub fn of(status: &str) -> Self {
        let status = status.trim();
        if status.eq_ignore_ascii_case("ready") {
            Self::Ready
        } else if status.eq_ignore_ascii_case("delivered") {
            Self::Delivered
        } else {
            Self::Other
        }
    }
}
