//! JSON messages exchanged with the dispatch server. Every message is an
//! object discriminated by its `type` field; there is no version field.

use serde::{Deserialize, Serialize};

use crate::models::driver::{DriverId, DriverStatus, RestaurantId};
use crate::models::location::GeoPoint;
use crate::models::order::{Order, OrderId, OrderPatch};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    DriverInit {
        driver_id: DriverId,
        driver_status: DriverStatus,
        driver_stationed_at: Option<RestaurantId>,
        driver_orders: Vec<OrderId>,
        location: Option<GeoPoint>,
    },
    LocationUpdate {
        driver_id: DriverId,
        location: GeoPoint,
        driver_stationed_at: Option<RestaurantId>,
        driver_orders: Vec<OrderId>,
        /// Epoch milliseconds.
        timestamp: i64,
    },
    UpdateOrders {
        driver_id: DriverId,
        order_id: OrderId,
        driver_stationed_at: Option<RestaurantId>,
        driver_status: DriverStatus,
    },
    FreeDriver {
        driver_id: DriverId,
        driver_stationed_at: Option<RestaurantId>,
        driver_orders: Vec<OrderId>,
        driver_status: DriverStatus,
    },
    ChangeCity {
        driver_id: DriverId,
        driver_city: String,
    },
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::DriverInit { .. } => "driver_init",
            OutboundMessage::LocationUpdate { .. } => "location_update",
            OutboundMessage::UpdateOrders { .. } => "update_orders",
            OutboundMessage::FreeDriver { .. } => "free_driver",
            OutboundMessage::ChangeCity { .. } => "change_city",
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    NewOrderNearby {
        order: Order,
    },
    UpdatedOrder {
        order: OrderPatch,
    },
    OrderStatusUpdated {
        order_id: OrderId,
        order_status: String,
    },
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::NewOrderNearby { .. } => "new_order_nearby",
            InboundMessage::UpdatedOrder { .. } => "updated_order",
            InboundMessage::OrderStatusUpdated { .. } => "order_status_updated",
            InboundMessage::Unknown => "unknown",
        }
    }
}
