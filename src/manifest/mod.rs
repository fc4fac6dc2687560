//! The driver's active orders, newest first.
//!
//! Every mutation swaps in a fresh snapshot, so readers holding an
//! `OrderSnapshot` never observe a half-applied change, and raises a
//! `ManifestNotice` for transient user feedback.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::models::driver::RestaurantId;
use crate::models::order::{Order, OrderId, OrderPatch};

pub type OrderSnapshot = Arc<Vec<Order>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    OrderAdded,
    OrderRemoved,
    OrderUpdated,
    StatusUpdated,
    OrderNotFound,
    InvalidUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestNotice {
    pub level: NoticeLevel,
    pub kind: NoticeKind,
    pub order_id: Option<OrderId>,
    pub message: String,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ManifestError {
    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("update is missing a numeric order_id")]
    MissingOrderId,

    #[error("invalid update for order {order_id}: {reason}")]
    InvalidPatch { order_id: OrderId, reason: String },
}

pub struct OrderManifest {
    orders: OrderSnapshot,
    snapshots: watch::Sender<OrderSnapshot>,
    notices: broadcast::Sender<ManifestNotice>,
}

impl OrderManifest {
    pub fn new(notice_buffer: usize) -> Self {
        let orders: OrderSnapshot = Arc::new(Vec::new());
        let (snapshots, _unused_rx) = watch::channel(orders.clone());
        let (notices, _unused_rx) = broadcast::channel(notice_buffer.max(1));

        Self {
            orders,
            snapshots,
            notices,
        }
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        self.orders.clone()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        self.orders.iter().find(|order| order.order_id == order_id)
    }

    pub fn order_ids(&self) -> Vec<OrderId> {
        self.orders.iter().map(|order| order.order_id).collect()
    }

    /// Restaurant of the newest order, where the driver is stationed.
    pub fn station(&self) -> Option<RestaurantId> {
        self.orders.first().and_then(|order| order.restaurant_id)
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<OrderSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn notice_sender(&self) -> broadcast::Sender<ManifestNotice> {
        self.notices.clone()
    }

    /// Prepends `order`. A stale entry with the same id is replaced so a
    /// re-announced order is never listed twice.
    pub fn add(&mut self, order: Order) {
        let order_id = order.order_id;
        let mut orders = Vec::with_capacity(self.orders.len() + 1);
        orders.push(order);
        orders.extend(
            self.orders
                .iter()
                .filter(|existing| existing.order_id != order_id)
                .cloned(),
        );

        self.replace(orders);
        self.notify(
            NoticeLevel::Success,
            NoticeKind::OrderAdded,
            Some(order_id),
            "New order added".to_string(),
        );
    }

    pub fn remove(&mut self, order_id: OrderId) -> Result<(), ManifestError> {
        if self.get(order_id).is_none() {
            return Err(self.not_found(order_id));
        }

        let orders = self
            .orders
            .iter()
            .filter(|order| order.order_id != order_id)
            .cloned()
            .collect();

        self.replace(orders);
        self.notify(
            NoticeLevel::Warning,
            NoticeKind::OrderRemoved,
            Some(order_id),
            "Order removed".to_string(),
        );
        Ok(())
    }

    /// Shallow-merges `patch` into the entry with the same `order_id`.
    pub fn update(&mut self, patch: &OrderPatch) -> Result<(), ManifestError> {
        let Some(order_id) = patch.get("order_id").and_then(|value| value.as_i64()) else {
            self.notify(
                NoticeLevel::Error,
                NoticeKind::InvalidUpdate,
                None,
                "Order update without an order id".to_string(),
            );
            return Err(ManifestError::MissingOrderId);
        };

        let Some(current) = self.get(order_id) else {
            return Err(self.not_found(order_id));
        };

        let merged = match current.merged(patch) {
            Ok(merged) => merged,
            Err(err) => {
                self.notify(
                    NoticeLevel::Error,
                    NoticeKind::InvalidUpdate,
                    Some(order_id),
                    "Order update rejected".to_string(),
                );
                return Err(ManifestError::InvalidPatch {
                    order_id,
                    reason: err.to_string(),
                });
            }
        };

        self.replace_entry(merged);
        self.notify(
            NoticeLevel::Warning,
            NoticeKind::OrderUpdated,
            Some(order_id),
            "Order updated".to_string(),
        );
        Ok(())
    }

    pub fn update_status(&mut self, order_id: OrderId, status: &str) -> Result<(), ManifestError> {
        let Some(current) = self.get(order_id) else {
            return Err(self.not_found(order_id));
        };

        let mut updated = current.clone();
        updated.order_status = status.to_string();

        self.replace_entry(updated);
        self.notify(
            NoticeLevel::Info,
            NoticeKind::StatusUpdated,
            Some(order_id),
            format!("Order status changed to {status}"),
        );
        Ok(())
    }

    fn replace_entry(&mut self, updated: Order) {
        let orders = self
            .orders
            .iter()
            .map(|order| {
                if order.order_id == updated.order_id {
                    updated.clone()
                } else {
                    order.clone()
                }
            })
            .collect();
        self.replace(orders);
    }

    fn replace(&mut self, orders: Vec<Order>) {
        self.orders = Arc::new(orders);
        self.snapshots.send_replace(self.orders.clone());
    }

    fn not_found(&self, order_id: OrderId) -> ManifestError {
        self.notify(
            NoticeLevel::Error,
            NoticeKind::OrderNotFound,
            Some(order_id),
            "Order not found".to_string(),
        );
        ManifestError::NotFound(order_id)
    }

    fn notify(&self, level: NoticeLevel, kind: NoticeKind, order_id: Option<OrderId>, message: String) {
        match level {
            NoticeLevel::Error => warn!(?kind, ?order_id, "{message}"),
            _ => info!(?kind, ?order_id, "{message}"),
        }

        let _ = self.notices.send(ManifestNotice {
            level,
            kind,
            order_id,
            message,
        });
    }
}
