//! Notification and foreground-indicator collaborators. Both are
//! fire-and-forget from the tracker's point of view: failures are logged and
//! never fed back into tracking state.

pub mod headless;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::order::{Order, OrderId};

pub const ORDERS_CHANNEL_ID: &str = "orders_channel";
pub const ORDER_SOUND: &str = "order_sound";
pub const SMALL_ICON: &str = "ic_launcher_foreground";
pub const FOREGROUND_SERVICE_ID: i32 = 101;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlatformError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("platform service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub importance: u8,
    pub sound: String,
    pub vibration: bool,
}

impl NotificationChannel {
    pub fn orders() -> Self {
        Self {
            id: ORDERS_CHANNEL_ID.to_string(),
            name: "Orders Notifications".to_string(),
            description: "Channel for nearby order alerts".to_string(),
            importance: 5,
            sound: ORDER_SOUND.to_string(),
            vibration: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewOrder,
    OrderUpdated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalNotification {
    pub id: i64,
    pub kind: NotificationKind,
    pub channel_id: String,
    pub title: String,
    pub body: String,
    pub sound: String,
    pub small_icon: String,
}

impl LocalNotification {
    fn on_orders_channel(kind: NotificationKind, title: &str, body: String) -> Self {
        Self {
            id: Utc::now().timestamp_millis(),
            kind,
            channel_id: ORDERS_CHANNEL_ID.to_string(),
            title: title.to_string(),
            body,
            sound: ORDER_SOUND.to_string(),
            small_icon: SMALL_ICON.to_string(),
        }
    }

    pub fn new_order(order: &Order) -> Self {
        let body = match order.restaurant_name() {
            Some(name) => format!("Order from {name}"),
            None => format!("Order #{}", order.order_id),
        };
        Self::on_orders_channel(NotificationKind::NewOrder, "New order nearby", body)
    }

    pub fn order_updated(order_id: OrderId) -> Self {
        Self::on_orders_channel(
            NotificationKind::OrderUpdated,
            "Order updated",
            format!("Order #{order_id}"),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForegroundNotice {
    pub id: i32,
    pub title: String,
    pub body: String,
    pub small_icon: String,
}

impl ForegroundNotice {
    pub fn driver_online() -> Self {
        Self {
            id: FOREGROUND_SERVICE_ID,
            title: "Delivery Shop".to_string(),
            body: "Waiting for new orders...".to_string(),
            small_icon: SMALL_ICON.to_string(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether notifications may be shown.
    async fn request_permission(&self) -> Result<bool, PlatformError>;

    async fn ensure_channel(&self, channel: &NotificationChannel) -> Result<(), PlatformError>;

    async fn show(&self, notification: LocalNotification) -> Result<(), PlatformError>;
}

#[async_trait]
pub trait ForegroundService: Send + Sync {
    async fn start(&self, notice: &ForegroundNotice) -> Result<(), PlatformError>;

    async fn stop(&self) -> Result<(), PlatformError>;
}

/// Shows `notification` on a detached task; the outcome is only logged.
pub fn notify_detached(notifier: Arc<dyn Notifier>, notification: LocalNotification) {
    tokio::spawn(async move {
        let kind = notification.kind;
        match notifier.show(notification).await {
            Ok(()) => debug!(kind = ?kind, "notification shown"),
            Err(err) => warn!(kind = ?kind, error = %err, "failed to show notification"),
        }
    });
}
