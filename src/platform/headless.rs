use async_trait::async_trait;
use tracing::info;

use crate::platform::{
    ForegroundNotice, ForegroundService, LocalNotification, NotificationChannel, Notifier,
    PlatformError,
};

/// Platform for hosts without a notification shade: everything is written
/// to the log.
#[derive(Debug, Default, Clone)]
pub struct HeadlessPlatform;

#[async_trait]
impl Notifier for HeadlessPlatform {
    async fn request_permission(&self) -> Result<bool, PlatformError> {
        Ok(true)
    }

    async fn ensure_channel(&self, channel: &NotificationChannel) -> Result<(), PlatformError> {
        info!(channel_id = %channel.id, "notification channel ready");
        Ok(())
    }

    async fn show(&self, notification: LocalNotification) -> Result<(), PlatformError> {
        info!(
            kind = ?notification.kind,
            title = %notification.title,
            body = %notification.body,
            "notification"
        );
        Ok(())
    }
}

#[async_trait]
impl ForegroundService for HeadlessPlatform {
    async fn start(&self, notice: &ForegroundNotice) -> Result<(), PlatformError> {
        info!(id = notice.id, title = %notice.title, "foreground indicator started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), PlatformError> {
        info!("foreground indicator stopped");
        Ok(())
    }
}
