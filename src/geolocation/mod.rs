pub mod push;
pub mod replay;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::geo::DistanceFilter;
use crate::models::location::LocationFix;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeolocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location services unavailable: {0}")]
    Unavailable(String),

    #[error("location provider error: {0}")]
    Provider(String),
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Minimum movement in meters before a new fix is reported.
    pub distance_filter_m: f64,
    pub request_permissions: bool,
    /// Whether providers may deliver cached fixes.
    pub stale: bool,
    pub background_title: String,
    pub background_message: String,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            distance_filter_m: 40.0,
            request_permissions: true,
            stale: false,
            background_title: "Driver tracking".to_string(),
            background_message: "Waiting for new orders...".to_string(),
        }
    }
}

pub type LocationStream = BoxStream<'static, Result<LocationFix, GeolocationError>>;

/// Platform location capability.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_permissions(&self) -> Result<(), GeolocationError> {
        Ok(())
    }

    async fn watch(&self, options: &WatchOptions) -> Result<LocationStream, GeolocationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationReading {
    Fix(LocationFix),
    Failed(GeolocationError),
}

/// Owns at most one active observation of a `LocationProvider`.
pub struct GeolocationWatcher {
    provider: Arc<dyn LocationProvider>,
    options: WatchOptions,
    task: Option<JoinHandle<()>>,
}

impl GeolocationWatcher {
    pub fn new(provider: Arc<dyn LocationProvider>, options: WatchOptions) -> Self {
        Self {
            provider,
            options,
            task: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Starts observing, replacing any previous observation. Readings that
    /// pass the distance filter and provider errors are forwarded to `events`.
    pub async fn start<E>(&mut self, events: mpsc::UnboundedSender<E>) -> Result<(), GeolocationError>
    where
        E: From<LocationReading> + Send + 'static,
    {
        self.stop();

        if self.options.request_permissions {
            if let Err(err) = self.provider.request_permissions().await {
                warn!(error = %err, "location permission request failed");
            }
        }

        let mut stream = self.provider.watch(&self.options).await?;
        let mut filter = DistanceFilter::new(self.options.distance_filter_m);

        self.task = Some(tokio::spawn(async move {
            while let Some(reading) = stream.next().await {
                let reading = match reading {
                    Ok(fix) => {
                        if !filter.accept(fix.point()) {
                            continue;
                        }
                        LocationReading::Fix(fix)
                    }
                    Err(err) => LocationReading::Failed(err),
                };

                if events.send(reading.into()).is_err() {
                    break;
                }
            }
            debug!("location stream ended");
        }));

        info!(
            distance_filter_m = self.options.distance_filter_m,
            "geolocation watcher started"
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("geolocation watcher stopped");
        }
    }
}

impl Drop for GeolocationWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
