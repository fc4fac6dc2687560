use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::geolocation::{GeolocationError, LocationProvider, LocationStream, WatchOptions};
use crate::models::location::LocationFix;

/// Provider fed by the host, e.g. a mobile bridge forwarding platform
/// callbacks. Each `watch` gets its own subscription.
pub struct PushLocationProvider {
    readings: broadcast::Sender<Result<LocationFix, GeolocationError>>,
}

impl PushLocationProvider {
    pub fn new(capacity: usize) -> Self {
        let (readings, _unused_rx) = broadcast::channel(capacity.max(1));
        Self { readings }
    }

    pub fn push(&self, fix: LocationFix) {
        let _ = self.readings.send(Ok(fix));
    }

    pub fn push_error(&self, error: GeolocationError) {
        let _ = self.readings.send(Err(error));
    }

    /// Number of live observations.
    pub fn watcher_count(&self) -> usize {
        self.readings.receiver_count()
    }
}

#[async_trait]
impl LocationProvider for PushLocationProvider {
    async fn watch(&self, _options: &WatchOptions) -> Result<LocationStream, GeolocationError> {
        let stream = BroadcastStream::new(self.readings.subscribe())
            .filter_map(|item| futures::future::ready(item.ok()));
        Ok(stream.boxed())
    }
}
