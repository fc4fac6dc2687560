use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio::time;
use tokio_stream::wrappers::IntervalStream;

use crate::geolocation::{GeolocationError, LocationProvider, LocationStream, WatchOptions};
use crate::models::location::{GeoPoint, LocationFix};

/// Replays a recorded track, one point per interval. Used for field
/// simulation when no platform location source is attached.
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    points: Vec<GeoPoint>,
    interval: Duration,
}

impl ReplayProvider {
    pub fn new(points: Vec<GeoPoint>, interval: Duration) -> Self {
        Self { points, interval }
    }

    /// Reads a JSON-lines track: one `{"lat": .., "lng": ..}` object per line.
    pub async fn from_file(path: impl AsRef<Path>, interval: Duration) -> Result<Self, GeolocationError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
            GeolocationError::Unavailable(format!("failed to read {}: {err}", path.display()))
        })?;

        let points = parse_track(&raw)?;
        Ok(Self::new(points, interval))
    }
}

fn parse_track(raw: &str) -> Result<Vec<GeoPoint>, GeolocationError> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<GeoPoint>(line).map_err(|err| {
                GeolocationError::Provider(format!("invalid track line {}: {err}", index + 1))
            })
        })
        .collect()
}

#[async_trait]
impl LocationProvider for ReplayProvider {
    async fn watch(&self, _options: &WatchOptions) -> Result<LocationStream, GeolocationError> {
        if self.points.is_empty() {
            return Err(GeolocationError::Unavailable("track is empty".to_string()));
        }

        let ticks = IntervalStream::new(time::interval(self.interval));
        let fixes = ticks
            .zip(stream::iter(self.points.clone()))
            .map(|(_, point)| Ok(LocationFix::new(point.lat, point.lng)));

        Ok(fixes.boxed())
    }
}
