use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::models::location::GeoPoint;
use crate::observability::metrics::Metrics;

/// Emitted when a heartbeat is due and a location fix is available. The
/// receiver builds the report from its own, freshest, state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatTick;

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatTiming {
    pub interval: Duration,
    pub location_wait: Duration,
    pub location_poll: Duration,
}

/// Polls `location` every `poll` until a fix exists or `wait` elapses.
pub async fn wait_for_location(
    location: &watch::Receiver<Option<GeoPoint>>,
    wait: Duration,
    poll: Duration,
) -> Option<GeoPoint> {
    time::timeout(wait, async {
        loop {
            let current = *location.borrow();
            if let Some(point) = current {
                return point;
            }
            time::sleep(poll).await;
        }
    })
    .await
    .ok()
}

/// At most one periodic timer; `start` replaces a running one.
#[derive(Default)]
pub struct Heartbeat {
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    pub fn start<E>(
        &mut self,
        timing: HeartbeatTiming,
        location: watch::Receiver<Option<GeoPoint>>,
        events: mpsc::UnboundedSender<E>,
        metrics: Metrics,
    ) where
        E: From<HeartbeatTick> + Send + 'static,
    {
        self.stop();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + timing.interval, timing.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match wait_for_location(&location, timing.location_wait, timing.location_poll).await {
                    Some(_) => {
                        if events.send(HeartbeatTick.into()).is_err() {
                            break;
                        }
                    }
                    None => {
                        warn!(
                            wait_secs = timing.location_wait.as_secs_f64(),
                            "no location fix available; skipping heartbeat"
                        );
                        metrics.heartbeats_total.with_label_values(&["skipped"]).inc();
                    }
                }
            }
        }));
        debug!(interval_secs = timing.interval.as_secs_f64(), "heartbeat started");
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("heartbeat stopped");
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}
