//! Driver tracker: the state machine that ties the dispatch connection,
//! geolocation watcher, heartbeat and order manifest together.
//!
//! All state lives on one task. Commands from [`TrackerHandle`]s and internal
//! events (transport, location, timers) are handled one at a time, so nothing
//! here needs a lock. Outbound dispatch messages are at-most-once: a send
//! while disconnected is dropped and the next heartbeat carries the current
//! location and manifest instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dispatch::connection::{DispatchConnection, LinkEvent, LinkState};
use crate::dispatch::protocol::{InboundMessage, OutboundMessage};
use crate::engine::heartbeat::{Heartbeat, HeartbeatTick, HeartbeatTiming};
use crate::error::AppError;
use crate::geolocation::{GeolocationWatcher, LocationProvider, LocationReading, WatchOptions};
use crate::manifest::{ManifestError, ManifestNotice, OrderManifest, OrderSnapshot};
use crate::models::driver::{Driver, DriverStatus};
use crate::models::location::GeoPoint;
use crate::models::order::{Order, OrderId, StatusKind};
use crate::observability::metrics::Metrics;
use crate::platform::{
    notify_detached, ForegroundNotice, ForegroundService, LocalNotification, NotificationChannel,
    Notifier,
};

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub dispatch_url: String,
    /// Sent as a bearer credential on the dispatch handshake when set.
    pub handshake_token: Option<String>,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub location_wait: Duration,
    pub location_poll: Duration,
    pub distance_filter_m: f64,
    pub event_buffer_size: usize,
}

impl TrackerSettings {
    pub fn new(dispatch_url: impl Into<String>) -> Self {
        Self {
            dispatch_url: dispatch_url.into(),
            handshake_token: None,
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            location_wait: Duration::from_secs(10),
            location_poll: Duration::from_millis(500),
            distance_filter_m: 40.0,
            event_buffer_size: 256,
        }
    }

    fn heartbeat_timing(&self) -> HeartbeatTiming {
        HeartbeatTiming {
            interval: self.heartbeat_interval,
            location_wait: self.location_wait,
            location_poll: self.location_poll,
        }
    }
}

/// Platform collaborators, chosen once per session.
#[derive(Clone)]
pub struct TrackerDeps {
    pub notifier: Arc<dyn Notifier>,
    pub foreground: Arc<dyn ForegroundService>,
    pub locations: Arc<dyn LocationProvider>,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerPhase {
    Offline,
    Connecting,
    OnlineConnected,
    OnlineDisconnected,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatus {
    pub session_id: Uuid,
    pub phase: TrackerPhase,
    pub online: bool,
    pub connected: bool,
    pub driver: Driver,
    pub last_location: Option<GeoPoint>,
    pub orders: usize,
    pub heartbeat_active: bool,
    pub watcher_active: bool,
    pub reconnect_pending: bool,
}

enum Command {
    GoOnline(oneshot::Sender<()>),
    GoOffline(oneshot::Sender<()>),
    ChangeCity {
        city: String,
        reply: oneshot::Sender<()>,
    },
    UpdateOrderStatus {
        order_id: OrderId,
        status: String,
        reply: oneshot::Sender<Result<(), ManifestError>>,
    },
    RemoveOrder {
        order_id: OrderId,
        reply: oneshot::Sender<Result<(), ManifestError>>,
    },
}

#[derive(Debug)]
enum TrackerEvent {
    Link(LinkEvent),
    Location(LocationReading),
    Heartbeat,
    ReconnectDue { ticket: u64 },
}

impl From<LinkEvent> for TrackerEvent {
    fn from(event: LinkEvent) -> Self {
        TrackerEvent::Link(event)
    }
}

impl From<LocationReading> for TrackerEvent {
    fn from(reading: LocationReading) -> Self {
        TrackerEvent::Location(reading)
    }
}

impl From<HeartbeatTick> for TrackerEvent {
    fn from(_: HeartbeatTick) -> Self {
        TrackerEvent::Heartbeat
    }
}

#[derive(Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<TrackerStatus>,
    orders: watch::Receiver<OrderSnapshot>,
    notices: broadcast::Sender<ManifestNotice>,
    metrics: Metrics,
}

impl TrackerHandle {
    /// Resolves once the startup sequence has run.
    pub async fn go_online(&self) -> Result<(), AppError> {
        self.request(Command::GoOnline).await
    }

    pub async fn go_offline(&self) -> Result<(), AppError> {
        self.request(Command::GoOffline).await
    }

    /// Fire-and-forget: the local profile changes even if the server never
    /// hears about it.
    pub async fn change_city(&self, city: impl Into<String>) -> Result<(), AppError> {
        let city = city.into();
        self.request(|reply| Command::ChangeCity { city, reply }).await
    }

    pub async fn update_order_status(
        &self,
        order_id: OrderId,
        status: impl Into<String>,
    ) -> Result<(), AppError> {
        let status = status.into();
        self.request(|reply| Command::UpdateOrderStatus {
            order_id,
            status,
            reply,
        })
        .await??;
        Ok(())
    }

    pub async fn remove_order(&self, order_id: OrderId) -> Result<(), AppError> {
        self.request(|reply| Command::RemoveOrder { order_id, reply })
            .await??;
        Ok(())
    }

    pub fn status(&self) -> TrackerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TrackerStatus> {
        self.status.clone()
    }

    pub fn orders(&self) -> OrderSnapshot {
        self.orders.borrow().clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<ManifestNotice> {
        self.notices.subscribe()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AppError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| AppError::TrackerStopped)?;
        response.await.map_err(|_| AppError::TrackerStopped)
    }
}

/// Starts the tracker task for one driver session. The task goes offline and
/// exits once every handle is dropped.
pub fn spawn_tracker(
    driver: Driver,
    settings: TrackerSettings,
    deps: TrackerDeps,
) -> (TrackerHandle, JoinHandle<()>) {
    let driver_id = driver.driver_id;
    let (tracker, handle, commands_rx, events_rx) = build_tracker(driver, settings, deps);
    let span = info_span!("tracker", session_id = %tracker.session_id, driver_id);

    let task = tokio::spawn(tracker.run(commands_rx, events_rx).instrument(span));
    (handle, task)
}

fn build_tracker(
    driver: Driver,
    settings: TrackerSettings,
    deps: TrackerDeps,
) -> (
    Tracker,
    TrackerHandle,
    mpsc::Receiver<Command>,
    mpsc::UnboundedReceiver<TrackerEvent>,
) {
    let session_id = Uuid::new_v4();
    let (commands_tx, commands_rx) = mpsc::channel(settings.event_buffer_size.max(1));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (location_tx, _unused_rx) = watch::channel(None);

    let manifest = OrderManifest::new(settings.event_buffer_size);
    let link = DispatchConnection::new(
        settings.dispatch_url.clone(),
        settings.handshake_token.clone(),
        deps.metrics.clone(),
    );
    let watcher = GeolocationWatcher::new(
        deps.locations.clone(),
        WatchOptions {
            distance_filter_m: settings.distance_filter_m,
            ..WatchOptions::default()
        },
    );

    let (status_tx, status_rx) = watch::channel(TrackerStatus {
        session_id,
        phase: TrackerPhase::Offline,
        online: false,
        connected: false,
        driver: driver.clone(),
        last_location: None,
        orders: 0,
        heartbeat_active: false,
        watcher_active: false,
        reconnect_pending: false,
    });

    let handle = TrackerHandle {
        commands: commands_tx,
        status: status_rx,
        orders: manifest.subscribe_snapshots(),
        notices: manifest.notice_sender(),
        metrics: deps.metrics.clone(),
    };

    let tracker = Tracker {
        session_id,
        settings,
        deps,
        driver,
        online: false,
        phase: TrackerPhase::Offline,
        link,
        watcher,
        heartbeat: Heartbeat::new(),
        reconnect: None,
        reconnect_tickets: 0,
        manifest,
        last_location: None,
        location_tx,
        status_tx,
        events_tx,
    };

    (tracker, handle, commands_rx, events_rx)
}

struct Tracker {
    session_id: Uuid,
    settings: TrackerSettings,
    deps: TrackerDeps,
    driver: Driver,
    /// Driver intent; the transport may lag behind it.
    online: bool,
    phase: TrackerPhase,
    link: DispatchConnection,
    watcher: GeolocationWatcher,
    heartbeat: Heartbeat,
    reconnect: Option<(u64, JoinHandle<()>)>,
    reconnect_tickets: u64,
    manifest: OrderManifest,
    last_location: Option<GeoPoint>,
    location_tx: watch::Sender<Option<GeoPoint>>,
    status_tx: watch::Sender<TrackerStatus>,
    events_tx: mpsc::UnboundedSender<TrackerEvent>,
}

impl Tracker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<TrackerEvent>,
    ) {
        info!("driver tracker started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = events.recv() => {
                    self.handle_event(event);
                    self.publish_status();
                }
            }
        }

        self.go_offline().await;
        self.publish_status();
        info!("driver tracker stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::GoOnline(reply) => {
                self.go_online().await;
                self.respond(reply, ());
            }
            Command::GoOffline(reply) => {
                self.go_offline().await;
                self.respond(reply, ());
            }
            Command::ChangeCity { city, reply } => {
                self.change_city(city);
                self.respond(reply, ());
            }
            Command::UpdateOrderStatus {
                order_id,
                status,
                reply,
            } => {
                let result = self.manifest.update_status(order_id, &status);
                self.respond(reply, result);
            }
            Command::RemoveOrder { order_id, reply } => {
                let result = self.manifest.remove(order_id);
                self.respond(reply, result);
            }
        }
    }

    /// Callers observe the post-command status as soon as they get a reply.
    fn respond<T>(&self, reply: oneshot::Sender<T>, value: T) {
        self.publish_status();
        let _ = reply.send(value);
    }

    fn handle_event(&mut self, event: TrackerEvent) {
        match event {
            TrackerEvent::Link(event) => self.on_link_event(event),
            TrackerEvent::Location(reading) => self.on_location(reading),
            TrackerEvent::Heartbeat => self.on_heartbeat(),
            TrackerEvent::ReconnectDue { ticket } => self.on_reconnect_due(ticket),
        }
    }

    /// Best-effort startup: every step runs even if an earlier one failed.
    async fn go_online(&mut self) {
        if self.online {
            debug!(phase = ?self.phase, "already online");
            return;
        }

        info!("going online");
        self.online = true;
        self.phase = TrackerPhase::Connecting;

        match self.deps.notifier.request_permission().await {
            Ok(true) => {}
            Ok(false) => warn!("notification permission denied"),
            Err(err) => warn!(error = %err, "notification permission request failed"),
        }

        if let Err(err) = self
            .deps
            .notifier
            .ensure_channel(&NotificationChannel::orders())
            .await
        {
            warn!(error = %err, "failed to create notification channel");
        }

        if let Err(err) = self
            .deps
            .foreground
            .start(&ForegroundNotice::driver_online())
            .await
        {
            warn!(error = %err, "failed to start foreground indicator");
        }

        if let Err(err) = self.watcher.start(self.events_tx.clone()).await {
            warn!(error = %err, "failed to start geolocation watcher");
        }

        self.link.connect(self.events_tx.clone());
    }

    async fn go_offline(&mut self) {
        if !self.online {
            debug!("already offline");
            return;
        }

        info!("going offline");
        self.online = false;
        self.phase = TrackerPhase::Offline;

        self.heartbeat.stop();
        self.cancel_reconnect();
        self.link.close();
        self.watcher.stop();

        if let Err(err) = self.deps.foreground.stop().await {
            warn!(error = %err, "failed to stop foreground indicator");
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened { generation } => {
                if !self.link.on_open(generation) {
                    debug!(generation, "ignoring open from a superseded connection");
                    return;
                }

                info!(generation, "dispatch connected");
                self.phase = TrackerPhase::OnlineConnected;
                self.send_driver_init();
                self.heartbeat.start(
                    self.settings.heartbeat_timing(),
                    self.location_tx.subscribe(),
                    self.events_tx.clone(),
                    self.deps.metrics.clone(),
                );
            }
            LinkEvent::Received { generation, text } => {
                if self.link.accepts(generation) {
                    self.on_dispatch_text(&text);
                }
            }
            LinkEvent::Failed { generation, error } => {
                if generation == self.link.generation() {
                    warn!(generation, error = %error, "dispatch connection error");
                    self.heartbeat.stop();
                }
            }
            LinkEvent::Closed { generation, code } => {
                if !self.link.on_closed(generation) {
                    return;
                }

                self.heartbeat.stop();
                if self.online {
                    warn!(generation, ?code, "dispatch connection lost");
                    self.phase = TrackerPhase::OnlineDisconnected;
                    self.schedule_reconnect();
                } else {
                    info!(generation, ?code, "dispatch connection closed");
                }
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if !self.online || self.reconnect.is_some() || self.link.state() != LinkState::Closed {
            debug!("reconnect not scheduled");
            return;
        }

        self.reconnect_tickets += 1;
        let ticket = self.reconnect_tickets;
        let delay = self.settings.reconnect_delay;
        let events = self.events_tx.clone();

        let timer = tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = events.send(TrackerEvent::ReconnectDue { ticket });
        });
        self.reconnect = Some((ticket, timer));
        info!(delay_secs = delay.as_secs_f64(), "reconnect scheduled");
    }

    fn on_reconnect_due(&mut self, ticket: u64) {
        match &self.reconnect {
            Some((pending, _)) if *pending == ticket => self.reconnect = None,
            _ => return,
        }

        if !self.online || self.link.state() != LinkState::Closed {
            return;
        }

        self.deps.metrics.reconnects_total.inc();
        info!("reconnecting to dispatch server");
        self.link.connect(self.events_tx.clone());
    }

    fn cancel_reconnect(&mut self) {
        if let Some((_, timer)) = self.reconnect.take() {
            timer.abort();
        }
    }

    fn on_location(&mut self, reading: LocationReading) {
        match reading {
            LocationReading::Fix(fix) => {
                let point = fix.point();
                self.last_location = Some(point);
                self.location_tx.send_replace(Some(point));
                debug!(lat = point.lat, lng = point.lng, "location updated");

                if self.link.is_open() {
                    self.link.send(&self.location_update(point));
                }
            }
            LocationReading::Failed(err) => {
                warn!(error = %err, "geolocation error");
            }
        }
    }

    fn on_heartbeat(&mut self) {
        let Some(point) = self.last_location else {
            warn!("heartbeat due without a location fix; skipping");
            self.deps
                .metrics
                .heartbeats_total
                .with_label_values(&["skipped"])
                .inc();
            return;
        };

        if !self.link.is_open() {
            return;
        }

        if self.link.send(&self.location_update(point)) {
            self.deps
                .metrics
                .heartbeats_total
                .with_label_values(&["sent"])
                .inc();
        }
    }

    fn on_dispatch_text(&mut self, text: &str) {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "dropping malformed dispatch message");
                return;
            }
        };

        self.deps
            .metrics
            .messages_received_total
            .with_label_values(&[message.kind()])
            .inc();

        match message {
            InboundMessage::NewOrderNearby { order } => self.on_new_order(order),
            InboundMessage::UpdatedOrder { order } => {
                if let Err(err) = self.manifest.update(&order) {
                    warn!(error = %err, "order update not applied");
                }
            }
            InboundMessage::OrderStatusUpdated {
                order_id,
                order_status,
            } => self.on_order_status(order_id, &order_status),
            InboundMessage::Unknown => debug!("ignoring unrecognized dispatch message"),
        }
    }

    fn on_new_order(&mut self, order: Order) {
        let order_id = order.order_id;
        let restaurant_id = order.restaurant_id;
        info!(order_id, ?restaurant_id, "new order nearby");

        notify_detached(self.deps.notifier.clone(), LocalNotification::new_order(&order));

        self.link.send(&OutboundMessage::UpdateOrders {
            driver_id: self.driver.driver_id,
            order_id,
            driver_stationed_at: restaurant_id,
            driver_status: DriverStatus::PickingUp,
        });

        self.manifest.add(order);
        self.driver.stationed_at = restaurant_id;
        self.driver.driver_status = DriverStatus::PickingUp;
    }

    fn on_order_status(&mut self, order_id: OrderId, status: &str) {
        match StatusKind::of(status) {
            StatusKind::Delivered => {
                if let Err(err) = self.manifest.remove(order_id) {
                    warn!(order_id, error = %err, "delivered order was not in the manifest");
                }

                let station = self.manifest.station();
                self.driver.stationed_at = station;
                self.driver.driver_status = DriverStatus::Ready;
                info!(order_id, next_station = ?station, "order delivered; freeing driver");

                self.link.send(&OutboundMessage::FreeDriver {
                    driver_id: self.driver.driver_id,
                    driver_stationed_at: station,
                    driver_orders: self.manifest.order_ids(),
                    driver_status: DriverStatus::Ready,
                });
            }
            kind => {
                if kind == StatusKind::Ready {
                    notify_detached(
                        self.deps.notifier.clone(),
                        LocalNotification::order_updated(order_id),
                    );
                }

                if let Err(err) = self.manifest.update_status(order_id, status) {
                    warn!(order_id, error = %err, "status update not applied");
                }
            }
        }
    }

    fn change_city(&mut self, city: String) {
        info!(city = %city, "changing city");
        self.link.send(&OutboundMessage::ChangeCity {
            driver_id: self.driver.driver_id,
            driver_city: city.clone(),
        });
        self.driver.driver_city = city;
    }

    fn send_driver_init(&self) {
        self.link.send(&OutboundMessage::DriverInit {
            driver_id: self.driver.driver_id,
            driver_status: DriverStatus::Ready,
            driver_stationed_at: self.manifest.station(),
            driver_orders: self.manifest.order_ids(),
            location: self.last_location,
        });
    }

    fn location_update(&self, location: GeoPoint) -> OutboundMessage {
        OutboundMessage::LocationUpdate {
            driver_id: self.driver.driver_id,
            location,
            driver_stationed_at: self.manifest.station(),
            driver_orders: self.manifest.order_ids(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    fn publish_status(&self) {
        self.deps
            .metrics
            .manifest_orders
            .set(self.manifest.len() as i64);

        self.status_tx.send_replace(TrackerStatus {
            session_id: self.session_id,
            phase: self.phase,
            online: self.online,
            connected: self.link.is_open(),
            driver: self.driver.clone(),
            last_location: self.last_location,
            orders: self.manifest.len(),
            heartbeat_active: self.heartbeat.is_active(),
            watcher_active: self.watcher.is_active(),
            reconnect_pending: self.reconnect.is_some(),
        });
    }
}
