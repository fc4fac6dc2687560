#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use driver_tracker::engine::tracker::{
    spawn_tracker, TrackerDeps, TrackerHandle, TrackerSettings,
};
use driver_tracker::geolocation::push::PushLocationProvider;
use driver_tracker::models::driver::Driver;
use driver_tracker::observability::metrics::Metrics;
use driver_tracker::platform::{
    ForegroundNotice, ForegroundService, LocalNotification, NotificationChannel, Notifier,
    PlatformError,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

pub const WAIT: Duration = Duration::from_secs(5);

/// Polls `check` until it holds, failing the test after `WAIT`.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let result = time::timeout(WAIT, async {
        while !check() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

pub async fn within<T>(what: &str, future: impl Future<Output = T>) -> T {
    match time::timeout(WAIT, future).await {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

#[derive(Default)]
pub struct RecordingPlatform {
    pub notifications: Mutex<Vec<LocalNotification>>,
    pub channels: Mutex<Vec<NotificationChannel>>,
    pub foreground_starts: AtomicUsize,
    pub foreground_stops: AtomicUsize,
    pub fail_foreground: bool,
}

impl RecordingPlatform {
    pub fn notification_titles(&self) -> Vec<String> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .map(|notification| notification.title.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingPlatform {
    async fn request_permission(&self) -> Result<bool, PlatformError> {
        Ok(true)
    }

    async fn ensure_channel(&self, channel: &NotificationChannel) -> Result<(), PlatformError> {
        self.channels.lock().unwrap().push(channel.clone());
        Ok(())
    }

    async fn show(&self, notification: LocalNotification) -> Result<(), PlatformError> {
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }
}

#[async_trait]
impl ForegroundService for RecordingPlatform {
    async fn start(&self, _notice: &ForegroundNotice) -> Result<(), PlatformError> {
        self.foreground_starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_foreground {
            return Err(PlatformError::Unavailable("no foreground service".to_string()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), PlatformError> {
        self.foreground_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

enum Push {
    Text(String),
    Close,
}

#[derive(Default)]
struct Hub {
    current: Mutex<Option<mpsc::UnboundedSender<Push>>>,
    connections: AtomicUsize,
    authorizations: Mutex<Vec<Option<String>>>,
    close_codes: Mutex<Vec<Option<u16>>>,
    received: Mutex<Option<mpsc::UnboundedSender<Value>>>,
}

/// In-process dispatch server. Records every JSON message the client sends
/// and can push messages to, or drop, the most recent connection.
pub struct FakeDispatch {
    pub url: String,
    hub: Arc<Hub>,
    received: mpsc::UnboundedReceiver<Value>,
    _server: JoinHandle<()>,
}

impl FakeDispatch {
    pub async fn start() -> Self {
        let (received_tx, received) = mpsc::unbounded_channel();
        let hub = Arc::new(Hub::default());
        *hub.received.lock().unwrap() = Some(received_tx);

        let app = Router::new()
            .route("/", get(upgrade))
            .with_state(hub.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("ws://{addr}/"),
            hub,
            received,
            _server: server,
        }
    }

    pub fn connections(&self) -> usize {
        self.hub.connections.load(Ordering::SeqCst)
    }

    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.hub.authorizations.lock().unwrap().clone()
    }

    /// Close codes received from the client, `None` for a frame without one.
    pub fn close_codes(&self) -> Vec<Option<u16>> {
        self.hub.close_codes.lock().unwrap().clone()
    }

    pub fn push(&self, message: Value) {
        self.send(Push::Text(message.to_string()));
    }

    pub fn drop_connection(&self) {
        self.send(Push::Close);
    }

    fn send(&self, push: Push) {
        let current = self.hub.current.lock().unwrap();
        let sender = current.as_ref().expect("no client connected");
        sender.send(push).expect("client connection already gone");
    }

    pub async fn next_message(&mut self) -> Value {
        within("a dispatch message", self.received.recv())
            .await
            .expect("dispatch server stopped")
    }

    /// Skips messages of other types, e.g. interleaved location updates.
    pub async fn next_of_type(&mut self, kind: &str) -> Value {
        loop {
            let message = self.next_message().await;
            if message["type"] == kind {
                return message;
            }
        }
    }

    /// Everything received during `window`.
    pub async fn collect_for(&mut self, window: Duration) -> Vec<Value> {
        let mut messages = Vec::new();
        let deadline = time::Instant::now() + window;
        while let Ok(Some(message)) = time::timeout_at(deadline, self.received.recv()).await {
            messages.push(message);
        }
        messages
    }
}

async fn upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(hub): State<Arc<Hub>>,
) -> impl IntoResponse {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    hub.authorizations.lock().unwrap().push(authorization);

    ws.on_upgrade(move |socket| serve_client(socket, hub))
}

async fn serve_client(socket: WebSocket, hub: Arc<Hub>) {
    let (pushes_tx, mut pushes) = mpsc::unbounded_channel();
    *hub.current.lock().unwrap() = Some(pushes_tx);
    hub.connections.fetch_add(1, Ordering::SeqCst);

    let received = hub.received.lock().unwrap().clone();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let (Some(received), Ok(value)) = (&received, serde_json::from_str(&text)) {
                        let _ = received.send(value);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    record_close(&hub, frame);
                    break;
                }
                Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            push = pushes.recv() => match push {
                Some(Push::Text(text)) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Push::Close) | None => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: 1011,
                            reason: "server going away".into(),
                        })))
                        .await;
                    let reply = time::timeout(WAIT, async {
                        while let Some(Ok(message)) = stream.next().await {
                            if let Message::Close(frame) = message {
                                return Some(frame);
                            }
                        }
                        None
                    })
                    .await;
                    if let Ok(Some(frame)) = reply {
                        record_close(&hub, frame);
                    }
                    break;
                }
            },
        }
    }
}

fn record_close(hub: &Hub, frame: Option<CloseFrame<'static>>) {
    hub.close_codes
        .lock()
        .unwrap()
        .push(frame.map(|frame| frame.code));
}

pub fn fast_settings(url: &str) -> TrackerSettings {
    TrackerSettings {
        heartbeat_interval: Duration::from_millis(300),
        reconnect_delay: Duration::from_millis(200),
        location_wait: Duration::from_millis(100),
        location_poll: Duration::from_millis(10),
        ..TrackerSettings::new(url)
    }
}

pub struct Harness {
    pub tracker: TrackerHandle,
    pub task: JoinHandle<()>,
    pub platform: Arc<RecordingPlatform>,
    pub locations: Arc<PushLocationProvider>,
    pub metrics: Metrics,
}

pub fn spawn_with(settings: TrackerSettings, platform: RecordingPlatform) -> Harness {
    let platform = Arc::new(platform);
    let locations = Arc::new(PushLocationProvider::new(64));
    let metrics = Metrics::new();

    let deps = TrackerDeps {
        notifier: platform.clone(),
        foreground: platform.clone(),
        locations: locations.clone(),
        metrics: metrics.clone(),
    };

    let (tracker, task) = spawn_tracker(Driver::with_id(7), settings, deps);

    Harness {
        tracker,
        task,
        platform,
        locations,
        metrics,
    }
}

pub fn spawn(settings: TrackerSettings) -> Harness {
    spawn_with(settings, RecordingPlatform::default())
}
