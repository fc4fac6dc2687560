use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, InvalidHeaderValue};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::dispatch::protocol::OutboundMessage;
use crate::observability::metrics::Metrics;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Identifies one transport instance; bumped on every `connect`.
pub type Generation = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened {
        generation: Generation,
    },
    Received {
        generation: Generation,
        text: String,
    },
    /// Always followed by `Closed` for the same generation.
    Failed {
        generation: Generation,
        error: String,
    },
    Closed {
        generation: Generation,
        code: Option<u16>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Closed,
    Connecting,
    Open,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("invalid dispatch url: {0}")]
    Url(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid bearer token: {0}")]
    Token(#[from] InvalidHeaderValue),
}

/// One duplex connection to the dispatch server. The owner feeds the
/// `LinkEvent`s it receives back through `on_open` / `on_closed` so that the
/// state here only changes on the owner's task.
pub struct DispatchConnection {
    url: String,
    bearer_token: Option<String>,
    generation: Generation,
    state: LinkState,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    metrics: Metrics,
}

impl DispatchConnection {
    pub fn new(url: impl Into<String>, bearer_token: Option<String>, metrics: Metrics) -> Self {
        Self {
            url: url.into(),
            bearer_token,
            generation: 0,
            state: LinkState::Closed,
            outbound: None,
            metrics,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// True when `generation` is the live, open transport.
    pub fn accepts(&self, generation: Generation) -> bool {
        generation == self.generation && self.state == LinkState::Open
    }

    /// Opens a new transport unless one is already connecting or open.
    pub fn connect<E>(&mut self, events: mpsc::UnboundedSender<E>)
    where
        E: From<LinkEvent> + Send + 'static,
    {
        if self.state != LinkState::Closed {
            debug!(state = ?self.state, "connect ignored: transport already active");
            return;
        }

        self.generation += 1;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.outbound = Some(outbound_tx);
        self.state = LinkState::Connecting;

        info!(generation = self.generation, url = %self.url, "connecting to dispatch server");
        tokio::spawn(run_link(
            self.generation,
            self.url.clone(),
            self.bearer_token.clone(),
            outbound_rx,
            events,
        ));
    }

    pub fn on_open(&mut self, generation: Generation) -> bool {
        if generation != self.generation || self.state != LinkState::Connecting {
            return false;
        }
        self.state = LinkState::Open;
        true
    }

    pub fn on_closed(&mut self, generation: Generation) -> bool {
        if generation != self.generation {
            return false;
        }
        self.state = LinkState::Closed;
        self.outbound = None;
        true
    }

    /// Queues `message` while open. Anything sent otherwise is dropped; there
    /// is no retry and no acknowledgement.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        let kind = message.kind();

        let outbound = match (&self.outbound, self.state) {
            (Some(outbound), LinkState::Open) => outbound,
            _ => {
                debug!(message_type = kind, state = ?self.state, "dispatch not open; dropping message");
                self.metrics
                    .messages_dropped_total
                    .with_label_values(&[kind])
                    .inc();
                return false;
            }
        };

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                warn!(message_type = kind, error = %err, "failed to serialize dispatch message");
                return false;
            }
        };

        if outbound.send(Message::Text(text.into())).is_err() {
            self.metrics
                .messages_dropped_total
                .with_label_values(&[kind])
                .inc();
            return false;
        }

        self.metrics
            .messages_sent_total
            .with_label_values(&[kind])
            .inc();
        true
    }

    /// Intentional close: the writer sends a normal-closure frame. The
    /// transport still reports `Closed` for this generation afterwards.
    pub fn close(&mut self) {
        if self.outbound.take().is_some() {
            info!(generation = self.generation, "closing dispatch connection");
        }
        self.state = LinkState::Closed;
    }
}

fn build_request(url: &str, bearer_token: Option<&str>) -> Result<Request, HandshakeError> {
    let mut request = url.into_client_request()?;
    if let Some(token) = bearer_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

async fn run_link<E>(
    generation: Generation,
    url: String,
    bearer_token: Option<String>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<E>,
) where
    E: From<LinkEvent> + Send + 'static,
{
    let emit = |event: LinkEvent| {
        let _ = events.send(event.into());
    };

    let stream = match build_request(&url, bearer_token.as_deref()) {
        Ok(request) => tokio_tungstenite::connect_async(request).await.map_err(|err| err.to_string()),
        Err(err) => Err(err.to_string()),
    };

    let stream = match stream {
        Ok((stream, _response)) => stream,
        Err(error) => {
            emit(LinkEvent::Failed { generation, error });
            emit(LinkEvent::Closed {
                generation,
                code: None,
            });
            return;
        }
    };

    emit(LinkEvent::Opened { generation });

    let (mut write, mut read) = stream.split();

    let code = loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(message) => {
                    if let Err(err) = write.send(message).await {
                        emit(LinkEvent::Failed { generation, error: err.to_string() });
                        break None;
                    }
                }
                None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "driver offline".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    let _ = time::timeout(CLOSE_GRACE, async {
                        while let Some(Ok(_)) = read.next().await {}
                    })
                    .await;
                    break Some(u16::from(CloseCode::Normal));
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    emit(LinkEvent::Received { generation, text: text.to_string() });
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|frame| u16::from(frame.code));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    emit(LinkEvent::Failed { generation, error: err.to_string() });
                    break None;
                }
                None => break None,
            },
        }
    };

    // Flushes a close reply tungstenite queued for a server-initiated close.
    let _ = time::timeout(CLOSE_GRACE, write.close()).await;

    // Dropping both halves tears the socket down before the owner hears about it.
    drop(write);
    drop(read);
    emit(LinkEvent::Closed { generation, code });
}
