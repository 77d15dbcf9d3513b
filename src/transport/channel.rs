use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, Stream, StreamExt};
use reqwest::Url;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::config::SocketConfig;
use crate::error::{ClientError, Result};
use crate::metrics::TransportMetrics;

use super::backoff::{BackoffConfig, ExponentialBackoff};
use super::codec::{EnginePacket, SocketPacket, SocketPacketKind};

/// Outbound event binding the connection to a user
pub const IDENTIFY_EVENT: &str = "identify";

/// Metric label for events without a registered handler
const UNHANDLED_EVENT_LABEL: &str = "other";

/// Callback invoked for each inbound event of a given name
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Disconnected,
    /// Stopped for good (shutdown or reconnection gave up)
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Disconnected => "disconnected",
            ChannelState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Connection state plus the number of successful connections so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ChannelState,
    /// Incremented on every established namespace connection
    pub epoch: u64,
}

enum SessionEnd {
    Shutdown,
    Disconnected(&'static str),
}

/// Long-lived connection to the notification namespace
pub struct TransportChannel {
    config: SocketConfig,
    handlers: DashMap<String, Vec<EventHandler>>,
    identity: watch::Sender<Option<i64>>,
    status: watch::Sender<ChannelStatus>,
    shutdown: broadcast::Sender<()>,
}

impl TransportChannel {
    pub fn new(config: SocketConfig) -> Self {
        let (identity, _) = watch::channel(config.identify_user_id);
        let (status, _) = watch::channel(ChannelStatus {
            state: ChannelState::Disconnected,
            epoch: 0,
        });
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            handlers: DashMap::new(),
            identity,
            status,
            shutdown,
        }
    }

    /// Register a handler for an inbound event; handlers run in arrival order
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Bind the connection to a user; re-sent after every reconnect
    pub fn identify(&self, user_id: i64) {
        self.identity.send_replace(Some(user_id));
    }

    pub fn identity(&self) -> Option<i64> {
        *self.identity.borrow()
    }

    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    /// Spawn the connection task
    pub fn connect(self: &Arc<Self>) -> JoinHandle<()> {
        let shutdown_rx = self.shutdown.subscribe();
        let channel = Arc::clone(self);
        tokio::spawn(async move { channel.run(shutdown_rx).await })
    }

    /// Close the socket and stop reconnecting
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
        self.set_state(ChannelState::Closed);
    }

    /// WebSocket URL of the Engine.IO endpoint
    pub fn endpoint_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| ClientError::Validation(format!("invalid socket.url: {}", e)))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ClientError::Validation(format!(
                    "unsupported socket.url scheme: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Validation("cannot set websocket scheme".to_string()))?;
        url.set_path(&self.config.path);
        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", "4")
            .append_pair("transport", "websocket");
        Ok(url)
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.current_status().state == ChannelState::Closed {
            return;
        }

        let mut backoff = ExponentialBackoff::new(BackoffConfig::from(&self.config));

        loop {
            self.set_state(ChannelState::Connecting);

            match self.run_session(&mut shutdown_rx, &mut backoff).await {
                Ok(SessionEnd::Shutdown) => {
                    tracing::info!(namespace = %self.config.namespace, "Socket closed by client");
                    break;
                }
                Ok(SessionEnd::Disconnected(reason)) => {
                    tracing::warn!(namespace = %self.config.namespace, reason, "Socket disconnected");
                }
                Err(e) => {
                    tracing::warn!(namespace = %self.config.namespace, error = %e, "Socket connection failed");
                }
            }

            TransportMetrics::set_connected(false);
            self.set_state(ChannelState::Disconnected);

            if !self.config.reconnect_enabled {
                tracing::info!("Reconnection disabled, socket stays closed");
                break;
            }

            let Some(delay) = backoff.next_delay() else {
                tracing::error!(
                    attempts = backoff.attempt(),
                    "Giving up on socket reconnection"
                );
                break;
            };

            TransportMetrics::record_reconnect();
            tracing::info!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting socket"
            );

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        TransportMetrics::set_connected(false);
        self.set_state(ChannelState::Closed);
    }

    #[tracing::instrument(name = "transport.session", skip_all, fields(namespace = %self.config.namespace))]
    async fn run_session(
        &self,
        shutdown_rx: &mut broadcast::Receiver<()>,
        backoff: &mut ExponentialBackoff,
    ) -> Result<SessionEnd> {
        let url = self.endpoint_url()?;
        let namespace = self.config.namespace.as_str();
        let handshake_timeout = Duration::from_secs(self.config.connect_timeout_secs);

        let (ws, _) = timeout(handshake_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ClientError::Protocol("socket connect timed out".to_string()))??;
        let (mut sink, mut stream) = ws.split();

        let handshake = async {
            let open = match next_packet(&mut stream).await? {
                EnginePacket::Open(open) => open,
                other => {
                    return Err(ClientError::Protocol(format!(
                        "expected open packet, got {:?}",
                        other
                    )))
                }
            };

            sink.send(frame(&EnginePacket::Message(SocketPacket::connect(namespace, None))))
                .await?;

            loop {
                match next_packet(&mut stream).await? {
                    EnginePacket::Ping(data) => sink.send(frame(&EnginePacket::Pong(data))).await?,
                    EnginePacket::Close => {
                        return Err(ClientError::Protocol(
                            "socket closed during handshake".to_string(),
                        ))
                    }
                    EnginePacket::Message(packet) if packet.namespace == namespace => {
                        match packet.kind {
                            SocketPacketKind::Connect => break,
                            SocketPacketKind::ConnectError => {
                                return Err(ClientError::Protocol(format!(
                                    "namespace connect refused: {}",
                                    packet.error_message().unwrap_or_default()
                                )))
                            }
                            _ => {}
                        }
                    }
                    _ => {}
                }
            }

            Ok::<_, ClientError>(open)
        };

        let open = timeout(handshake_timeout, handshake)
            .await
            .map_err(|_| ClientError::Protocol("socket handshake timed out".to_string()))??;

        backoff.reset();
        TransportMetrics::set_connected(true);
        self.status.send_if_modified(|status| {
            if status.state == ChannelState::Closed {
                return false;
            }
            status.state = ChannelState::Connected;
            status.epoch += 1;
            true
        });
        tracing::info!(
            sid = %open.sid,
            epoch = self.current_status().epoch,
            ping_interval_ms = open.ping_interval,
            "Socket connected"
        );

        let mut identity_rx = self.identity.subscribe();
        let identity = *identity_rx.borrow_and_update();
        if let Some(user_id) = identity {
            sink.send(identify_frame(namespace, user_id)).await?;
            tracing::debug!(user_id, "Identity sent");
        }

        // The server pings every interval; silence beyond interval + timeout means a dead link
        let idle = Duration::from_millis(open.ping_interval + open.ping_timeout);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    let _ = sink
                        .send(frame(&EnginePacket::Message(SocketPacket::disconnect(namespace))))
                        .await;
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
                changed = identity_rx.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    let identity = *identity_rx.borrow_and_update();
                    if let Some(user_id) = identity {
                        sink.send(identify_frame(namespace, user_id)).await?;
                        tracing::debug!(user_id, "Identity sent");
                    }
                }
                next = timeout(idle, next_packet(&mut stream)) => {
                    let packet = match next {
                        Ok(packet) => packet?,
                        Err(_) => return Ok(SessionEnd::Disconnected("ping timeout")),
                    };

                    match packet {
                        EnginePacket::Ping(data) => {
                            sink.send(frame(&EnginePacket::Pong(data))).await?;
                        }
                        EnginePacket::Close => return Ok(SessionEnd::Disconnected("transport closed")),
                        EnginePacket::Message(packet) if packet.namespace == namespace => {
                            match packet.kind {
                                SocketPacketKind::Event => self.dispatch(&packet),
                                SocketPacketKind::Disconnect => {
                                    return Ok(SessionEnd::Disconnected("namespace disconnected by server"))
                                }
                                SocketPacketKind::ConnectError => {
                                    return Err(ClientError::Protocol(format!(
                                        "namespace error: {}",
                                        packet.error_message().unwrap_or_default()
                                    )))
                                }
                                SocketPacketKind::Connect | SocketPacketKind::Ack => {}
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Invoke the handlers registered for an inbound event
    pub(crate) fn dispatch(&self, packet: &SocketPacket) {
        let Some((name, payload)) = packet.event_parts() else {
            tracing::warn!(namespace = %packet.namespace, "Event packet without a name");
            return;
        };

        // Clone the handler list so handlers may register further handlers
        let handlers = self.handlers.get(name).map(|h| h.value().clone());
        match handlers {
            Some(handlers) => {
                TransportMetrics::record_event(name);
                for handler in handlers {
                    handler(payload);
                }
            }
            None => {
                // Server-chosen names stay out of the label set
                TransportMetrics::record_event(UNHANDLED_EVENT_LABEL);
                tracing::debug!(event = %name, "No handler for socket event");
            }
        }
    }

    /// Closed is terminal; later transitions are ignored
    fn set_state(&self, state: ChannelState) {
        self.status.send_if_modified(|status| {
            if status.state == state || status.state == ChannelState::Closed {
                return false;
            }
            tracing::debug!(from = %status.state, to = %state, "Socket state changed");
            status.state = state;
            true
        });
    }
}

fn frame(packet: &EnginePacket) -> Message {
    Message::Text(packet.encode().into())
}

fn identify_frame(namespace: &str, user_id: i64) -> Message {
    frame(&EnginePacket::Message(SocketPacket::event(
        namespace,
        IDENTIFY_EVENT,
        json!({ "user_id": user_id }),
    )))
}

/// Next Engine.IO packet; malformed frames are logged and skipped
async fn next_packet<S>(stream: &mut S) -> Result<EnginePacket>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            None | Some(Ok(Message::Close(_))) => return Ok(EnginePacket::Close),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => match EnginePacket::decode(text.as_str()) {
                Ok(packet) => return Ok(packet),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed socket packet");
                }
            },
            Some(Ok(_)) => {}
        }
    }
}
