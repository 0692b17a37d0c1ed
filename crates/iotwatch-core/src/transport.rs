use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ReconnectPolicy;
use crate::model::{Device, Sample};
use crate::wire::{self, Frame};

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Connect,
    Disconnect,
    ConnectError(String),
    DeviceData(Sample),
    DevicesList(Vec<Device>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    ConnectError,
    DeviceData,
    DevicesList,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::ConnectError,
        EventKind::DeviceData,
        EventKind::DevicesList,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::ConnectError => "connect_error",
            EventKind::DeviceData => "device_data",
            EventKind::DevicesList => "devices_list",
        }
    }
}

impl PushEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PushEvent::Connect => EventKind::Connect,
            PushEvent::Disconnect => EventKind::Disconnect,
            PushEvent::ConnectError(_) => EventKind::ConnectError,
            PushEvent::DeviceData(_) => EventKind::DeviceData,
            PushEvent::DevicesList(_) => EventKind::DevicesList,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    Subscribe(String),
    Unsubscribe(String),
}

impl OutboundCommand {
    pub fn device_id(&self) -> &str {
        match self {
            OutboundCommand::Subscribe(id) | OutboundCommand::Unsubscribe(id) => id,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundCommand::Subscribe(_) => "subscribe_device",
            OutboundCommand::Unsubscribe(_) => "unsubscribe_device",
        }
    }

    pub fn encode(&self) -> Result<String, TransportError> {
        wire::encode_event(self.event_name(), &Value::String(self.device_id().to_string()))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("push channel closed")]
    Closed,
    #[error("push endpoint: {0}")]
    Endpoint(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("malformed frame: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PushTransport: Send {
    /// Next inbound event; `None` once the channel is gone for good.
    async fn recv(&mut self) -> Option<PushEvent>;
    fn send(&mut self, command: OutboundCommand) -> Result<(), TransportError>;
}

/// Socket.IO push channel that keeps reconnecting in the background.
pub struct WsTransport {
    events: mpsc::Receiver<PushEvent>,
    commands: mpsc::UnboundedSender<OutboundCommand>,
    task: JoinHandle<()>,
}

impl WsTransport {
    /// `base` is the service URL (`http://host:port`); the Socket.IO
    /// endpoint is derived from it.
    pub fn spawn(base: Url, policy: ReconnectPolicy) -> Self {
        let (event_tx, events) = mpsc::channel(256);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(socket_loop(base, policy, event_tx, command_rx));
        Self {
            events,
            commands,
            task,
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn recv(&mut self) -> Option<PushEvent> {
        self.events.recv().await
    }

    fn send(&mut self, command: OutboundCommand) -> Result<(), TransportError> {
        self.commands.send(command).map_err(|_| TransportError::Closed)
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SessionEnd {
    /// The socket went away. `joined` is whether the namespace ever connected.
    Lost { joined: bool, reason: String },
    /// Nobody is listening any more.
    Shutdown,
}

async fn socket_loop(
    base: Url,
    policy: ReconnectPolicy,
    events: mpsc::Sender<PushEvent>,
    mut commands: mpsc::UnboundedReceiver<OutboundCommand>,
) {
    let url = match wire::socket_endpoint(&base) {
        Ok(url) => url,
        Err(err) => {
            warn!(url = %base, error = %err, "push channel endpoint rejected");
            let _ = events.send(PushEvent::ConnectError(err.to_string())).await;
            return;
        }
    };

    let mut backoff = policy.min_backoff;
    loop {
        // No offline queue: whatever was issued while down is stale by now.
        let mut dropped = 0_usize;
        while commands.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarding commands issued while offline");
        }

        let (mut ws, _) = match connect_async(url.as_str()).await {
            Ok(value) => value,
            Err(err) => {
                warn!(url = %url, error = %err, "push channel connect failed");
                if events.send(PushEvent::ConnectError(err.to_string())).await.is_err() {
                    return;
                }
                tokio::time::sleep(backoff).await;
                backoff = policy.next_backoff(backoff);
                continue;
            }
        };
        debug!(url = %url, "push socket open, awaiting handshake");

        let end = run_session(&mut ws, &events, &mut commands).await;
        let _ = ws.close(None).await;
        let (joined, reason) = match end {
            SessionEnd::Shutdown => return,
            SessionEnd::Lost { joined, reason } => (joined, reason),
        };

        let event = if joined {
            backoff = policy.min_backoff;
            info!(url = %url, reason = %reason, "push channel disconnected");
            PushEvent::Disconnect
        } else {
            warn!(url = %url, reason = %reason, "push channel handshake failed");
            PushEvent::ConnectError(reason)
        };
        if events.send(event).await.is_err() {
            return;
        }
        tokio::time::sleep(backoff).await;
        if !joined {
            backoff = policy.next_backoff(backoff);
        }
    }
}

async fn run_session(
    ws: &mut Socket,
    events: &mpsc::Sender<PushEvent>,
    commands: &mut mpsc::UnboundedReceiver<OutboundCommand>,
) -> SessionEnd {
    let mut joined = false;
    let mut liveness = wire::default_liveness();
    let mut deadline = Instant::now() + liveness;

    loop {
        tokio::select! {
            frame = ws.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Lost { joined, reason: "socket closed".to_string() };
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return SessionEnd::Lost { joined, reason: err.to_string() },
                };
                deadline = Instant::now() + liveness;

                let reply = match wire::decode_frame(&text) {
                    Ok(Frame::Open(handshake)) => {
                        debug!(sid = %handshake.sid, "engine handshake");
                        liveness = handshake.liveness();
                        deadline = Instant::now() + liveness;
                        Some(wire::CONNECT_FRAME)
                    }
                    Ok(Frame::Ping) => Some(wire::PONG_FRAME),
                    Ok(Frame::Connected) => {
                        joined = true;
                        info!("push channel connected");
                        if events.send(PushEvent::Connect).await.is_err() {
                            return SessionEnd::Shutdown;
                        }
                        None
                    }
                    Ok(Frame::Event(event)) => {
                        if events.send(event).await.is_err() {
                            return SessionEnd::Shutdown;
                        }
                        None
                    }
                    Ok(Frame::ConnectError(reason)) => return SessionEnd::Lost { joined, reason },
                    Ok(Frame::Disconnected | Frame::Close) => {
                        return SessionEnd::Lost { joined, reason: "server closed the session".to_string() };
                    }
                    Ok(Frame::Pong | Frame::Noop) => None,
                    Ok(Frame::Ignored(name)) => {
                        debug!(event = %name, "ignoring unhandled push frame");
                        None
                    }
                    Err(err) => {
                        warn!(error = %err, "dropping malformed push frame");
                        None
                    }
                };
                if let Some(reply) = reply {
                    if let Err(err) = ws.send(Message::Text(reply.to_string())).await {
                        return SessionEnd::Lost { joined, reason: err.to_string() };
                    }
                }
            }
            command = commands.recv() => match command {
                Some(command) if !joined => {
                    debug!(event = command.event_name(), "dropping command before namespace connect");
                }
                Some(command) => {
                    let frame = match command.encode() {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(error = %err, "failed to encode outbound command");
                            continue;
                        }
                    };
                    if let Err(err) = ws.send(Message::Text(frame)).await {
                        return SessionEnd::Lost { joined, reason: err.to_string() };
                    }
                    debug!(event = command.event_name(), device_id = command.device_id(), "sent");
                }
                None => return SessionEnd::Shutdown,
            },
            () = tokio::time::sleep_until(deadline) => {
                return SessionEnd::Lost { joined, reason: "server stopped answering".to_string() };
            }
        }
    }
}

/// In-process transport, handy for embedding and tests.
pub struct MemoryTransport {
    events: mpsc::UnboundedReceiver<PushEvent>,
    sent: mpsc::UnboundedSender<OutboundCommand>,
}

/// The far end of a [`MemoryTransport`].
pub struct MemoryPeer {
    pub events: mpsc::UnboundedSender<PushEvent>,
    pub sent: mpsc::UnboundedReceiver<OutboundCommand>,
}

impl MemoryPeer {
    pub fn push(&self, event: PushEvent) -> Result<(), TransportError> {
        self.events.send(event).map_err(|_| TransportError::Closed)
    }

    pub fn drain_sent(&mut self) -> Vec<OutboundCommand> {
        let mut out = Vec::new();
        while let Ok(command) = self.sent.try_recv() {
            out.push(command);
        }
        out
    }
}

pub fn memory_pair() -> (MemoryTransport, MemoryPeer) {
    let (event_tx, events) = mpsc::unbounded_channel();
    let (sent, sent_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport { events, sent },
        MemoryPeer {
            events: event_tx,
            sent: sent_rx,
        },
    )
}

#[async_trait]
impl PushTransport for MemoryTransport {
    async fn recv(&mut self) -> Option<PushEvent> {
        self.events.recv().await
    }

    fn send(&mut self, command: OutboundCommand) -> Result<(), TransportError> {
        self.sent.send(command).map_err(|_| TransportError::Closed)
    }
}
