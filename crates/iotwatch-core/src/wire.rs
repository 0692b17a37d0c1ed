//! Socket.IO text framing (Engine.IO v4) for the push channel.
//!
//! Only the default namespace over the websocket transport is spoken. An
//! engine packet is one type digit plus a payload; a socket packet rides
//! inside engine type `4` and has its own type digit:
//!
//! ```text
//! 0{"sid":..,"pingInterval":..}   engine open
//! 2 / 3                           ping / pong
//! 40 / 40{"sid":..}               namespace connect (client / server)
//! 42["event",data]                event
//! 44{"message":..}                namespace connect error
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::transport::{EventKind, PushEvent, TransportError};

/// Sent once the engine handshake arrives.
pub const CONNECT_FRAME: &str = "40";
/// Reply to a server ping.
pub const PONG_FRAME: &str = "3";

const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}

fn default_ping_timeout() -> u64 {
    DEFAULT_PING_TIMEOUT_MS
}

impl Handshake {
    /// Longest the server may stay silent before the session counts as dead.
    pub fn liveness(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// Silence allowance used until the server's handshake says otherwise.
pub fn default_liveness() -> Duration {
    Duration::from_millis(DEFAULT_PING_INTERVAL_MS + DEFAULT_PING_TIMEOUT_MS)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    Connected,
    Disconnected,
    ConnectError(String),
    Event(PushEvent),
    /// Well-formed but not for us: unknown events, acks, other namespaces.
    Ignored(String),
}

fn malformed(context: &str, detail: impl std::fmt::Display) -> TransportError {
    TransportError::Decode(format!("{context}: {detail}"))
}

/// Decodes one websocket text frame.
///
/// Lifecycle events are never taken from an event name on the wire; they
/// come from the socket packets themselves. `device_data_<id>` carrying a
/// list is a history dump, not a live reading, and is ignored.
pub fn decode_frame(text: &str) -> Result<Frame, TransportError> {
    let mut chars = text.chars();
    let Some(kind) = chars.next() else {
        return Err(malformed("frame", "empty"));
    };
    let payload = chars.as_str();
    match kind {
        '0' => serde_json::from_str(payload)
            .map(Frame::Open)
            .map_err(|err| malformed("open", err)),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '4' => decode_packet(payload),
        '6' => Ok(Frame::Noop),
        other => Err(malformed("frame", format!("unknown engine packet {other:?}"))),
    }
}

fn decode_packet(packet: &str) -> Result<Frame, TransportError> {
    let mut chars = packet.chars();
    let Some(kind) = chars.next() else {
        return Err(malformed("packet", "empty"));
    };
    let mut body = chars.as_str();
    if body.starts_with('/') {
        let (namespace, rest) = body.split_once(',').unwrap_or((body, ""));
        if namespace != "/" {
            return Ok(Frame::Ignored(namespace.to_string()));
        }
        body = rest;
    }

    match kind {
        '0' => Ok(Frame::Connected),
        '1' => Ok(Frame::Disconnected),
        '2' => decode_event(body.trim_start_matches(|c: char| c.is_ascii_digit())),
        '3' => Ok(Frame::Ignored("ack".to_string())),
        '4' => Ok(Frame::ConnectError(connect_error_reason(body))),
        '5' | '6' => Ok(Frame::Ignored("binary".to_string())),
        other => Err(malformed("packet", format!("unknown socket packet {other:?}"))),
    }
}

fn connect_error_reason(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => "connection refused".to_string(),
        },
        Ok(Value::String(message)) => message,
        _ if body.is_empty() => "connection refused".to_string(),
        _ => body.to_string(),
    }
}

fn event_kind(name: &str) -> Option<EventKind> {
    match name {
        "device_data" => Some(EventKind::DeviceData),
        "devices_list" => Some(EventKind::DevicesList),
        _ if name.starts_with("device_data_") => Some(EventKind::DeviceData),
        _ => None,
    }
}

fn decode_event(payload: &str) -> Result<Frame, TransportError> {
    let args: Vec<Value> = serde_json::from_str(payload).map_err(|err| malformed("event", err))?;
    let mut args = args.into_iter();
    let Some(Value::String(name)) = args.next() else {
        return Err(malformed("event", "missing name"));
    };
    let data = args.next().unwrap_or(Value::Null);

    let event = match (event_kind(&name), data) {
        (Some(EventKind::DeviceData), data @ Value::Object(_)) => {
            PushEvent::DeviceData(serde_json::from_value(data).map_err(|err| malformed(&name, err))?)
        }
        (Some(EventKind::DevicesList), data) => {
            PushEvent::DevicesList(serde_json::from_value(data).map_err(|err| malformed(&name, err))?)
        }
        _ => return Ok(Frame::Ignored(name)),
    };
    Ok(Frame::Event(event))
}

/// Encodes an event for the default namespace: `42["name",data]`.
pub fn encode_event(name: &str, data: &Value) -> Result<String, TransportError> {
    let args = serde_json::to_string(&json!([name, data]))
        .map_err(|err| TransportError::Encode(err.to_string()))?;
    Ok(format!("42{args}"))
}

/// Maps a service base URL onto its Socket.IO websocket endpoint.
pub fn socket_endpoint(base: &Url) -> Result<Url, TransportError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::Endpoint(format!("unsupported scheme {other:?}")));
        }
    };
    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| TransportError::Endpoint(format!("cannot switch {base} to {scheme}")))?;
    if !url.path().ends_with("/socket.io/") {
        url.path_segments_mut()
            .map_err(|()| TransportError::Endpoint(format!("{base} cannot be a base")))?
            .pop_if_empty()
            .push("socket.io")
            .push("");
    }
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}
