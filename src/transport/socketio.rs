//! Socket.IO framing
//!
//! The backend is a Socket.IO v5 server on Engine.IO v4. Only the WebSocket
//! transport is used, so a session is:
//!
//! - server `0{"sid":..,"pingInterval":..}` (engine open)
//! - client `40` (join the default namespace), server `40{"sid":..}`
//! - events both ways as `42["name",data]`
//! - server `2` ping, client `3` pong
//!
//! Acks and binary attachments are never requested by this client and are
//! surfaced as [`Packet::Other`].

use serde_json::Value;
use thiserror::Error;

/// Query path of the Engine.IO WebSocket endpoint
pub const SOCKET_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

/// Join the default namespace
pub const CONNECT: &str = "40";

/// Answer to a server ping
pub const PONG: &str = "3";

/// One decoded text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine handshake with the server's session parameters
    Open(Value),
    Close,
    Ping,
    Pong,
    Noop,
    /// Namespace joined
    Connect,
    /// Namespace left by the server
    Disconnect,
    ConnectError(Value),
    Event { name: String, data: Value },
    Other(String),
}

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("empty frame")]
    Empty,

    #[error("unknown packet type in '{0}'")]
    UnknownType(String),

    #[error("malformed packet body: {0}")]
    Body(#[from] serde_json::Error),

    #[error("event packet is not a [name, data] array")]
    EventShape,
}

/// Encode an event for the default namespace
pub fn encode_event(name: &str, data: &Value) -> String {
    format!("42{}", Value::Array(vec![Value::String(name.to_string()), data.clone()]))
}

/// Decode one Engine.IO text frame
pub fn decode(text: &str) -> Result<Packet, PacketError> {
    let mut chars = text.chars();
    let engine = chars.next().ok_or(PacketError::Empty)?;
    let rest = chars.as_str();

    match engine {
        '0' => Ok(Packet::Open(json_or_null(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_message(rest),
        '5' => Ok(Packet::Other(text.to_string())),
        '6' => Ok(Packet::Noop),
        _ => Err(PacketError::UnknownType(text.to_string())),
    }
}

fn decode_message(text: &str) -> Result<Packet, PacketError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let body = strip_ack_id(strip_namespace(chars.as_str()));

    match kind {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(body),
        '4' => Ok(Packet::ConnectError(json_or_null(body)?)),
        '3' | '5' | '6' => Ok(Packet::Other(format!("4{}", text))),
        _ => Err(PacketError::UnknownType(format!("4{}", text))),
    }
}

fn decode_event(body: &str) -> Result<Packet, PacketError> {
    let Value::Array(items) = serde_json::from_str::<Value>(body)? else {
        return Err(PacketError::EventShape);
    };
    let mut items = items.into_iter();
    let Some(Value::String(name)) = items.next() else {
        return Err(PacketError::EventShape);
    };
    Ok(Packet::Event {
        name,
        data: items.next().unwrap_or(Value::Null),
    })
}

/// `/admin,["x"]` → `["x"]`
fn strip_namespace(body: &str) -> &str {
    if !body.starts_with('/') {
        return body;
    }
    match body.find(',') {
        Some(idx) => &body[idx + 1..],
        None => "",
    }
}

fn strip_ack_id(body: &str) -> &str {
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn json_or_null(body: &str) -> Result<Value, PacketError> {
    if body.trim().is_empty() {
        Ok(Value::Null)
    } else {
        Ok(serde_json::from_str(body)?)
    }
}
