//! Wire protocol shared by the relay server and its clients.
//!
//! Every datagram carries exactly one UTF-8 JSON object. The `flag` field
//! discriminates the packet kind; the remaining fields depend on the kind.
//! Client-to-relay and relay-to-client traffic use separate closed enums so a
//! packet can only be dispatched after all of its required fields decoded.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 4242;
/// Time an unacknowledged packet waits before it is sent again.
pub const RESEND_THRESHOLD_MS: u64 = 500;
/// Period of the retransmission scan.
pub const RETRY_TICK_MS: u64 = 25;
/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

pub type PlayerId = u32;
pub type Sequence = u64;
pub type StepIndex = u64;

/// Flags a client may send to the relay.
pub const CLIENT_FLAGS: &[&str] = &["connect", "disconnect", "start", "data", "ack"];
/// Flags the relay may send to a client.
pub const SERVER_FLAGS: &[&str] = &["cack", "join", "start", "broadcast", "ack"];

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed packet: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("packet has no `flag` discriminator")]
    MissingFlag,

    #[error("unknown packet kind `{0}`")]
    UnknownKind(String),

    #[error("failed to encode packet: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Packets sent from a player to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "lowercase")]
pub enum ClientPacket {
    Connect {
        seq: Sequence,
    },
    Disconnect,
    #[serde(rename = "start")]
    GameStart {
        seq: Sequence,
    },
    Data {
        data: Value,
        step: StepIndex,
        seq: Sequence,
    },
    Ack {
        ack: Sequence,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<Sequence>,
    },
}

impl ClientPacket {
    pub fn flag(&self) -> &'static str {
        match self {
            ClientPacket::Connect { .. } => "connect",
            ClientPacket::Disconnect => "disconnect",
            ClientPacket::GameStart { .. } => "start",
            ClientPacket::Data { .. } => "data",
            ClientPacket::Ack { .. } => "ack",
        }
    }
}

/// Packets sent from the relay to a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "lowercase")]
pub enum ServerPacket {
    #[serde(rename = "cack")]
    ConnectionAck {
        ack: Sequence,
        players: u32,
        player: PlayerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<Sequence>,
    },
    Join {
        player: PlayerId,
        players: u32,
        seq: Sequence,
    },
    #[serde(rename = "start")]
    GameStart {
        seq: Sequence,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<Sequence>,
    },
    Broadcast {
        step: StepIndex,
        data: Value,
        player: PlayerId,
        seq: Sequence,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<Sequence>,
    },
    Ack {
        ack: Sequence,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<Sequence>,
    },
}

impl ServerPacket {
    pub fn flag(&self) -> &'static str {
        match self {
            ServerPacket::ConnectionAck { .. } => "cack",
            ServerPacket::Join { .. } => "join",
            ServerPacket::GameStart { .. } => "start",
            ServerPacket::Broadcast { .. } => "broadcast",
            ServerPacket::Ack { .. } => "ack",
        }
    }

    /// Sequence number the receiver is expected to acknowledge, if any
    pub fn seq(&self) -> Option<Sequence> {
        match self {
            ServerPacket::ConnectionAck { seq, .. } | ServerPacket::Ack { seq, .. } => *seq,
            ServerPacket::Join { seq, .. }
            | ServerPacket::GameStart { seq, .. }
            | ServerPacket::Broadcast { seq, .. } => Some(*seq),
        }
    }
}

pub fn encode<P: Serialize>(packet: &P) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(packet).map_err(ProtocolError::Encode)
}

/// Decodes a datagram received by the relay.
pub fn decode_client(bytes: &[u8]) -> Result<ClientPacket, ProtocolError> {
    decode_tagged(bytes, CLIENT_FLAGS)
}

/// Decodes a datagram received by a player.
pub fn decode_server(bytes: &[u8]) -> Result<ServerPacket, ProtocolError> {
    decode_tagged(bytes, SERVER_FLAGS)
}

// Unknown kinds are reported separately from malformed known kinds so the
// receiver can drop them quietly.
fn decode_tagged<P: DeserializeOwned>(bytes: &[u8], known: &[&str]) -> Result<P, ProtocolError> {
    let value: Value = serde_json::from_slice(bytes).map_err(ProtocolError::Malformed)?;

    let flag = value
        .get("flag")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingFlag)?;
    if !known.contains(&flag) {
        return Err(ProtocolError::UnknownKind(flag.to_string()));
    }

    serde_json::from_value(value).map_err(ProtocolError::Malformed)
}
