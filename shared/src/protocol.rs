//! Wire protocol between the board server and participants
//!
//! Live traffic is newline-delimited JSON, one [`Packet`] per line, shaped
//! `{"event": <name>, "payload": <value>}`. Server replies wrap their data in
//! an [`Envelope`]. The one binary exchange is the whole-board fetch, whose
//! reply is a length-prefixed bincode [`BoardReply`] frame.

use crate::Cell;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest board frame a participant will accept
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Length of the big-endian size prefix in front of a board frame
pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum Packet {
    /// participant -> server, first line of a live connection
    #[serde(rename = "connect")]
    Connect { client_version: u32 },

    /// participant -> server, first line of a whole-board fetch
    #[serde(rename = "bitmap")]
    FetchBoard,

    /// participant -> server. Kept as raw JSON so malformed tuples reach the
    /// server's validation and get a proper `placement:error`.
    #[serde(rename = "placement")]
    Placement(Value),

    /// server -> newly joined participant, once
    #[serde(rename = "metadata")]
    Metadata(Envelope<Metadata>),

    /// server -> every other participant when someone joins
    #[serde(rename = "newuser")]
    NewUser(Envelope<u32>),

    /// server -> every participant except the writer
    #[serde(rename = "incoming")]
    Incoming(Envelope<Cell>),

    /// server -> the writer only
    #[serde(rename = "placement:error")]
    PlacementError(Envelope<Value>),

    /// server -> participant, right before the server closes the connection
    #[serde(rename = "disconnected")]
    Disconnected { reason: String },
}

impl Packet {
    pub fn placement(cell: Cell) -> Self {
        Packet::Placement(serde_json::json!([cell.x, cell.y, cell.color]))
    }

    /// Event name as it appears on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            Packet::Connect { .. } => "connect",
            Packet::FetchBoard => "bitmap",
            Packet::Placement(_) => "placement",
            Packet::Metadata(_) => "metadata",
            Packet::NewUser(_) => "newuser",
            Packet::Incoming(_) => "incoming",
            Packet::PlacementError(_) => "placement:error",
            Packet::Disconnected { .. } => "disconnected",
        }
    }

    /// Serializes to one wire line, trailing newline included
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim_end())
    }
}

/// Status wrapper around every server-originated payload
///
/// `{ok: true, data}` on success, `{ok: false, error, details?}` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl<T> Envelope<T> {
    pub fn okay(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            details: None,
        }
    }

    pub fn error(message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
            details,
        }
    }

    /// Data of a successful envelope, `None` for errors
    pub fn into_data(self) -> Option<T> {
        if self.ok {
            self.data
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub connected_users: u32,
}

/// Reply to a whole-board fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardReply {
    Board(Vec<u8>),
    Unavailable(String),
}

impl BoardReply {
    /// Encodes as a big-endian length prefix followed by bincode
    pub fn to_frame(&self) -> bincode::Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decodes a frame body, i.e. everything after the length prefix
    pub fn from_frame_body(body: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(body)
    }

    /// Reads the length prefix of a frame
    pub fn frame_len(header: [u8; FRAME_HEADER_LEN]) -> usize {
        u32::from_be_bytes(header) as usize
    }
}
