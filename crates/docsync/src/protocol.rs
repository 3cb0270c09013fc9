//! Sync protocol types and wire format utilities.
//!
//! Binary frames follow the y-sync layout so that stock Yjs providers can talk
//! to the server without an adapter:
//!
//! - `[MSG_SYNC=0][SYNC_STEP1=0][varbuf state_vector]`
//! - `[MSG_SYNC=0][SYNC_STEP2=1][varbuf update]`
//! - `[MSG_SYNC=0][SYNC_UPDATE=2][varbuf update]`
//! - `[MSG_AWARENESS=1][varbuf payload]`
//!
//! All integers are lib0 unsigned varints and a varbuf is a varint length
//! followed by that many bytes. Text frames carry JSON control messages.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

pub const MSG_SYNC: u64 = 0;
pub const MSG_AWARENESS: u64 = 1;

pub const SYNC_STEP1: u64 = 0;
pub const SYNC_STEP2: u64 = 1;
pub const SYNC_UPDATE: u64 = 2;

// ==================== Binary Messages ====================

/// A decoded binary protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Sender's encoded state vector; the receiver answers with a `SyncStep2`.
    SyncStep1(Vec<u8>),
    /// Update bytes containing everything the peer was missing.
    SyncStep2(Vec<u8>),
    /// Incremental update produced by an edit.
    Update(Vec<u8>),
    /// Opaque presence payload (cursor, name, color). Never persisted.
    Awareness(Vec<u8>),
}

impl WireMessage {
    /// Encode into a binary frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            WireMessage::SyncStep1(sv) => {
                write_var_uint(&mut out, MSG_SYNC);
                write_var_uint(&mut out, SYNC_STEP1);
                write_var_buf(&mut out, sv);
            }
            WireMessage::SyncStep2(update) => {
                write_var_uint(&mut out, MSG_SYNC);
                write_var_uint(&mut out, SYNC_STEP2);
                write_var_buf(&mut out, update);
            }
            WireMessage::Update(update) => {
                write_var_uint(&mut out, MSG_SYNC);
                write_var_uint(&mut out, SYNC_UPDATE);
                write_var_buf(&mut out, update);
            }
            WireMessage::Awareness(payload) => {
                write_var_uint(&mut out, MSG_AWARENESS);
                write_var_buf(&mut out, payload);
            }
        }
        out
    }

    /// Decode a binary frame.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let mut reader = Reader::new(data);
        match reader.var_uint()? {
            MSG_SYNC => {
                let step = reader.var_uint()?;
                let payload = reader.var_buf()?.to_vec();
                match step {
                    SYNC_STEP1 => Ok(WireMessage::SyncStep1(payload)),
                    SYNC_STEP2 => Ok(WireMessage::SyncStep2(payload)),
                    SYNC_UPDATE => Ok(WireMessage::Update(payload)),
                    other => Err(ProtocolError::UnknownSyncStep(other)),
                }
            }
            MSG_AWARENESS => Ok(WireMessage::Awareness(reader.var_buf()?.to_vec())),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

fn write_var_uint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn write_var_buf(out: &mut Vec<u8>, buf: &[u8]) {
    write_var_uint(out, buf.len() as u64);
    out.extend_from_slice(buf);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn var_uint(&mut self) -> Result<u64, ProtocolError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self.data.get(self.pos).ok_or(ProtocolError::Truncated)?;
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(ProtocolError::VarintOverflow);
            }
        }
    }

    fn var_buf(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = usize::try_from(self.var_uint()?).map_err(|_| ProtocolError::Truncated)?;
        let end = self.pos.checked_add(len).ok_or(ProtocolError::Truncated)?;
        if end > self.data.len() {
            return Err(ProtocolError::Truncated);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

// ==================== Control Messages ====================

/// Control messages sent from server to client as JSON text frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerControlMessage {
    /// Another session joined the room.
    PeerJoined {
        session_id: String,
        user_id: String,
        display_name: String,
        peer_count: usize,
    },
    /// Another session left the room; its awareness state is gone.
    PeerLeft {
        session_id: String,
        user_id: String,
        peer_count: usize,
    },
    Pong,
}

/// Control messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientControlMessage {
    Ping,
}

// ==================== Transport Frames ====================

/// Transport-neutral frame exchanged by the connection gateway.
///
/// Transports (axum WebSocket, tungstenite, in-memory channels in tests) map
/// their own message types onto this enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
    Close(Option<CloseReason>),
}

/// Why the server closed a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub const NORMAL: u16 = 1000;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const INTERNAL_ERROR: u16 = 1011;

    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl From<WireMessage> for Frame {
    fn from(message: WireMessage) -> Self {
        Frame::Binary(message.encode())
    }
}

impl From<&ServerControlMessage> for Frame {
    fn from(message: &ServerControlMessage) -> Self {
        // Serializing a fieldless/struct enum of strings and integers cannot fail.
        Frame::Text(serde_json::to_string(message).unwrap_or_default())
    }
}

// ==================== Tests ====================
