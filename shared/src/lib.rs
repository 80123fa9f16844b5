//! Wire types and helpers shared between the sync server and its clients.
//!
//! Both the tick model and the relay model exchange length-delimited frames
//! (see [`framing`]). Tick payloads are encoded with a [`Codec`]; relay
//! payloads are opaque bytes and never touch the codec.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod framing;

pub const DEFAULT_TICK_RATE: u32 = 20;
pub const DEFAULT_BOARD_SIZE: i32 = 200;
pub const DEFAULT_INPUT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 2048;
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;
pub const SPAWN_POSITION: Position = Position { x: 1, y: 1 };

/// Movement delta sent by a client in the tick model.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct MoveInput {
    pub dx: i32,
    pub dy: i32,
}

/// Public position of one player. Carries no connection identity.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Applies a delta and clamps both axes to `[0, board_size - 1]`.
    pub fn apply_delta(&mut self, input: MoveInput, board_size: i32) {
        let max = (board_size - 1).max(0);
        self.x = self.x.saturating_add(input.dx).clamp(0, max);
        self.y = self.y.saturating_add(input.dy).clamp(0, max);
    }

    pub fn is_within(&self, board_size: i32) -> bool {
        (0..board_size).contains(&self.x) && (0..board_size).contains(&self.y)
    }
}

/// The frame broadcast once per tick. Order of entries carries no meaning.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct Snapshot {
    pub positions: Vec<Position>,
}

impl Snapshot {
    pub fn new(positions: Vec<Position>) -> Self {
        Self { positions }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Payload encoding for tick-model messages.
///
/// `Json` matches the browser protocol (`{"dx":1,"dy":0}` in, `[{"x":1,"y":1}]`
/// out). `Bincode` is the compact encoding used by native clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Json,
    Bincode,
}

impl Codec {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Json => serde_json::to_vec(value).map_err(CodecError::Json),
            Codec::Bincode => bincode::serialize(value).map_err(CodecError::Bincode),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Codec::Json => serde_json::from_slice(bytes).map_err(CodecError::Json),
            Codec::Bincode => bincode::deserialize(bytes).map_err(CodecError::Bincode),
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Codec::Json),
            "bincode" => Ok(Codec::Bincode),
            other => Err(format!("unknown codec '{}' (expected json or bincode)", other)),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Json => write!(f, "json"),
            Codec::Bincode => write!(f, "bincode"),
        }
    }
}

#[derive(Debug)]
pub enum CodecError {
    Json(serde_json::Error),
    Bincode(bincode::Error),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Json(e) => write!(f, "json payload: {}", e),
            CodecError::Bincode(e) => write!(f, "bincode payload: {}", e),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Json(e) => Some(e),
            CodecError::Bincode(e) => Some(e),
        }
    }
}
