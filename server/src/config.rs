//! Server configuration.
//!
//! The binary maps its command-line flags onto [`SyncConfig`]; library users
//! and tests construct it directly, usually starting from `Default`.

use shared::{
    Codec, Position, DEFAULT_BOARD_SIZE, DEFAULT_HISTORY_CAPACITY, DEFAULT_INPUT_CHANNEL_CAPACITY,
    DEFAULT_OUTBOUND_CAPACITY, DEFAULT_TICK_RATE, SPAWN_POSITION,
};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// What a reader task does when the input ingestion channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for space. Only the offending reader stalls.
    #[default]
    Block,
    /// Discard the input and keep reading.
    Drop,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(OverflowPolicy::Block),
            "drop" => Ok(OverflowPolicy::Drop),
            other => Err(format!(
                "unknown overflow policy '{}' (expected block or drop)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Snapshots broadcast per second (tick model only)
    pub tick_rate: u32,
    /// Positions are clamped to `[0, board_size - 1]` on both axes
    pub board_size: i32,
    /// Capacity of the input ingestion channel
    pub input_channel_capacity: usize,
    /// Frames a single peer may have queued before it counts as failed
    pub outbound_capacity: usize,
    /// Messages kept for replay to late joiners (relay model only)
    pub history_capacity: usize,
    pub overflow: OverflowPolicy,
    pub codec: Codec,
    /// Where newly joined players appear
    pub spawn: Position,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            board_size: DEFAULT_BOARD_SIZE,
            input_channel_capacity: DEFAULT_INPUT_CHANNEL_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            overflow: OverflowPolicy::default(),
            codec: Codec::default(),
            spawn: SPAWN_POSITION,
        }
    }
}

impl SyncConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }

    /// Checks the settings every model depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.tick_interval().is_zero() {
            return Err(ConfigError::TickRateTooHigh(self.tick_rate));
        }
        if self.board_size <= 0 {
            return Err(ConfigError::EmptyBoard(self.board_size));
        }
        if self.input_channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("input_channel_capacity"));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("outbound_capacity"));
        }
        if !self.spawn.is_within(self.board_size) {
            return Err(ConfigError::SpawnOutsideBoard {
                spawn: self.spawn,
                board_size: self.board_size,
            });
        }
        Ok(())
    }

    /// [`SyncConfig::validate`] plus the relay model's history bound.
    pub fn validate_relay(&self) -> Result<(), ConfigError> {
        self.validate()?;
        // A fresh connection must be able to queue a complete replay.
        if self.outbound_capacity <= self.history_capacity {
            return Err(ConfigError::HistoryExceedsOutbound {
                history: self.history_capacity,
                outbound: self.outbound_capacity,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroTickRate,
    TickRateTooHigh(u32),
    EmptyBoard(i32),
    ZeroCapacity(&'static str),
    SpawnOutsideBoard { spawn: Position, board_size: i32 },
    HistoryExceedsOutbound { history: usize, outbound: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroTickRate => write!(f, "tick rate must be positive"),
            ConfigError::TickRateTooHigh(rate) => {
                write!(f, "tick rate {} leaves no time between ticks", rate)
            }
            ConfigError::EmptyBoard(size) => write!(f, "board size must be positive, got {}", size),
            ConfigError::ZeroCapacity(name) => write!(f, "{} must be positive", name),
            ConfigError::SpawnOutsideBoard { spawn, board_size } => write!(
                f,
                "spawn ({}, {}) lies outside a board of size {}",
                spawn.x, spawn.y, board_size
            ),
            ConfigError::HistoryExceedsOutbound { history, outbound } => write!(
                f,
                "outbound capacity {} must exceed history capacity {}",
                outbound, history
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
