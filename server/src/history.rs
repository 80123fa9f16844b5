//! Replayable message history for the relay model.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::connection::{Connection, Frame};
use crate::error::ConnectionError;

/// Ordered record of relayed messages, bounded to `capacity` entries.
/// When full, the oldest message is forgotten first.
#[derive(Debug)]
pub struct HistoryBuffer {
    messages: VecDeque<Frame>,
    capacity: usize,
    forgotten: u64,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            forgotten: 0,
        }
    }

    pub fn append(&mut self, message: Frame) {
        if self.capacity == 0 {
            self.forgotten += 1;
            return;
        }
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
            self.forgotten += 1;
        }
        self.messages.push_back(message);
    }

    /// Queues every recorded message on `conn`, oldest first.
    ///
    /// Stops at the first failure; the caller is expected to drop the
    /// connection rather than leave it with a partial history.
    pub fn replay_to(&self, conn: &Connection) -> Result<usize, ConnectionError> {
        for message in &self.messages {
            conn.send(Arc::clone(message))?;
        }
        Ok(self.messages.len())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages dropped to stay within capacity.
    pub fn forgotten(&self) -> u64 {
        self.forgotten
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.messages.iter()
    }
}
