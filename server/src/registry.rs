//! Connection registry: the single shared mutable resource of the server.
//!
//! Maps each live [`Connection`] to its per-client state `S` (a position in
//! the tick model, `()` in the relay model). Every operation takes the lock
//! exactly once, so a snapshot is always taken entirely before or entirely
//! after any add, remove or mutation. The lock is never held while a frame is
//! written: broadcasters take a copy of the handles via
//! [`Registry::connections`] and write outside it.

use log::info;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::connection::{Connection, ConnectionId};

#[derive(Debug)]
struct Entry<S> {
    conn: Connection,
    state: S,
}

#[derive(Debug)]
pub struct Registry<S> {
    entries: RwLock<HashMap<ConnectionId, Entry<S>>>,
    /// Next id handed out by [`Registry::next_id`]
    next_id: AtomicU64,
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Registry<S> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh connection identity. Ids are unique per registry.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a connection with its initial state.
    ///
    /// Returns false, leaving the existing entry untouched, if the connection
    /// is already present.
    pub async fn add(&self, conn: Connection, state: S) -> bool {
        let mut entries = self.entries.write().await;
        let id = conn.id();
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, Entry { conn, state });
        info!("Connection {} registered ({} total)", id, entries.len());
        true
    }

    /// Removes a connection. Removing an absent connection is a no-op, since
    /// broadcast eviction can race with the reader's own cleanup.
    pub async fn remove(&self, id: ConnectionId) -> Option<Connection> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(&id).map(|entry| entry.conn);
        if removed.is_some() {
            info!("Connection {} removed ({} remaining)", id, entries.len());
        }
        removed
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.entries.read().await.contains_key(&id)
    }

    /// Applies `f` to one connection's state. Returns false if it is gone.
    pub async fn mutate<F>(&self, id: ConnectionId, f: F) -> bool
    where
        F: FnOnce(&mut S),
    {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&id) {
            Some(entry) => {
                f(&mut entry.state);
                true
            }
            None => false,
        }
    }

    /// Applies a batch of events in order under a single lock acquisition.
    ///
    /// Events addressed to connections that are no longer registered are
    /// skipped. Returns how many events were applied.
    pub async fn mutate_batch<E, I, F>(&self, events: I, mut f: F) -> usize
    where
        I: IntoIterator<Item = (ConnectionId, E)>,
        F: FnMut(&mut S, E),
    {
        let mut entries = self.entries.write().await;
        let mut applied = 0;
        for (id, event) in events {
            if let Some(entry) = entries.get_mut(&id) {
                f(&mut entry.state, event);
                applied += 1;
            }
        }
        applied
    }

    /// Cloned handles of every registered connection.
    pub async fn connections(&self) -> Vec<Connection> {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| entry.conn.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<S: Clone> Registry<S> {
    pub async fn get(&self, id: ConnectionId) -> Option<S> {
        self.entries
            .read()
            .await
            .get(&id)
            .map(|entry| entry.state.clone())
    }

    /// Copies every state under one lock acquisition.
    pub async fn snapshot(&self) -> Vec<S> {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| entry.state.clone())
            .collect()
    }

    /// Copies every state together with the handles it should be sent to,
    /// so a frame built from the states reaches exactly the same set.
    pub async fn snapshot_with_connections(&self) -> (Vec<S>, Vec<Connection>) {
        let entries = self.entries.read().await;
        entries
            .values()
            .map(|entry| (entry.state.clone(), entry.conn.clone()))
            .unzip()
    }
}
