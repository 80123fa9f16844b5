//! Fan-out of one frame to every registered connection.

use log::{debug, warn};
use std::sync::Arc;

use crate::connection::{Connection, ConnectionId, Frame};
use crate::registry::Registry;

/// Outcome of a single [`Broadcaster::publish`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<ConnectionId>,
}

#[derive(Debug)]
pub struct Broadcaster<S> {
    registry: Arc<Registry<S>>,
}

impl<S> Clone for Broadcaster<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S> Broadcaster<S> {
    pub fn new(registry: Arc<Registry<S>>) -> Self {
        Self { registry }
    }

    /// Queues `frame` on every registered connection.
    ///
    /// The handle list is copied under the registry lock and the writes happen
    /// outside it.
    pub async fn publish(&self, frame: Frame) -> BroadcastReport {
        let targets = self.registry.connections().await;
        self.publish_to(targets, frame).await
    }

    /// Queues `frame` on each of `targets`.
    ///
    /// A connection whose queue rejects the frame is closed and evicted on the
    /// spot; delivery to the others continues. Failed writes are not retried.
    pub async fn publish_to(&self, targets: Vec<Connection>, frame: Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for conn in targets {
            match conn.send(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Broadcast error: {}", e);
                    conn.close();
                    self.registry.remove(conn.id()).await;
                    report.evicted.push(conn.id());
                }
            }
        }

        debug!(
            "Broadcast {} bytes to {} connections ({} evicted)",
            frame.len(),
            report.delivered,
            report.evicted.len()
        );
        report
    }
}
