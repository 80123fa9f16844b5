//! TCP front door.
//!
//! Stands in for the external handshake: each accepted socket is treated as a
//! ready message stream and handed to a [`Service`]. Joins run on their own
//! task so a slow history replay never holds up the accept loop.

use log::{info, warn};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::connection::ConnectionId;
use crate::error::ConnectionError;
use crate::relay::RelayServer;
use crate::tick::TickServer;

/// Something that can admit a ready message stream.
pub trait Service: Clone + Send + Sync + 'static {
    fn join<S>(
        &self,
        stream: S,
    ) -> impl Future<Output = Result<ConnectionId, ConnectionError>> + Send
    where
        S: AsyncRead + AsyncWrite + Send + 'static;
}

impl Service for TickServer {
    fn join<S>(
        &self,
        stream: S,
    ) -> impl Future<Output = Result<ConnectionId, ConnectionError>> + Send
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        TickServer::join(self, stream)
    }
}

impl Service for RelayServer {
    fn join<S>(
        &self,
        stream: S,
    ) -> impl Future<Output = Result<ConnectionId, ConnectionError>> + Send
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        RelayServer::join(self, stream)
    }
}

/// Accepts connections forever, joining each one to `service`.
pub async fn serve<T: Service>(listener: TcpListener, service: T) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Accepting connections on {}", addr);
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Dropping {}: {}", peer, ConnectionError::Handshake(e));
            continue;
        }

        let service = service.clone();
        tokio::spawn(async move {
            match service.join(stream).await {
                Ok(id) => info!("Connection {} accepted from {}", id, peer),
                Err(e) => warn!("Connection from {} failed to join: {}", peer, e),
            }
        });
    }
}
