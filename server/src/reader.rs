//! Per-connection reader task.
//!
//! Each accepted connection gets one reader that blocks on the next frame and
//! hands the payload to an [`Ingest`] implementation: the tick model decodes
//! movement input and queues it for the next tick, the relay model queues the
//! raw bytes for the relay loop. Whatever ends the loop, the connection is
//! closed and removed from the registry exactly once, by the reader itself.

use log::{debug, info, warn};
use shared::framing::read_frame;
use std::future::Future;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

use crate::connection::{Connection, ConnectionId};
use crate::error::ConnectionError;
use crate::registry::Registry;

/// Where a reader delivers the payloads it receives.
pub trait Ingest: Send + Sync + 'static {
    /// Accepts one payload from `id`. A terminal error ends the reader.
    fn ingest(
        &self,
        id: ConnectionId,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}

/// Reads frames until the peer closes, a read or decode fails, or the
/// connection is closed from elsewhere.
///
/// `Ok(())` means the connection ended without an error on this side.
pub async fn read_loop<R, I>(
    conn: &Connection,
    reader: &mut R,
    ingest: &I,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
    I: Ingest,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = conn.closed() => return Ok(()),
            frame = read_frame(reader) => frame.map_err(ConnectionError::Read)?,
        };

        let Some(payload) = frame else {
            return Ok(());
        };

        let result = tokio::select! {
            biased;
            _ = conn.closed() => return Ok(()),
            result = ingest.ingest(conn.id(), payload) => result,
        };

        match result {
            Ok(()) => {}
            Err(e) if !e.is_terminal() => {
                warn!("Connection {}: {}", conn.id(), e);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Spawns the reader task for a registered connection.
pub fn spawn_reader<R, I, S>(
    conn: Connection,
    mut reader: R,
    ingest: Arc<I>,
    registry: Arc<Registry<S>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    I: Ingest,
    S: Send + Sync + 'static,
{
    tokio::spawn(async move {
        match read_loop(&conn, &mut reader, ingest.as_ref()).await {
            Ok(()) => info!("Connection {} disconnected", conn.id()),
            Err(ConnectionError::Decode(e)) => {
                info!("Connection {} sent an undecodable frame", conn.id());
                debug!("Connection {} decode error: {}", conn.id(), e);
            }
            Err(e) => info!("Connection {} dropped: {}", conn.id(), e),
        }

        conn.close();
        registry.remove(conn.id()).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::io::Builder;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(ConnectionId, Vec<u8>)>>,
        fail_on: Option<&'static [u8]>,
    }

    impl Ingest for Recorder {
        async fn ingest(&self, id: ConnectionId, payload: Vec<u8>) -> Result<(), ConnectionError> {
            if self.fail_on == Some(payload.as_slice()) {
                return Err(ConnectionError::Closed);
            }
            if payload.as_slice() == b"overflow" {
                return Err(ConnectionError::Capacity);
            }
            self.seen.lock().unwrap().push((id, payload));
            Ok(())
        }
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    fn payloads(recorder: &Recorder) -> Vec<Vec<u8>> {
        recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_reads_until_clean_close() {
        let (conn, _rx) = Connection::pair(ConnectionId(1), 4);
        let mut mock = Builder::new()
            .read(&framed(b"one"))
            .read(&framed(b"two"))
            .build();
        let recorder = Recorder::default();

        let result = read_loop(&conn, &mut mock, &recorder).await;

        assert!(result.is_ok());
        assert_eq!(payloads(&recorder), vec![b"one".to_vec(), b"two".to_vec()]);
        assert!(recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .all(|(id, _)| *id == ConnectionId(1)));
    }

    #[tokio::test]
    async fn test_read_failure_is_terminal() {
        let (conn, _rx) = Connection::pair(ConnectionId(2), 4);
        let mut mock = Builder::new()
            .read(&framed(b"before"))
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let recorder = Recorder::default();

        let result = read_loop(&conn, &mut mock, &recorder).await;

        assert!(matches!(result, Err(ConnectionError::Read(_))));
        assert_eq!(payloads(&recorder), vec![b"before".to_vec()]);
    }

    #[tokio::test]
    async fn test_capacity_error_keeps_reading() {
        let (conn, _rx) = Connection::pair(ConnectionId(3), 4);
        let mut mock = Builder::new()
            .read(&framed(b"overflow"))
            .read(&framed(b"after"))
            .build();
        let recorder = Recorder::default();

        assert!(read_loop(&conn, &mut mock, &recorder).await.is_ok());
        assert_eq!(payloads(&recorder), vec![b"after".to_vec()]);
    }

    #[tokio::test]
    async fn test_terminal_ingest_error_stops_reader() {
        let (conn, _rx) = Connection::pair(ConnectionId(4), 4);
        let mut mock = Builder::new().read(&framed(b"stop")).build();
        let recorder = Recorder {
            fail_on: Some(b"stop"),
            ..Recorder::default()
        };

        let result = read_loop(&conn, &mut mock, &recorder).await;
        assert!(matches!(result, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let (conn, _rx) = Connection::pair(ConnectionId(5), 4);
        let (server_side, _client_side) = tokio::io::duplex(64);
        let (mut read_half, _write_half) = tokio::io::split(server_side);
        let recorder = Arc::new(Recorder::default());

        let task = {
            let conn = conn.clone();
            let recorder = Arc::clone(&recorder);
            tokio::spawn(async move { read_loop(&conn, &mut read_half, recorder.as_ref()).await })
        };
        tokio::task::yield_now().await;

        conn.close();
        let result = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_spawned_reader_removes_connection() {
        let registry: Arc<Registry<()>> = Arc::new(Registry::new());
        let (conn, _rx) = Connection::pair(registry.next_id(), 4);
        let id = conn.id();
        registry.add(conn.clone(), ()).await;

        let mock = Builder::new().read(&framed(b"hi")).build();
        let handle = spawn_reader(
            conn.clone(),
            mock,
            Arc::new(Recorder::default()),
            Arc::clone(&registry),
        );
        handle.await.unwrap();

        assert!(!registry.contains(id).await);
        assert!(conn.is_closed());
    }
}
