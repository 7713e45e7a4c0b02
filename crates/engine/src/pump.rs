//! Backend pump. `spec.md` §4.5, §9 "Concurrent pump".
//!
//! Two cooperating halves once a session reaches `OPENED`:
//! - client→backend: the session driver loop (in `engine.rs`) writes each
//!   inbound `DATA` payload straight to the backend socket. Synchronous
//!   writes are the backpressure mechanism — a slow backend stalls the
//!   driver loop, which stalls reading more client packets.
//! - backend→client: a task spawned here reads raw bytes off the backend
//!   and wraps each read into a `DATA` packet written back through the
//!   transport.
//!
//! Either direction ending cancels the other: the spawned task's
//! `JoinHandle` is `select!`ed alongside the driver loop's own transport
//! read, and tearing the pump down shuts both backend halves and aborts
//! the task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use codec::Packet;
use codec::packet::Data as DataBody;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::transport::{Transport, TransportError};

pub struct Pump {
    backend_writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    task: JoinHandle<()>,
    client_to_backend_bytes: AtomicU64,
    backend_to_client_bytes: Arc<AtomicU64>,
}

impl Pump {
    /// Splits `backend` and spawns the backend→client task. `transport` is
    /// shared with the caller so both the spawned task and the session
    /// driver loop can write responses/relayed data without racing each
    /// other's framing.
    pub fn spawn(
        transport: Arc<AsyncMutex<Box<dyn Transport>>>,
        backend: TcpStream,
        receive_buf: usize,
    ) -> Self {
        let (mut backend_read, backend_write) = backend.into_split();
        let backend_writer = Arc::new(AsyncMutex::new(backend_write));
        let backend_to_client_bytes = Arc::new(AtomicU64::new(0));
        let bytes_counter = backend_to_client_bytes.clone();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; receive_buf.max(1)];

            loop {
                let n = match backend_read.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) => {
                        log::warn!("backend pump: read failed: {err}");
                        break;
                    }
                };

                let packet = Packet::Data(DataBody {
                    payload: buf[..n].to_vec(),
                });

                if let Err(err) = transport.lock().await.write_packet(&packet).await {
                    log::warn!("backend pump: forward to client failed: {err}");
                    break;
                }

                bytes_counter.fetch_add(n as u64, Ordering::Relaxed);
            }
        });

        Self {
            backend_writer,
            task,
            client_to_backend_bytes: AtomicU64::new(0),
            backend_to_client_bytes,
        }
    }

    /// Forwards a client `DATA` payload to the backend. Called from the
    /// session driver loop for every inbound `DATA` packet while `OPENED`.
    pub async fn forward_to_backend(&self, payload: &[u8]) -> Result<(), TransportError> {
        use tokio::io::AsyncWriteExt;

        self.backend_writer
            .lock()
            .await
            .write_all(payload)
            .await
            .map_err(|err| TransportError::Io(err.to_string()))?;

        self.client_to_backend_bytes
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Total bytes relayed in each direction so far. The driver reads this
    /// once the pump loop ends to fill in `Session`'s byte counters.
    pub fn bytes_relayed(&self) -> (u64, u64) {
        (
            self.client_to_backend_bytes.load(Ordering::Relaxed),
            self.backend_to_client_bytes.load(Ordering::Relaxed),
        )
    }

    /// Resolves when the backend→client task has ended (backend closed or
    /// errored). The driver loop `select!`s on this so a dead backend
    /// terminates the session promptly.
    pub fn backend_closed(&mut self) -> &mut JoinHandle<()> {
        &mut self.task
    }

    /// Tears down both halves: aborts the spawned task and shuts the
    /// backend socket down so no sockets leak on any exit path.
    pub async fn shutdown(mut self) {
        self.task.abort();

        use tokio::io::AsyncWriteExt;
        let _ = self.backend_writer.lock().await.shutdown().await;
    }
}
