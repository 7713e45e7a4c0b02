//! HTTP dual-channel transport. `spec.md` §4.2 / `SPEC_FULL.md` §9.
//!
//! RDG's classic transport: the client opens two HTTP requests against the
//! same correlation id, an IN channel (client to gateway, a chunked POST
//! body) and an OUT channel (gateway to client, a chunked response body).
//! [`PairingRegistry`] rendezvouses the two within a configurable window;
//! [`HttpDualChannel`] is the resulting `Transport` once both halves exist.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use codec::{Packet, PacketHeader, HEADER_LEN};
use engine::transport::{Transport, TransportError};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use uuid::Uuid;

#[derive(Default)]
struct State {
    in_ready: HashMap<Uuid, mpsc::Receiver<Bytes>>,
    out_waiting: HashMap<Uuid, oneshot::Sender<mpsc::Receiver<Bytes>>>,
}

#[derive(Clone, Default)]
pub struct PairingRegistry {
    inner: Arc<Mutex<State>>,
}

impl PairingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn deposit_in(&self, id: Uuid, rx: mpsc::Receiver<Bytes>) {
        let mut state = self.inner.lock();
        if let Some(waiter) = state.out_waiting.remove(&id) {
            // the receiving half may already be gone if the OUT channel's
            // wait timed out; dropping `rx` here is fine, it just means
            // this IN channel's bytes are discarded.
            let _ = waiter.send(rx);
        } else {
            state.in_ready.insert(id, rx);
        }
    }

    async fn wait_for_in(
        &self,
        id: Uuid,
        pairing_timeout: Duration,
    ) -> Result<mpsc::Receiver<Bytes>, TransportError> {
        if let Some(rx) = self.inner.lock().in_ready.remove(&id) {
            return Ok(rx);
        }

        let (tx, rx) = oneshot::channel();
        self.inner.lock().out_waiting.insert(id, tx);

        match timeout(pairing_timeout, rx).await {
            Ok(Ok(rx)) => Ok(rx),
            _ => {
                self.inner.lock().out_waiting.remove(&id);
                Err(TransportError::Closed(
                    "IN channel did not arrive within the pairing window".to_string(),
                ))
            }
        }
    }
}

/// Drains an IN-channel POST body into the pairing registry. Runs for the
/// lifetime of the request: returns once the client closes the body or the
/// paired `HttpDualChannel` stops reading (the receiver is dropped).
pub async fn deposit_in_channel(registry: &PairingRegistry, id: Uuid, body: Body) {
    let (tx, rx) = mpsc::channel(64);
    registry.deposit_in(id, rx);

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if tx.send(bytes).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                log::debug!("http dual channel {id}: IN body error: {err}");
                break;
            }
        }
    }
}

/// Pairs an OUT-channel request with its IN channel and returns the
/// resulting transport alongside the byte stream to hand back as the OUT
/// response body.
pub async fn accept_out_channel(
    registry: &PairingRegistry,
    id: Uuid,
    pairing_timeout: Duration,
) -> Result<(HttpDualChannel, impl Stream<Item = Result<Bytes, Infallible>>), TransportError> {
    let in_rx = registry.wait_for_in(id, pairing_timeout).await?;
    let (out_tx, out_rx) = mpsc::channel(64);

    let transport = HttpDualChannel {
        in_rx,
        read_buf: BytesMut::new(),
        out_tx,
    };

    let body_stream = futures::stream::unfold(out_rx, |mut rx| async move {
        rx.recv().await.map(|bytes| (Ok(bytes), rx))
    });

    Ok((transport, body_stream))
}

pub struct HttpDualChannel {
    in_rx: mpsc::Receiver<Bytes>,
    read_buf: BytesMut,
    out_tx: mpsc::Sender<Bytes>,
}

impl HttpDualChannel {
    fn try_decode(&mut self) -> Result<Option<Packet>, TransportError> {
        if self.read_buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = PacketHeader::decode(&self.read_buf).map_err(TransportError::Decode)?;
        let total = header.length as usize;
        if self.read_buf.len() < total {
            return Ok(None);
        }

        let frame = self.read_buf.split_to(total);
        let packet =
            Packet::decode(&header, &frame[HEADER_LEN..]).map_err(TransportError::Decode)?;
        Ok(Some(packet))
    }
}

#[async_trait]
impl Transport for HttpDualChannel {
    async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        loop {
            if let Some(packet) = self.try_decode()? {
                return Ok(Some(packet));
            }

            match self.in_rx.recv().await {
                Some(chunk) => self.read_buf.extend_from_slice(&chunk),
                None if self.read_buf.is_empty() => return Ok(None),
                None => {
                    return Err(TransportError::Closed(
                        "IN channel ended mid-frame".to_string(),
                    ))
                }
            }
        }
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let mut buf = BytesMut::new();
        packet
            .encode(&mut buf)
            .map_err(|err| TransportError::Io(err.to_string()))?;

        self.out_tx
            .send(buf.freeze())
            .await
            .map_err(|_| TransportError::Closed("OUT channel receiver dropped".to_string()))
    }

    async fn close(&mut self) {
        self.in_rx.close();
    }
}
