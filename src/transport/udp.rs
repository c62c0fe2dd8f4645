use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{Inbound, Transport};
use crate::error::RpcError;
use crate::message::{Reply, Request};

// Total send attempts per call; the timeout budget is split across them.
const ATTEMPTS: u32 = 2;

/// One datagram on the wire, correlated by `seq`.
#[derive(Debug, Serialize, Deserialize)]
enum Frame {
    Request { seq: u64, body: Request },
    Reply { seq: u64, body: Reply },
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Datagram transport: one UDP socket, serde_json frames, request-id
/// correlation and bounded retransmission.
///
/// Requests and replies share the socket. A retransmitted request can
/// produce a duplicate delivery on the receiving side; every protocol
/// message is idempotent, so duplicates are tolerated rather than tracked.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local: String,
    pending: PendingMap,
    next_seq: AtomicU64,
    rpc_timeout: Duration,
    listener: JoinHandle<()>,
}

impl Transport for UdpTransport {
    async fn bind(
        endpoint: String,
        rpc_timeout: Duration,
        inbound: mpsc::Sender<Inbound>,
    ) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(&endpoint).await?);
        // a ":0" bind means "pick a port"; the real address is our name
        let local = if endpoint.ends_with(":0") {
            socket.local_addr()?.to_string()
        } else {
            endpoint
        };
        info!(endpoint = %local, "listening");

        let pending = PendingMap::default();
        let listener = {
            let socket = socket.clone();
            let pending = pending.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    let (len, peer) = match socket.recv_from(&mut buf).await {
                        Ok(received) => received,
                        Err(e) => {
                            warn!("recv error: {e}");
                            continue;
                        }
                    };
                    match serde_json::from_slice::<Frame>(&buf[..len]) {
                        Ok(Frame::Request { seq, body }) => {
                            let (reply_tx, reply_rx) = oneshot::channel();
                            let delivered = inbound
                                .send(Inbound {
                                    request: body,
                                    reply: reply_tx,
                                })
                                .await;
                            if delivered.is_err() {
                                // node is gone, nothing left to serve
                                return;
                            }
                            let socket = socket.clone();
                            tokio::spawn(async move {
                                if let Ok(body) = reply_rx.await {
                                    let frame = Frame::Reply { seq, body };
                                    match serde_json::to_vec(&frame) {
                                        Ok(bytes) => {
                                            let _ = socket.send_to(&bytes, peer).await;
                                        }
                                        Err(e) => warn!("encoding reply failed: {e}"),
                                    }
                                }
                            });
                        }
                        Ok(Frame::Reply { seq, body }) => {
                            let waiter = pending
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .remove(&seq);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(body);
                                }
                                // a late duplicate after retransmission
                                None => debug!(seq, "dropping unexpected reply"),
                            }
                        }
                        Err(e) => debug!(%peer, "dropping undecodable datagram: {e}"),
                    }
                }
            })
        };

        Ok(UdpTransport {
            socket,
            local,
            pending,
            next_seq: AtomicU64::new(1),
            rpc_timeout,
            listener,
        })
    }

    async fn call(&self, peer: &str, request: Request) -> Result<Reply, RpcError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::Request { seq, body: request };
        let bytes = serde_json::to_vec(&frame)
            .map_err(|e| RpcError::Unreachable(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let (tx, mut rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(seq, tx);

        let per_attempt = self.rpc_timeout / ATTEMPTS;
        let mut outcome = Err(RpcError::Timeout);
        for _ in 0..ATTEMPTS {
            if let Err(e) = self.socket.send_to(&bytes, peer).await {
                outcome = Err(RpcError::Unreachable(e));
                break;
            }
            match timeout(per_attempt, &mut rx).await {
                Ok(Ok(reply)) => {
                    outcome = Ok(reply);
                    break;
                }
                Ok(Err(_)) => break, // transport torn down mid-call
                Err(_) => continue,  // retransmit within the budget
            }
        }
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&seq);
        outcome
    }

    fn local_endpoint(&self) -> &str {
        &self.local
    }

    fn shutdown(&self) {
        self.listener.abort();
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
