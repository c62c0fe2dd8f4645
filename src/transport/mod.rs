use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::RpcError;
use crate::message::{Reply, Request};

/// The bundled datagram transport.
pub mod udp;
pub use udp::UdpTransport;

/// An incoming request paired with the slot its reply goes into.
///
/// Dropping the sender without replying is allowed; the peer simply times
/// out, which it must be able to survive anyway.
pub struct Inbound {
    /// The decoded request.
    pub request: Request,
    /// Where the handler puts the reply.
    pub reply: oneshot::Sender<Reply>,
}

/// The request/response channel every layer above the network talks
/// through. This is the only place network failure is visible; callers
/// treat [`RpcError::Timeout`] and [`RpcError::Unreachable`] identically
/// as "peer presumed dead for this attempt".
///
/// Messages are independent; an implementation may retransmit internally a
/// bounded number of times but must surface failure within the timeout it
/// was bound with.
pub trait Transport: Send + Sync + Sized + 'static {
    /// Binds `endpoint` and delivers incoming requests to `inbound` until
    /// shut down.
    fn bind(
        endpoint: String,
        rpc_timeout: Duration,
        inbound: mpsc::Sender<Inbound>,
    ) -> impl Future<Output = io::Result<Self>> + Send;

    /// One RPC: sends `request` to `peer` and waits for the matching reply.
    fn call(
        &self,
        peer: &str,
        request: Request,
    ) -> impl Future<Output = Result<Reply, RpcError>> + Send;

    /// The bound local address.
    fn local_endpoint(&self) -> &str;

    /// Stops the receive loop. Idempotent; also runs on drop.
    fn shutdown(&self);
}
