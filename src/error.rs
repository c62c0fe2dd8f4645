use crate::id::Id;

/// Errors surfaced by the admin surface and at node startup.
///
/// Transport failures never escape as transport errors: by the time an
/// operation returns they have been folded into [`Error::Timeout`],
/// [`Error::Routing`] or [`Error::NotFound`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key is absent at its owner and no replica responded.
    #[error("key not found")]
    NotFound,
    /// A peer did not answer within the RPC timeout.
    #[error("peer did not respond within the timeout")]
    Timeout,
    /// A lookup ran out of live candidates before reaching the owner.
    #[error("lookup exhausted its routing candidates")]
    Routing,
    /// The node has not finished joining and cannot serve its range yet.
    #[error("node is still joining the ring")]
    NotReady,
    /// Another live node already occupies this node's id.
    #[error("id {0} already taken by another node")]
    IdCollision(Id),
    /// Binding the local endpoint failed.
    #[error("transport: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single RPC attempt, as seen by the transport adapter.
///
/// Higher layers treat both variants identically: the peer is presumed
/// dead for this attempt.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No reply arrived within the timeout, retransmissions included.
    #[error("rpc timed out")]
    Timeout,
    /// The datagram could not be sent at all.
    #[error("peer unreachable: {0}")]
    Unreachable(std::io::Error),
}

impl From<RpcError> for Error {
    fn from(_: RpcError) -> Self {
        Error::Timeout
    }
}
