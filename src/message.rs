use serde::{Deserialize, Serialize};

use crate::id::Id;
use crate::store::Entry;

/// A ring participant, named by id and transport endpoint.
///
/// Neighbor references are plain values, not live connections: a stale
/// `NodeRef` is repaired by overwriting it, never by tearing anything down.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    /// The peer's ring id.
    pub id: Id,
    /// The peer's transport address.
    pub endpoint: String,
}

impl std::fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.endpoint)
    }
}

/// Requests exchanged between peers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    // Overlay maintenance
    /// Who succeeds `id` on the ring?
    FindSuccessor {
        /// The id being resolved.
        id: Id,
    },
    /// The receiver's current predecessor, if any.
    GetPredecessor,
    /// "I might be your predecessor."
    Notify {
        /// The sender, offering itself as predecessor.
        candidate: NodeRef,
    },
    /// The receiver's successor list.
    GetSuccessorList,
    /// Liveness probe.
    Ping,

    // Store operations
    /// Read a key. Sent to the believed owner; the receiver also consults
    /// its replica slots so reads survive a just-failed owner.
    Get {
        /// Canonical key bytes.
        key: String,
    },
    /// Write a key at its owner.
    Put {
        /// Canonical key bytes.
        key: String,
        /// The value to store.
        value: String,
    },
    /// Owner pushing copies of its keys into the receiver's replica slot
    /// `slot`. `reset` marks the first chunk of a full-state push and
    /// clears the slot of stale keys.
    Replicate {
        /// Receiver-local replica slot: the sender's offset in the
        /// receiver's predecessor chain.
        slot: usize,
        /// True on the first chunk of a full-state push.
        reset: bool,
        /// The replicated pairs.
        entries: Vec<Entry>,
    },
    /// Ownership of `(from, to]` is moving to the receiver; `last` closes
    /// the (possibly chunked) batch.
    Handoff {
        /// Exclusive lower bound of the moved range.
        from: Id,
        /// Inclusive upper bound of the moved range.
        to: Id,
        /// True on the final chunk of the batch.
        last: bool,
        /// The pairs changing owner.
        entries: Vec<Entry>,
    },
    /// Graceful departure notice. The leaver tells its successor about its
    /// predecessor and vice versa; owned keys travel separately as
    /// [`Request::Handoff`] batches.
    Leave {
        /// The departing node.
        leaver: NodeRef,
        /// For the leaver's successor: the node to adopt as predecessor.
        predecessor: Option<NodeRef>,
        /// For the leaver's predecessor: the node to adopt as successor.
        successor: Option<NodeRef>,
    },
}

/// Replies, one per request kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Reply {
    /// The definitive successor of the requested id.
    Found {
        /// The owner of the requested id.
        node: NodeRef,
    },
    /// Not known here; ask this closer node instead.
    Forward {
        /// The closest preceding node the receiver knows of.
        node: NodeRef,
    },
    /// The receiver's predecessor, or `None`.
    Predecessor {
        /// Current predecessor pointer.
        node: Option<NodeRef>,
    },
    /// The receiver's successor list, clockwise-nearest first.
    SuccessorList {
        /// Up to `r` successors.
        nodes: Vec<NodeRef>,
    },
    /// Liveness answer.
    Pong,
    /// The value under a key, or `None` if absent.
    Value {
        /// The stored value, if any.
        value: Option<String>,
    },
    /// Positive acknowledgement.
    Ack,
    /// The receiver declines to serve the request.
    Refused {
        /// Why the request was declined.
        why: Refusal,
    },
}

/// Reasons a peer declines a data operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Refusal {
    /// The receiver is still joining and may not serve its range yet.
    NotReady,
    /// The receiver does not own the key; the caller's routing is stale.
    WrongOwner,
}
