use std::time::Duration;

use crate::id::Id;

/// Runtime parameters for a node.
///
/// Only `endpoint` is mandatory; everything else defaults to the values a
/// production ring would use. Tests typically shrink `bits` and the timer
/// intervals.
#[derive(Clone, Debug)]
pub struct Config {
    /// Local bind address, also the node's stable public name. Its hash is
    /// the node id unless [`Config::id`] overrides it.
    pub endpoint: String,
    /// Optional fixed node id, reduced modulo `2^bits` at startup.
    pub id: Option<Id>,
    /// Identifier bit width `m`.
    pub bits: u32,
    /// Successor list length and replication factor `r`.
    pub replicas: usize,
    /// Interval between stabilize rounds.
    pub stabilize_interval: Duration,
    /// Interval between finger repairs (one finger per tick).
    pub fix_fingers_interval: Duration,
    /// Interval between predecessor liveness checks.
    pub check_predecessor_interval: Duration,
    /// Per-RPC timeout, retransmissions included.
    pub rpc_timeout: Duration,
    /// Existing peer to join through; `None` creates a new ring.
    pub bootstrap: Option<String>,
    /// Upper bound on the serialized size of one message; larger batches
    /// are chunked.
    pub mtu: usize,
}

impl Default for Config {
    /// Production defaults on an OS-assigned loopback port.
    fn default() -> Self {
        Config::new("127.0.0.1:0")
    }
}

impl Config {
    /// A config with production defaults, bound to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Config {
            endpoint: endpoint.into(),
            id: None,
            bits: 160,
            replicas: 3,
            stabilize_interval: Duration::from_millis(500),
            fix_fingers_interval: Duration::from_millis(500),
            check_predecessor_interval: Duration::from_secs(1),
            rpc_timeout: Duration::from_secs(1),
            bootstrap: None,
            mtu: 1400,
        }
    }

    /// Sets the peer to join through when the node starts.
    pub fn with_bootstrap(mut self, peer: impl Into<String>) -> Self {
        self.bootstrap = Some(peer.into());
        self
    }

    /// Fixes the node id instead of deriving it from the endpoint.
    pub fn with_id(mut self, id: Id) -> Self {
        self.id = Some(id);
        self
    }
}
