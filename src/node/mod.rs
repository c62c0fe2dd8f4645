use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Error;
use crate::id::{Id, IdSpace};
use crate::message::{NodeRef, Reply, Request};
use crate::routing::RoutingState;
use crate::store::KeyStore;
use crate::transport::{Inbound, Transport};

mod overlay;
mod storage;

/// A node that has not started yet. Configure it, then consume it with
/// [`Node::start`] to join (or create) a ring and obtain a
/// [`NodeHandle`].
#[derive(Debug)]
pub struct Node<T: Transport> {
    config: Config,
    _transport: PhantomData<T>,
}

impl<T: Transport> Node<T> {
    /// A node described by `config`; nothing happens until `start`.
    pub fn new(config: Config) -> Self {
        Node {
            config,
            _transport: PhantomData,
        }
    }

    /// Binds the transport, joins through the configured bootstrap peer
    /// (or creates a fresh ring), and spawns the processor loop and the
    /// periodic maintenance tasks.
    pub async fn start(self) -> Result<NodeHandle<T>, Error> {
        let space = IdSpace::new(self.config.bits);
        let (inbound_tx, mut inbound_rx) = mpsc::channel(64);
        let transport =
            T::bind(self.config.endpoint.clone(), self.config.rpc_timeout, inbound_tx).await?;
        let endpoint = transport.local_endpoint().to_string();
        let id = match self.config.id.clone() {
            Some(id) => space.reduce(id),
            None => space.hash(endpoint.as_bytes()),
        };
        let local = NodeRef { id, endpoint };
        info!(node = ?local, "starting");

        let r = self.config.replicas;
        let state = State {
            routing: RoutingState::new(space, local.clone(), r),
            store: KeyStore::new(space, r),
            // a created ring serves immediately; a joiner must stabilize
            // and receive its handoff first
            ready: self.config.bootstrap.is_none(),
            handoff_received: false,
            rounds: 0,
            pushed: vec![None; r],
            dirty: vec![false; r],
        };
        let shared = Arc::new(Shared {
            space,
            local,
            config: self.config,
            transport,
            state: Mutex::new(state),
        });

        if let Some(bootstrap) = shared.config.bootstrap.clone() {
            shared.join(&bootstrap).await?;
        }

        // The processor loop: the single serialization point for state
        // changes. Handlers never perform RPCs inline; anything that has
        // to talk to a peer is spawned off with a state snapshot.
        let processor = {
            let shared = shared.clone();
            tokio::spawn(async move {
                while let Some(Inbound { request, reply }) = inbound_rx.recv().await {
                    debug!(?request, "processing");
                    let _ = reply.send(shared.clone().handle_request(request));
                }
                debug!("processor loop terminating");
            })
        };

        let stabilize = {
            let shared = shared.clone();
            tokio::spawn(async move {
                let mut ticks = interval(shared.config.stabilize_interval);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticks.tick().await;
                    shared.stabilize_round().await;
                }
            })
        };
        let fix_fingers = {
            let shared = shared.clone();
            tokio::spawn(async move {
                let mut ticks = interval(shared.config.fix_fingers_interval);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticks.tick().await;
                    shared.fix_fingers_tick().await;
                }
            })
        };
        let check_predecessor = {
            let shared = shared.clone();
            tokio::spawn(async move {
                let mut ticks = interval(shared.config.check_predecessor_interval);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticks.tick().await;
                    shared.check_predecessor_tick().await;
                }
            })
        };

        Ok(NodeHandle {
            shared,
            tasks: vec![processor, stabilize, fix_fingers, check_predecessor],
        })
    }
}

/// Mutable node state, guarded by the serialization point.
pub(crate) struct State {
    pub(crate) routing: RoutingState,
    pub(crate) store: KeyStore,
    pub(crate) ready: bool,
    pub(crate) handoff_received: bool,
    pub(crate) rounds: u64,
    /// Per replica slot: the successor the primary map was last fully
    /// pushed to.
    pub(crate) pushed: Vec<Option<Id>>,
    /// Per replica slot: a push failed, re-push on the next stabilize.
    pub(crate) dirty: Vec<bool>,
}

/// Everything the tasks of one node share.
pub(crate) struct Shared<T: Transport> {
    pub(crate) space: IdSpace,
    pub(crate) local: NodeRef,
    pub(crate) config: Config,
    pub(crate) transport: T,
    state: Mutex<State>,
}

impl<T: Transport> Shared<T> {
    /// Locks the state block. Short critical sections only; the guard must
    /// never live across an RPC.
    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_request(self: Arc<Self>, request: Request) -> Reply {
        match request {
            Request::FindSuccessor { id } => self.handle_find_successor(id),
            Request::GetPredecessor => Reply::Predecessor {
                node: self.state().routing.predecessor.clone(),
            },
            Request::Notify { candidate } => self.handle_notify(candidate),
            Request::GetSuccessorList => Reply::SuccessorList {
                nodes: self.state().routing.successors().to_vec(),
            },
            Request::Ping => Reply::Pong,
            Request::Get { key } => self.handle_get(&key),
            Request::Put { key, value } => self.handle_put(key, value),
            Request::Replicate {
                slot,
                reset,
                entries,
            } => self.handle_replicate(slot, reset, entries),
            Request::Handoff {
                from,
                to,
                last,
                entries,
            } => self.handle_handoff(from, to, last, entries),
            Request::Leave {
                leaver,
                predecessor,
                successor,
            } => self.handle_leave(leaver, predecessor, successor),
        }
    }
}

/// A started node. Dropping the handle (or calling [`NodeHandle::stop`])
/// cancels the maintenance tasks first and closes the transport second.
pub struct NodeHandle<T: Transport> {
    shared: Arc<Shared<T>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T: Transport> NodeHandle<T> {
    /// This node's ring id.
    pub fn id(&self) -> &Id {
        &self.shared.local.id
    }

    /// This node's transport address.
    pub fn endpoint(&self) -> &str {
        &self.shared.local.endpoint
    }

    /// Stores `value` under `key` at the key's owner, wherever it lives.
    pub async fn put(&self, key: String, value: String) -> Result<(), Error> {
        self.shared.clone().admin_put(key, value).await
    }

    /// Fetches the value under `key`. `Ok(None)` means the owner was
    /// reached and the key is absent, which is distinct from any `Err`.
    pub async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.shared.admin_get(key).await
    }

    /// Resolves the node responsible for `key`.
    pub async fn lookup(&self, key: &str) -> Result<NodeRef, Error> {
        let id = self.shared.space.hash(key.as_bytes());
        self.shared.find_successor(&id).await
    }

    /// A snapshot of this node's view of the ring.
    pub fn info(&self) -> NodeInfo {
        let state = self.shared.state();
        NodeInfo {
            id: self.shared.local.id.clone(),
            endpoint: self.shared.local.endpoint.clone(),
            ready: state.ready,
            predecessor: state.routing.predecessor.clone(),
            successors: state.routing.successors().to_vec(),
            fingers: state.routing.compact_fingers(),
            primary_keys: state.store.primary_len(),
            replica_keys: state.store.replica_lens(),
        }
    }

    /// Departs gracefully: hands the owned keys to the successor, tells
    /// both neighbors about each other, then shuts down.
    pub async fn leave(mut self) -> Result<(), Error> {
        self.shared.graceful_leave().await;
        self.teardown();
        Ok(())
    }

    /// Shuts the node down without ceremony. Peers discover the departure
    /// through their own failure detection.
    pub fn stop(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.shared.transport.shutdown();
    }
}

impl<T: Transport> Drop for NodeHandle<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// What [`NodeHandle::info`] reports.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    /// The node's ring id.
    pub id: Id,
    /// The node's transport address.
    pub endpoint: String,
    /// False while the node is still joining.
    pub ready: bool,
    /// Current predecessor pointer.
    pub predecessor: Option<NodeRef>,
    /// The successor list, clockwise-nearest first.
    pub successors: Vec<NodeRef>,
    /// The finger table with empty and repeated entries collapsed.
    pub fingers: Vec<(u32, NodeRef)>,
    /// Number of keys this node owns.
    pub primary_keys: usize,
    /// Keys held on behalf of each predecessor position.
    pub replica_keys: Vec<usize>,
}
