use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::Shared;
use crate::error::Error;
use crate::id::Id;
use crate::message::{NodeRef, Refusal, Reply, Request};
use crate::store::{chunk_entries, Entry};
use crate::transport::Transport;

impl<T: Transport> Shared<T> {
    /// GET received. Owners answer from their stores; non-owners answer
    /// only if a replica slot has the key, so reads survive a just-failed
    /// owner whose range we are about to absorb.
    pub(super) fn handle_get(&self, key: &str) -> Reply {
        let state = self.state();
        let id = self.space.hash(key.as_bytes());
        if state.routing.owns(&id) {
            if !state.ready {
                return Reply::Refused {
                    why: Refusal::NotReady,
                };
            }
            return Reply::Value {
                value: state.store.get(key).map(str::to_string),
            };
        }
        match state.store.get(key) {
            Some(value) => Reply::Value {
                value: Some(value.to_string()),
            },
            None => Reply::Refused {
                why: Refusal::WrongOwner,
            },
        }
    }

    /// PUT received. The write is acknowledged once the primary map has
    /// it; replicas catch up asynchronously and, failing that, on the next
    /// stabilize round.
    pub(super) fn handle_put(self: Arc<Self>, key: String, value: String) -> Reply {
        let id = self.space.hash(key.as_bytes());
        {
            let mut state = self.state();
            if !state.routing.owns(&id) {
                return Reply::Refused {
                    why: Refusal::WrongOwner,
                };
            }
            if !state.ready {
                return Reply::Refused {
                    why: Refusal::NotReady,
                };
            }
            state.store.put_primary(key.clone(), value.clone());
        }
        tokio::spawn(async move { self.replicate_one(Entry { key, value }).await });
        Reply::Ack
    }

    /// REPLICATE received: copies land in the named replica slot.
    pub(super) fn handle_replicate(&self, slot: usize, reset: bool, entries: Vec<Entry>) -> Reply {
        self.state().store.store_replicas(slot, entries, reset);
        Reply::Ack
    }

    /// HANDOFF received: the sender is shedding keys we now own.
    pub(super) fn handle_handoff(
        &self,
        from: Id,
        to: Id,
        last: bool,
        entries: Vec<Entry>,
    ) -> Reply {
        debug!(%from, %to, n = entries.len(), "absorbing handoff");
        let mut state = self.state();
        state.store.absorb_primary(entries);
        if last {
            state.handoff_received = true;
            if !state.ready && state.rounds >= 1 {
                state.ready = true;
            }
        }
        Reply::Ack
    }

    /// The admin-surface write: route to the owner, retrying around stale
    /// or dead candidates a bounded number of times.
    pub(super) async fn admin_put(self: Arc<Self>, key: String, value: String) -> Result<(), Error> {
        let id = self.space.hash(key.as_bytes());
        let mut avoid = HashSet::new();
        let mut last = Error::Routing;
        for _ in 0..=self.config.replicas {
            let owner = self.find_successor_avoiding(&id, avoid.clone()).await?;
            if owner.id == self.local.id {
                return match self.handle_put(key, value) {
                    Reply::Ack => Ok(()),
                    Reply::Refused {
                        why: Refusal::NotReady,
                    } => Err(Error::NotReady),
                    _ => Err(Error::Routing),
                };
            }
            let request = Request::Put {
                key: key.clone(),
                value: value.clone(),
            };
            match self.transport.call(&owner.endpoint, request).await {
                Ok(Reply::Ack) => {
                    self.state().routing.record_success(&owner.id);
                    return Ok(());
                }
                Ok(Reply::Refused {
                    why: Refusal::NotReady,
                }) => return Err(Error::NotReady),
                Ok(_) => {
                    // stale route; look again without this candidate
                    last = Error::Routing;
                    avoid.insert(owner.id);
                }
                Err(_) => {
                    last = Error::Timeout;
                    self.state().routing.record_failure(&owner.id);
                    avoid.insert(owner.id);
                }
            }
        }
        Err(last)
    }

    /// The admin-surface read. `Ok(None)` is an authoritative miss from
    /// the owner; when neither the owner nor any replica holder responds
    /// the result degrades to `NotFound`.
    pub(super) async fn admin_get(&self, key: &str) -> Result<Option<String>, Error> {
        let id = self.space.hash(key.as_bytes());
        let mut avoid = HashSet::new();
        let mut rpc_failed = false;
        for _ in 0..=self.config.replicas {
            let owner = match self.find_successor_avoiding(&id, avoid.clone()).await {
                Ok(owner) => owner,
                Err(e) => return Err(if rpc_failed { Error::NotFound } else { e }),
            };
            if owner.id == self.local.id {
                return match self.handle_get(key) {
                    Reply::Value { value } => Ok(value),
                    Reply::Refused {
                        why: Refusal::NotReady,
                    } => Err(Error::NotReady),
                    _ => Err(Error::Routing),
                };
            }
            let request = Request::Get {
                key: key.to_string(),
            };
            match self.transport.call(&owner.endpoint, request).await {
                Ok(Reply::Value { value }) => {
                    self.state().routing.record_success(&owner.id);
                    return Ok(value);
                }
                Ok(Reply::Refused {
                    why: Refusal::NotReady,
                }) => return Err(Error::NotReady),
                Ok(_) => {
                    avoid.insert(owner.id);
                }
                Err(_) => {
                    rpc_failed = true;
                    self.state().routing.record_failure(&owner.id);
                    avoid.insert(owner.id);
                }
            }
        }
        Err(if rpc_failed {
            Error::NotFound
        } else {
            Error::Routing
        })
    }

    /// Pushes one fresh write to every replica holder. Failures mark the
    /// slot dirty so stabilize re-pushes the full state.
    pub(super) async fn replicate_one(&self, entry: Entry) {
        let successors = self.state().routing.successors().to_vec();
        for slot in 0..self.config.replicas {
            let Some(node) = successors.get(slot) else {
                break;
            };
            if node.id == self.local.id {
                continue;
            }
            if !self.replicate_to(node, slot, vec![entry.clone()], false).await {
                let mut state = self.state();
                state.dirty[slot] = true;
                state.routing.record_failure(&node.id);
            }
        }
    }

    /// Full-state pushes to every successor whose slot is new or dirty.
    /// Called from stabilize, after predecessor failure, and after the
    /// successor list changes.
    pub(super) async fn push_replicas(&self) {
        let (targets, entries) = {
            let state = self.state();
            let successors = state.routing.successors().to_vec();
            let mut targets = Vec::new();
            for slot in 0..self.config.replicas {
                if let Some(node) = successors.get(slot) {
                    if node.id == self.local.id {
                        continue;
                    }
                    if state.pushed[slot].as_ref() != Some(&node.id) || state.dirty[slot] {
                        targets.push((slot, node.clone()));
                    }
                }
            }
            if targets.is_empty() {
                return;
            }
            (targets, state.store.primary_entries())
        };

        for (slot, node) in targets {
            let pushed = self.replicate_to(&node, slot, entries.clone(), true).await;
            let mut state = self.state();
            if pushed {
                state.pushed[slot] = Some(node.id.clone());
                state.dirty[slot] = false;
                state.routing.record_success(&node.id);
            } else {
                state.pushed[slot] = None;
                state.dirty[slot] = true;
                state.routing.record_failure(&node.id);
            }
        }
    }

    /// Ships `entries` into the peer's replica slot `slot`, chunked under
    /// the MTU. A full push resets the slot with its first chunk so stale
    /// replicas disappear.
    async fn replicate_to(&self, node: &NodeRef, slot: usize, entries: Vec<Entry>, full: bool) -> bool {
        let chunks = if entries.is_empty() {
            vec![Vec::new()]
        } else {
            chunk_entries(entries, self.config.mtu)
        };
        let mut reset = full;
        for chunk in chunks {
            let request = Request::Replicate {
                slot,
                reset,
                entries: chunk,
            };
            match self.transport.call(&node.endpoint, request).await {
                Ok(Reply::Ack) => reset = false,
                Ok(_) | Err(_) => return false,
            }
        }
        true
    }

    /// Ships a handoff batch, chunked under the MTU, `last` closing it.
    pub(super) async fn send_handoff(
        &self,
        target: &NodeRef,
        from: &Id,
        to: &Id,
        entries: Vec<Entry>,
    ) -> bool {
        let mut chunks = chunk_entries(entries, self.config.mtu);
        if chunks.is_empty() {
            chunks.push(Vec::new());
        }
        let total = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let request = Request::Handoff {
                from: from.clone(),
                to: to.clone(),
                last: index + 1 == total,
                entries: chunk,
            };
            match self.transport.call(&target.endpoint, request).await {
                Ok(Reply::Ack) => {}
                Ok(_) | Err(_) => return false,
            }
        }
        true
    }

    /// Hands `batch` to a new predecessor. The keys stay readable here
    /// until the ack lands, then anything we no longer own is dropped.
    pub(super) async fn handoff_to(&self, target: NodeRef, batch: Vec<Entry>) {
        debug!(target = ?target, n = batch.len(), "handing off out-of-range keys");
        let delivered = self
            .send_handoff(&target, &self.local.id, &target.id, batch.clone())
            .await;
        let mut state = self.state();
        if delivered {
            state.routing.record_success(&target.id);
            if let Some(pred) = state.routing.predecessor.clone() {
                state.store.remove_unless_owned(&batch, &pred.id, &self.local.id);
            }
        } else {
            warn!(target = ?target, "handoff failed; retrying next stabilize round");
            state.routing.record_failure(&target.id);
        }
    }

    /// Retries any handoff the notify-time push did not finish: owned
    /// entries outside `(predecessor, self]` belong to the predecessor.
    pub(super) async fn retry_pending_handoff(&self) {
        let pending = {
            let state = self.state();
            match &state.routing.predecessor {
                Some(pred) if pred.id != self.local.id => {
                    let batch = state.store.entries_outside(&pred.id, &self.local.id);
                    if batch.is_empty() {
                        None
                    } else {
                        Some((pred.clone(), batch))
                    }
                }
                _ => None,
            }
        };
        if let Some((target, batch)) = pending {
            self.handoff_to(target, batch).await;
        }
    }
}
