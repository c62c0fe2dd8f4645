use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::Shared;
use crate::error::Error;
use crate::id::Id;
use crate::message::{NodeRef, Reply, Request};
use crate::transport::Transport;

impl<T: Transport> Shared<T> {
    /// Joins through `bootstrap`: resolve our own id's successor, adopt it,
    /// and seed the successor list from its list. The predecessor stays
    /// unset; stabilization fills it in.
    pub(super) async fn join(&self, bootstrap: &str) -> Result<(), Error> {
        info!(bootstrap, "joining ring");
        let mut endpoint = bootstrap.to_string();
        let mut successor = None;
        for _ in 0..self.hop_budget() {
            let request = Request::FindSuccessor {
                id: self.local.id.clone(),
            };
            match self.transport.call(&endpoint, request).await {
                Ok(Reply::Found { node }) => {
                    successor = Some(node);
                    break;
                }
                Ok(Reply::Forward { node }) => {
                    if node.endpoint == endpoint {
                        break;
                    }
                    endpoint = node.endpoint;
                }
                Ok(_) => return Err(Error::Routing),
                Err(e) => return Err(e.into()),
            }
        }
        let successor = successor.ok_or(Error::Routing)?;
        if successor.id == self.local.id {
            return Err(Error::IdCollision(self.local.id.clone()));
        }

        let list = match self
            .transport
            .call(&successor.endpoint, Request::GetSuccessorList)
            .await
        {
            Ok(Reply::SuccessorList { nodes }) => nodes,
            Ok(_) | Err(_) => Vec::new(),
        };
        self.state().routing.update_successor_list(successor, list);
        Ok(())
    }

    /// Answers a FIND_SUCCESSOR step from local state only: either the key
    /// falls to our primary successor, or we point the caller at the
    /// closest preceding node we know.
    pub(super) fn handle_find_successor(&self, id: Id) -> Reply {
        let state = self.state();
        let succ = state.routing.successor().clone();
        if id.in_half_open(&self.local.id, &succ.id) {
            return Reply::Found { node: succ };
        }
        let next = state.routing.closest_preceding_node(&id, &HashSet::new());
        if next.id == self.local.id {
            // nothing better to offer; progress guard
            Reply::Found { node: succ }
        } else {
            Reply::Forward { node: next }
        }
    }

    /// The iterative lookup driver. Each hop either finishes or names a
    /// closer node; dead candidates are skipped for this lookup and
    /// counted against their global suspicion.
    pub(super) async fn find_successor(&self, k: &Id) -> Result<NodeRef, Error> {
        self.find_successor_avoiding(k, HashSet::new()).await
    }

    pub(super) async fn find_successor_avoiding(
        &self,
        k: &Id,
        mut avoid: HashSet<Id>,
    ) -> Result<NodeRef, Error> {
        let budget = self.hop_budget();
        let mut hops = 0;
        let mut timed_out = false;
        while hops < budget {
            let (succ, candidate) = {
                let state = self.state();
                let succ = state.routing.successor().clone();
                if k.in_half_open(&self.local.id, &succ.id) && !avoid.contains(&succ.id) {
                    return Ok(succ);
                }
                let candidate = state.routing.closest_preceding_node(k, &avoid);
                (succ, candidate)
            };
            let mut current = if candidate.id == self.local.id {
                if avoid.contains(&succ.id) || succ.id == self.local.id {
                    return Err(Error::Routing);
                }
                succ
            } else {
                candidate
            };

            loop {
                if hops >= budget {
                    break;
                }
                hops += 1;
                let request = Request::FindSuccessor { id: k.clone() };
                match self.transport.call(&current.endpoint, request).await {
                    Ok(Reply::Found { node }) => {
                        self.state().routing.record_success(&current.id);
                        return Ok(node);
                    }
                    Ok(Reply::Forward { node }) => {
                        self.state().routing.record_success(&current.id);
                        if node.id == current.id || avoid.contains(&node.id) {
                            // the peer's best next hop is one we already
                            // gave up on; route around the peer instead
                            avoid.insert(current.id.clone());
                            break;
                        }
                        current = node;
                    }
                    Ok(_) => {
                        avoid.insert(current.id.clone());
                        break;
                    }
                    Err(_) => {
                        timed_out = true;
                        self.state().routing.record_failure(&current.id);
                        avoid.insert(current.id.clone());
                        break;
                    }
                }
            }
        }
        Err(if timed_out { Error::Timeout } else { Error::Routing })
    }

    /// One stabilize round: reconcile the primary successor against its
    /// predecessor pointer, notify it of us, rebuild the successor list,
    /// and let the store catch up on replication and pending handoff.
    pub(super) async fn stabilize_round(&self) {
        for _ in 0..=self.config.replicas {
            let succ = self.state().routing.successor().clone();
            if succ.id == self.local.id {
                // ring of one; a joiner that notified us shows up as our
                // predecessor and closes the ring
                let pred = self.state().routing.predecessor.clone();
                match pred {
                    Some(p) if p.id != self.local.id => {
                        self.state().routing.adopt_successor(p);
                        continue;
                    }
                    _ => break,
                }
            }

            let x = match self.transport.call(&succ.endpoint, Request::GetPredecessor).await {
                Ok(Reply::Predecessor { node }) => node,
                Ok(_) | Err(_) => {
                    warn!(successor = ?succ, "successor unreachable, promoting next");
                    self.state().routing.evict(&succ.id);
                    continue;
                }
            };
            {
                let mut state = self.state();
                state.routing.record_success(&succ.id);
                if let Some(x) = x {
                    if x.id != self.local.id && x.id.in_open(&self.local.id, &succ.id) {
                        debug!(node = ?x, "adopting closer successor");
                        state.routing.adopt_successor(x);
                    }
                }
            }

            let succ = self.state().routing.successor().clone();
            if succ.id != self.local.id {
                let notify = Request::Notify {
                    candidate: self.local.clone(),
                };
                if self.transport.call(&succ.endpoint, notify).await.is_err() {
                    self.state().routing.evict(&succ.id);
                    continue;
                }
                match self
                    .transport
                    .call(&succ.endpoint, Request::GetSuccessorList)
                    .await
                {
                    Ok(Reply::SuccessorList { nodes }) => {
                        let mut state = self.state();
                        state.routing.record_success(&succ.id);
                        state.routing.update_successor_list(succ, nodes);
                    }
                    Ok(_) | Err(_) => {
                        self.state().routing.evict(&succ.id);
                        continue;
                    }
                }
            }
            break;
        }

        self.push_replicas().await;
        self.retry_pending_handoff().await;

        let mut state = self.state();
        state.rounds += 1;
        if !state.ready && (state.handoff_received || state.rounds >= 2) {
            state.ready = true;
            info!("serving");
        }
    }

    /// NOTIFY received: adopt the candidate if it sits between our current
    /// predecessor and us, then hand it the keys it now owns. Repeated
    /// notifies with the same candidate change nothing.
    pub(super) fn handle_notify(self: Arc<Self>, candidate: NodeRef) -> Reply {
        if candidate.id == self.local.id {
            return Reply::Ack;
        }
        let batch = {
            let mut state = self.state();
            let adopt = match &state.routing.predecessor {
                None => true,
                Some(pred) => candidate.id.in_open(&pred.id, &self.local.id),
            };
            if !adopt {
                return Reply::Ack;
            }
            info!(predecessor = ?candidate, "adopting predecessor");
            state.routing.predecessor = Some(candidate.clone());
            state
                .store
                .entries_outside(&candidate.id, &self.local.id)
        };
        if !batch.is_empty() {
            tokio::spawn(async move { self.handoff_to(candidate, batch).await });
        }
        Reply::Ack
    }

    /// One fix_fingers tick: resolve the next finger in cursor order. A
    /// failed lookup leaves the old entry in place.
    pub(super) async fn fix_fingers_tick(&self) {
        let (index, target) = {
            let mut state = self.state();
            let index = state.routing.next_finger_index();
            (index, state.routing.finger_target(index))
        };
        if let Ok(node) = self.find_successor(&target).await {
            self.state().routing.set_finger(index, node);
        }
    }

    /// One check_predecessor tick: ping it, and after the second straight
    /// failure assume its keys. Replica slot 0 becomes ours.
    pub(super) async fn check_predecessor_tick(&self) {
        let Some(pred) = self.state().routing.predecessor.clone() else {
            return;
        };
        match self.transport.call(&pred.endpoint, Request::Ping).await {
            Ok(Reply::Pong) => {
                self.state().routing.record_success(&pred.id);
            }
            Ok(_) | Err(_) => {
                let dead = self.state().routing.record_failure(&pred.id);
                if !dead {
                    return;
                }
                warn!(predecessor = ?pred, "predecessor failed, promoting replicas");
                let promoted = {
                    let mut state = self.state();
                    // the pointer may have moved while the ping was out
                    if state.routing.predecessor.as_ref().map(|p| &p.id) != Some(&pred.id) {
                        return;
                    }
                    state.routing.predecessor = None;
                    let promoted = state.store.promote_replicas();
                    for dirty in state.dirty.iter_mut() {
                        *dirty = true;
                    }
                    promoted.len()
                };
                debug!(promoted, "replica slot promoted into primary");
                // the adopted keys reach our successors with the re-push
                self.push_replicas().await;
            }
        }
    }

    /// Graceful departure: the successor absorbs our keys and learns our
    /// predecessor; the predecessor learns our successor.
    pub(super) async fn graceful_leave(&self) {
        let (pred, succ, entries) = {
            let state = self.state();
            (
                state.routing.predecessor.clone(),
                state.routing.successor().clone(),
                state.store.primary_entries(),
            )
        };
        if succ.id != self.local.id {
            let from = pred
                .as_ref()
                .map(|p| p.id.clone())
                .unwrap_or_else(|| self.local.id.clone());
            if !self.send_handoff(&succ, &from, &self.local.id, entries).await {
                warn!(successor = ?succ, "departing handoff failed; replicas must cover");
            }
            let notice = Request::Leave {
                leaver: self.local.clone(),
                predecessor: pred.clone(),
                successor: None,
            };
            let _ = self.transport.call(&succ.endpoint, notice).await;
        }
        if let Some(pred) = pred {
            if pred.id != self.local.id {
                let notice = Request::Leave {
                    leaver: self.local.clone(),
                    predecessor: None,
                    successor: Some(succ.clone()),
                };
                let _ = self.transport.call(&pred.endpoint, notice).await;
            }
        }
        info!("left the ring");
    }

    /// LEAVE received: drop the leaver from routing state and splice in
    /// the neighbor it told us about.
    pub(super) fn handle_leave(
        &self,
        leaver: NodeRef,
        predecessor: Option<NodeRef>,
        successor: Option<NodeRef>,
    ) -> Reply {
        info!(leaver = ?leaver, "peer left gracefully");
        let mut state = self.state();
        state.routing.evict(&leaver.id);
        if let Some(pred) = predecessor {
            if state.routing.predecessor.as_ref().map(|p| &p.id) == Some(&leaver.id) {
                state.routing.predecessor = if pred.id == self.local.id {
                    None
                } else {
                    Some(pred)
                };
            }
        }
        if let Some(succ) = successor {
            if succ.id != self.local.id && state.routing.successor().id == self.local.id {
                state.routing.adopt_successor(succ);
            }
        }
        Reply::Ack
    }

    fn hop_budget(&self) -> usize {
        (self.space.bits() as usize).max(16)
    }
}
