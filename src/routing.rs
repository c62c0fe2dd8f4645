use std::collections::{HashMap, HashSet};

use crate::id::{Id, IdSpace};
use crate::message::NodeRef;

// Consecutive RPC failures before a peer is evicted from routing state.
const EVICT_AFTER: u32 = 2;

/// A node's view of the ring: predecessor pointer, successor list and
/// finger table, plus the suspect bookkeeping that drives eviction.
///
/// This struct is pure state; every mutation happens under the node's
/// serialization point and never blocks on the network.
#[derive(Debug)]
pub struct RoutingState {
    space: IdSpace,
    local: NodeRef,
    r: usize,
    /// The node immediately counter-clockwise, if known.
    pub predecessor: Option<NodeRef>,
    successors: Vec<NodeRef>,
    fingers: Vec<Option<NodeRef>>,
    next_finger: u32,
    suspects: HashMap<Id, u32>,
}

impl RoutingState {
    /// Fresh state for a node that has not joined anything yet: it is its
    /// own successor and every finger points home.
    pub fn new(space: IdSpace, local: NodeRef, r: usize) -> Self {
        let fingers = vec![Some(local.clone()); space.bits() as usize];
        RoutingState {
            space,
            local: local.clone(),
            r,
            predecessor: None,
            successors: vec![local],
            fingers,
            next_finger: 0,
            suspects: HashMap::new(),
        }
    }

    /// This node's own reference.
    pub fn local(&self) -> &NodeRef {
        &self.local
    }

    /// The primary successor. Falls back to self on an empty list, which
    /// only happens transiently while repair promotes the next entry.
    pub fn successor(&self) -> &NodeRef {
        self.successors.first().unwrap_or(&self.local)
    }

    /// The whole successor list, clockwise-nearest first.
    pub fn successors(&self) -> &[NodeRef] {
        &self.successors
    }

    /// Sets a new primary successor, keeping the rest of the list.
    pub fn adopt_successor(&mut self, node: NodeRef) {
        self.successors.retain(|n| n.id != node.id);
        self.successors.insert(0, node);
        self.successors.truncate(self.r);
    }

    /// Rebuilds the list from the primary successor and its own list
    /// shifted right by one. Self never appears unless the ring is a
    /// singleton.
    pub fn update_successor_list(&mut self, primary: NodeRef, list: Vec<NodeRef>) {
        let mut next = Vec::with_capacity(self.r);
        next.push(primary);
        for node in list {
            if next.len() >= self.r {
                break;
            }
            if node.id == self.local.id || next.iter().any(|n| n.id == node.id) {
                continue;
            }
            next.push(node);
        }
        if next.first().map(|n| &n.id) == Some(&self.local.id) && next.len() > 1 {
            next.remove(0);
        }
        self.successors = next;
        debug_assert!(
            self.successors.len() == 1 || self.successors.iter().all(|n| n.id != self.local.id),
            "a node must not be its own successor in a non-singleton ring"
        );
    }

    /// The closest node preceding `k` that this node knows of, scanning
    /// the finger table from the top and the successor list. Returns self
    /// when nothing qualifies, which the caller treats as "answer with the
    /// primary successor".
    pub fn closest_preceding_node(&self, k: &Id, avoid: &HashSet<Id>) -> NodeRef {
        let mut best = self.local.clone();
        let fingers = self.fingers.iter().rev().flatten();
        for node in fingers.chain(self.successors.iter()) {
            if node.id == self.local.id || avoid.contains(&node.id) {
                continue;
            }
            if node.id.in_open(&best.id, k) {
                best = node.clone();
            }
        }
        best
    }

    /// The ring position finger `index` should resolve.
    pub fn finger_target(&self, index: u32) -> Id {
        self.space.finger_start(&self.local.id, index)
    }

    /// Stores a freshly resolved finger.
    pub fn set_finger(&mut self, index: u32, node: NodeRef) {
        if let Some(slot) = self.fingers.get_mut(index as usize) {
            *slot = Some(node);
        }
    }

    /// Returns the finger index to fix this tick and advances the cursor.
    pub fn next_finger_index(&mut self) -> u32 {
        let index = self.next_finger;
        self.next_finger = (self.next_finger + 1) % self.space.bits();
        index
    }

    /// True if this node owns `id`: `id ∈ (predecessor, self]`. With no
    /// predecessor the whole ring is ours, at least for the moment.
    pub fn owns(&self, id: &Id) -> bool {
        match &self.predecessor {
            Some(pred) => id.in_half_open(&pred.id, &self.local.id),
            None => true,
        }
    }

    /// Clears the failure count after a successful exchange.
    pub fn record_success(&mut self, id: &Id) {
        self.suspects.remove(id);
    }

    /// Counts a failed exchange; after two in a row the peer is dead and
    /// leaves the finger table and successor list. Returns whether the
    /// eviction happened.
    pub fn record_failure(&mut self, id: &Id) -> bool {
        let count = self.suspects.entry(id.clone()).or_insert(0);
        *count += 1;
        if *count >= EVICT_AFTER {
            self.suspects.remove(id);
            self.evict(id);
            true
        } else {
            false
        }
    }

    /// Removes a dead peer from the finger table and successor list.
    pub fn evict(&mut self, id: &Id) {
        self.successors.retain(|n| n.id != *id);
        if self.successors.is_empty() {
            // ring of one until stabilize learns better
            self.successors.push(self.local.clone());
        }
        for finger in self.fingers.iter_mut() {
            if finger.as_ref().is_some_and(|n| n.id == *id) {
                *finger = None;
            }
        }
    }

    /// The finger table with empty and repeated entries collapsed, for
    /// the admin surface.
    pub fn compact_fingers(&self) -> Vec<(u32, NodeRef)> {
        let mut out: Vec<(u32, NodeRef)> = Vec::new();
        for (index, node) in self.fingers.iter().enumerate() {
            if let Some(node) = node {
                if out.last().map(|(_, n)| &n.id) != Some(&node.id) {
                    out.push((index as u32, node.clone()));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(space: &IdSpace, id: u64) -> NodeRef {
        NodeRef {
            id: space.id(id),
            endpoint: format!("127.0.0.1:{}", 4000 + id),
        }
    }

    fn state(id: u64) -> (IdSpace, RoutingState) {
        let space = IdSpace::new(8);
        let local = node(&space, id);
        (space, RoutingState::new(space, local, 3))
    }

    #[test]
    fn singleton_ring_points_at_itself() {
        let (space, state) = state(10);
        assert_eq!(state.successor().id, space.id(10));
        let best = state.closest_preceding_node(&space.id(99), &HashSet::new());
        assert_eq!(best.id, space.id(10));
        assert!(state.owns(&space.id(10)));
        assert!(state.owns(&space.id(200)));
    }

    #[test]
    fn closest_preceding_scans_fingers_and_successors() {
        let (space, mut state) = state(10);
        state.set_finger(5, node(&space, 60));
        state.set_finger(6, node(&space, 120));
        state.update_successor_list(node(&space, 40), vec![]);

        let best = state.closest_preceding_node(&space.id(130), &HashSet::new());
        assert_eq!(best.id, space.id(120));
        // the successor qualifies when it precedes the key more closely
        let best = state.closest_preceding_node(&space.id(50), &HashSet::new());
        assert_eq!(best.id, space.id(40));
        // avoided nodes are skipped
        let avoid: HashSet<Id> = [space.id(120)].into();
        let best = state.closest_preceding_node(&space.id(130), &avoid);
        assert_eq!(best.id, space.id(60));
    }

    #[test]
    fn successor_list_excludes_self_and_duplicates() {
        let (space, mut state) = state(10);
        state.update_successor_list(
            node(&space, 60),
            vec![
                node(&space, 120),
                node(&space, 10),  // self, must be cut
                node(&space, 120), // duplicate
                node(&space, 200),
            ],
        );
        let ids: Vec<_> = state.successors().iter().map(|n| n.id.clone()).collect();
        assert_eq!(ids, vec![space.id(60), space.id(120), space.id(200)]);
    }

    #[test]
    fn two_failures_evict_and_promote() {
        let (space, mut state) = state(10);
        state.update_successor_list(node(&space, 60), vec![node(&space, 120)]);
        state.set_finger(5, node(&space, 60));

        assert!(!state.record_failure(&space.id(60)));
        assert!(state.record_failure(&space.id(60)));
        assert_eq!(state.successor().id, space.id(120));
        let best = state.closest_preceding_node(&space.id(65), &HashSet::new());
        assert_ne!(best.id, space.id(60));
        // a success in between resets the count
        state.update_successor_list(node(&space, 60), vec![]);
        state.record_failure(&space.id(60));
        state.record_success(&space.id(60));
        assert!(!state.record_failure(&space.id(60)));
    }

    #[test]
    fn eviction_of_last_successor_falls_back_to_self() {
        let (space, mut state) = state(10);
        state.update_successor_list(node(&space, 60), vec![]);
        state.evict(&space.id(60));
        assert_eq!(state.successor().id, space.id(10));
    }

    #[test]
    fn ownership_follows_the_predecessor() {
        let (space, mut state) = state(200);
        state.predecessor = Some(node(&space, 10));
        assert!(state.owns(&space.id(150)));
        assert!(state.owns(&space.id(200)));
        assert!(!state.owns(&space.id(10)));
        assert!(!state.owns(&space.id(250)));
    }

    #[test]
    fn finger_cursor_wraps() {
        let (_, mut state) = state(10);
        for expected in 0..8 {
            assert_eq!(state.next_finger_index(), expected);
        }
        assert_eq!(state.next_finger_index(), 0);
    }
}
