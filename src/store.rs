use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::{Id, IdSpace};

/// One key/value pair as it travels between stores.
///
/// The key's ring id is recomputed by the receiver rather than shipped,
/// since hashing is deterministic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Canonical key bytes.
    pub key: String,
    /// Opaque value, last writer wins.
    pub value: String,
}

impl Entry {
    // rough serialized footprint, used for MTU chunking
    fn wire_cost(&self) -> usize {
        self.key.len() + self.value.len() + 32
    }
}

/// Splits a batch so every chunk serializes comfortably under `mtu`.
pub fn chunk_entries(entries: Vec<Entry>, mtu: usize) -> Vec<Vec<Entry>> {
    let budget = mtu.saturating_sub(128).max(64);
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut used = 0;
    for entry in entries {
        let cost = entry.wire_cost();
        if !current.is_empty() && used + cost > budget {
            chunks.push(std::mem::take(&mut current));
            used = 0;
        }
        used += cost;
        current.push(entry);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// The node-local key/value state: one primary map for owned keys plus `r`
/// replica maps, one per predecessor position.
#[derive(Debug)]
pub struct KeyStore {
    space: IdSpace,
    primary: BTreeMap<Id, Entry>,
    replicas: Vec<BTreeMap<Id, Entry>>,
}

impl KeyStore {
    /// An empty store with `r` replica slots.
    pub fn new(space: IdSpace, r: usize) -> Self {
        KeyStore {
            space,
            primary: BTreeMap::new(),
            replicas: vec![BTreeMap::new(); r],
        }
    }

    /// Writes an owned key, overwriting any previous value.
    pub fn put_primary(&mut self, key: String, value: String) -> Id {
        let id = self.space.hash(key.as_bytes());
        self.primary.insert(id.clone(), Entry { key, value });
        id
    }

    /// Absorbs a batch of entries into the primary map.
    pub fn absorb_primary(&mut self, entries: Vec<Entry>) {
        for entry in entries {
            let id = self.space.hash(entry.key.as_bytes());
            self.primary.insert(id, entry);
        }
    }

    /// Reads a key from the primary map, falling back to the replica slots.
    pub fn get(&self, key: &str) -> Option<&str> {
        let id = self.space.hash(key.as_bytes());
        if let Some(entry) = self.primary.get(&id) {
            return Some(&entry.value);
        }
        self.replicas
            .iter()
            .find_map(|slot| slot.get(&id))
            .map(|entry| entry.value.as_str())
    }

    /// True if the primary map holds the key.
    pub fn owns_key(&self, key: &str) -> bool {
        self.primary.contains_key(&self.space.hash(key.as_bytes()))
    }

    /// Owned entries that fall outside `(from, to]`, left in place.
    ///
    /// Used when a new predecessor appears: the returned batch is handed
    /// off, and the keys stay readable here until the receiver acks, at
    /// which point [`KeyStore::remove_unless_owned`] drops them.
    pub fn entries_outside(&self, from: &Id, to: &Id) -> Vec<Entry> {
        self.primary
            .iter()
            .filter(|(id, _)| !id.in_half_open(from, to))
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Drops handed-off entries, keeping any that fall back inside the
    /// owned range `(from, to]` (the predecessor may have changed again
    /// while the handoff was in flight).
    pub fn remove_unless_owned(&mut self, entries: &[Entry], from: &Id, to: &Id) {
        for entry in entries {
            let id = self.space.hash(entry.key.as_bytes());
            if !id.in_half_open(from, to) {
                self.primary.remove(&id);
            }
        }
    }

    /// Stores replicated entries into slot `slot`, clearing it first when
    /// the owner is pushing its full state.
    pub fn store_replicas(&mut self, slot: usize, entries: Vec<Entry>, reset: bool) {
        let Some(map) = self.replicas.get_mut(slot) else {
            return;
        };
        if reset {
            map.clear();
        }
        for entry in entries {
            let id = self.space.hash(entry.key.as_bytes());
            map.insert(id, entry);
        }
    }

    /// The failed predecessor's keys become ours: replica slot 0 merges
    /// into the primary map (existing primary entries win), the remaining
    /// slots shift left and the last one clears.
    ///
    /// Returns the newly owned entries so they can be pushed to our own
    /// successors as fresh replicas.
    pub fn promote_replicas(&mut self) -> Vec<Entry> {
        if self.replicas.is_empty() {
            return Vec::new();
        }
        let promoted = std::mem::take(&mut self.replicas[0]);
        self.replicas.remove(0);
        self.replicas.push(BTreeMap::new());
        let mut adopted = Vec::new();
        for (id, entry) in promoted {
            if !self.primary.contains_key(&id) {
                adopted.push(entry.clone());
                self.primary.insert(id, entry);
            }
        }
        adopted
    }

    /// Every owned entry, for full replica pushes and graceful handoff.
    pub fn primary_entries(&self) -> Vec<Entry> {
        self.primary.values().cloned().collect()
    }

    /// Number of owned keys.
    pub fn primary_len(&self) -> usize {
        self.primary.len()
    }

    /// Number of keys held in each replica slot.
    pub fn replica_lens(&self) -> Vec<usize> {
        self.replicas.iter().map(|slot| slot.len()).collect()
    }
}
