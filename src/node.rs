use std::fmt;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::core::bucket::{Bucket, Payload};
use crate::core::identifier::{Identifier, NodeAddress, Peer};
use crate::core::ring::{RingState, RoutingStep};

/// One Chord node: immutable identity plus the ring state and storage
/// bucket behind a single lock.
///
/// Every method here is synchronous and takes the lock internally, so no
/// caller can hold it across an RPC. The maintenance protocols snapshot
/// through these accessors, call out over the network, and reapply through
/// the mutators, which re-check their preconditions.
pub struct Node {
    self_peer: Peer,
    /// Successor-list length cap (the `r` parameter).
    r: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    ring: RingState,
    bucket: Bucket,
}

impl Node {
    /// Build a node advertising `addr`. The identifier is the hash of the
    /// address unless an override seed was configured.
    pub fn new(addr: NodeAddress, id_override: Option<Identifier>, r: usize) -> Self {
        let id = id_override.unwrap_or_else(|| addr.id());
        let self_peer = Peer::with_id(addr, id);
        Self {
            inner: Mutex::new(Inner {
                ring: RingState::genesis(self_peer.clone()),
                bucket: Bucket::new(),
            }),
            self_peer,
            r,
        }
    }

    pub fn self_peer(&self) -> &Peer {
        &self.self_peer
    }

    pub fn id(&self) -> Identifier {
        self.self_peer.id
    }

    pub fn addr(&self) -> &NodeAddress {
        &self.self_peer.addr
    }

    pub fn successor_list_length(&self) -> usize {
        self.r
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("ring state lock poisoned")
    }

    // --- RPC-facing handlers ---

    pub fn handle_find_successor(&self, target: Identifier) -> RoutingStep {
        self.locked().ring.find_successor_step(&self.self_peer, target)
    }

    pub fn predecessor(&self) -> Option<Peer> {
        self.locked().ring.predecessor().cloned()
    }

    pub fn successor(&self) -> Peer {
        self.locked().ring.successor().clone()
    }

    pub fn successor_list(&self) -> Vec<Peer> {
        self.locked().ring.successors().to_vec()
    }

    /// Record a predecessor candidate. When it is accepted, the keys this
    /// node no longer owns are drained and returned; the server ships them
    /// to the new predecessor outside the lock.
    pub fn handle_notify(&self, candidate: Peer) -> Vec<(Identifier, Payload)> {
        let mut inner = self.locked();
        if !inner.ring.record_notify(self.self_peer.id, candidate.clone()) {
            return Vec::new();
        }
        debug!(%candidate, "adopted new predecessor");
        let handoff = inner.bucket.drain_not_owned(candidate.id, self.self_peer.id);
        if !handoff.is_empty() {
            debug!(count = handoff.len(), %candidate, "handing off keys to predecessor");
        }
        handoff
    }

    /// The caller routed the key here; store it without re-checking ownership.
    pub fn handle_store(&self, key: Identifier, payload: Payload) {
        self.locked().bucket.insert(key, payload);
    }

    pub fn handle_get_file(&self, filename: &str) -> Option<Payload> {
        let key = Identifier::from_hashed(filename);
        self.locked().bucket.get(&key).cloned()
    }

    /// Put a drained key back after a failed handoff transfer.
    pub fn restore_key(&self, key: Identifier, payload: Payload) {
        self.locked().bucket.insert(key, payload);
    }

    // --- maintenance appliers ---

    pub fn consider_new_successor(&self, candidate: Peer) -> bool {
        self.locked()
            .ring
            .consider_new_successor(self.self_peer.id, candidate)
    }

    /// Apply a successor list fetched from `head`. Skipped when the head has
    /// changed since the snapshot was taken.
    pub fn splice_successors(&self, head: Peer, rest: Vec<Peer>) {
        let mut inner = self.locked();
        if inner.ring.successor().id != head.id {
            return;
        }
        inner
            .ring
            .splice_successors(self.self_peer.id, head, rest, self.r);
    }

    pub fn drop_failed_successor(&self, failed: &Peer) {
        let mut inner = self.locked();
        inner.ring.drop_failed_successor(&self.self_peer, failed);
        debug!(successor = %inner.ring.successor(), "dropped failed successor");
    }

    pub fn clear_predecessor_if(&self, failed: &Peer) {
        self.locked().ring.clear_predecessor_if(failed);
    }

    pub fn install_finger_table(&self, table: Vec<Peer>) {
        self.locked().ring.install_finger_table(table);
    }

    pub fn adopt_initial_successor(&self, successor: Peer) {
        self.locked().ring.adopt_initial_successor(successor);
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let inner = self.locked();
        NodeSnapshot {
            self_peer: self.self_peer.clone(),
            predecessor: inner.ring.predecessor().cloned(),
            successors: inner.ring.successors().to_vec(),
            finger_table: inner.ring.finger_table().to_vec(),
            bucket_keys: inner.bucket.keys(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("self_peer", &self.self_peer)
            .field("r", &self.r)
            .finish_non_exhaustive()
    }
}

/// A consistent copy of one node's state, for `PrintState` and `dump`.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub self_peer: Peer,
    pub predecessor: Option<Peer>,
    pub successors: Vec<Peer>,
    pub finger_table: Vec<Peer>,
    pub bucket_keys: Vec<Identifier>,
}

impl fmt::Display for NodeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "node:        {}", self.self_peer)?;
        match &self.predecessor {
            Some(p) => writeln!(f, "predecessor: {p}")?,
            None => writeln!(f, "predecessor: (none)")?,
        }
        writeln!(f, "successors:")?;
        for s in &self.successors {
            writeln!(f, "  {s}")?;
        }
        // fingers repeat heavily on small rings; print each peer once
        writeln!(f, "finger table ({} rows):", self.finger_table.len())?;
        let mut shown: Vec<&Peer> = Vec::new();
        for finger in &self.finger_table {
            if shown.iter().any(|p| p.id == finger.id) {
                continue;
            }
            shown.push(finger);
            writeln!(f, "  {finger}")?;
        }
        write!(f, "stored keys: {}", self.bucket_keys.len())
    }
}
