use serde::{Deserialize, Serialize};

use super::identifier::{in_between, Identifier, Peer};

/// One step of a `find_successor` resolution: either the responsible peer,
/// or a closer peer the caller should ask next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingStep {
    Found(Peer),
    Forward(Peer),
}

/// The mutable routing state of one node: predecessor pointer, successor
/// list, and finger table. Owned by `Node` under its single lock; nothing in
/// here performs I/O.
#[derive(Debug)]
pub struct RingState {
    predecessor: Option<Peer>,
    /// Never empty; `successors[0]` is the immediate successor. Self-heals
    /// to `[self]` when every successor has failed.
    successors: Vec<Peer>,
    /// Row i (1-indexed) holds the best-known successor of `self_id + 2^(i-1)`.
    finger_table: Vec<Peer>,
}

impl RingState {
    /// State of a freshly created singleton ring: no predecessor, the node
    /// is its own successor.
    pub fn genesis(self_peer: Peer) -> Self {
        Self {
            predecessor: None,
            successors: vec![self_peer],
            finger_table: Vec::new(),
        }
    }

    pub fn predecessor(&self) -> Option<&Peer> {
        self.predecessor.as_ref()
    }

    pub fn successor(&self) -> &Peer {
        &self.successors[0]
    }

    pub fn successors(&self) -> &[Peer] {
        &self.successors
    }

    pub fn finger_table(&self) -> &[Peer] {
        &self.finger_table
    }

    /// The Found/Forward decision of `find_successor` for `target`, taken
    /// from the point of view of the node `self_peer`.
    pub fn find_successor_step(&self, self_peer: &Peer, target: Identifier) -> RoutingStep {
        let succ = self.successor();
        if in_between(self_peer.id, target, succ.id, true) {
            RoutingStep::Found(succ.clone())
        } else {
            RoutingStep::Forward(self.closest_preceding_node(self_peer, target))
        }
    }

    /// Scan the finger table from the highest row down for the closest peer
    /// strictly between self and `target`. Fingers give the exponential
    /// shortcut; the immediate successor is the fallback that guarantees
    /// progress when fingers are stale; self is the terminal answer.
    pub fn closest_preceding_node(&self, self_peer: &Peer, target: Identifier) -> Peer {
        for finger in self.finger_table.iter().rev() {
            if in_between(self_peer.id, finger.id, target, false) {
                return finger.clone();
            }
        }
        let succ = self.successor();
        if in_between(self_peer.id, succ.id, target, false) {
            return succ.clone();
        }
        self_peer.clone()
    }

    /// Replace the immediate successor if `candidate` sits between self and
    /// the current successor. Returns whether the head changed.
    pub fn consider_new_successor(&mut self, self_id: Identifier, candidate: Peer) -> bool {
        if candidate.id == self_id {
            return false;
        }
        if in_between(self_id, candidate.id, self.successor().id, false) {
            self.successors[0] = candidate;
            return true;
        }
        false
    }

    /// Install `head` followed by its reported successor list, deduplicated
    /// and truncated to `max_len`. The list is cut after the first occurrence
    /// of self: everything past that wraps the whole ring.
    pub fn splice_successors(
        &mut self,
        self_id: Identifier,
        head: Peer,
        rest: Vec<Peer>,
        max_len: usize,
    ) {
        let mut list = vec![head];
        for peer in rest {
            if list.len() >= max_len {
                break;
            }
            if list.iter().any(|p| p.id == peer.id) {
                continue;
            }
            let stop = peer.id == self_id;
            list.push(peer);
            if stop {
                break;
            }
        }
        list.truncate(max_len);
        self.successors = list;
    }

    /// Drop `failed` from the head of the successor list, self-healing to
    /// `[self]` when the list empties. No-op if the head has already changed.
    pub fn drop_failed_successor(&mut self, self_peer: &Peer, failed: &Peer) {
        if self.successor().id != failed.id {
            return;
        }
        self.successors.remove(0);
        if self.successors.is_empty() {
            self.successors.push(self_peer.clone());
        }
    }

    /// The `notify` rule: adopt `candidate` as predecessor when none is set
    /// or when it sits between the current predecessor and self. A node never
    /// records itself. Returns whether the pointer changed.
    pub fn record_notify(&mut self, self_id: Identifier, candidate: Peer) -> bool {
        if candidate.id == self_id {
            return false;
        }
        let accept = match &self.predecessor {
            None => true,
            Some(p) => in_between(p.id, candidate.id, self_id, false),
        };
        if accept {
            self.predecessor = Some(candidate);
        }
        accept
    }

    pub fn clear_predecessor_if(&mut self, failed: &Peer) {
        if let Some(p) = &self.predecessor {
            if p.id == failed.id {
                self.predecessor = None;
            }
        }
    }

    pub fn install_finger_table(&mut self, table: Vec<Peer>) {
        self.finger_table = table;
    }

    /// Used by `join`: point at the successor the bootstrap lookup returned.
    pub fn adopt_initial_successor(&mut self, successor: Peer) {
        self.successors = vec![successor];
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::identifier::NodeAddress;

    fn peer(port: u16, id: u64) -> Peer {
        Peer::with_id(
            NodeAddress::new("127.0.0.1", port),
            Identifier::from_low_u64(id),
        )
    }

    #[test]
    fn genesis_is_its_own_successor() {
        let me = peer(1, 10);
        let ring = RingState::genesis(me.clone());
        assert_eq!(ring.successor(), &me);
        assert!(ring.predecessor().is_none());
        // any target resolves to self in a singleton ring
        let step = ring.find_successor_step(&me, Identifier::from_low_u64(9999));
        assert_eq!(step, RoutingStep::Found(me));
    }

    #[test]
    fn step_found_when_target_in_arc() {
        let me = peer(1, 10);
        let succ = peer(2, 40);
        let mut ring = RingState::genesis(me.clone());
        ring.adopt_initial_successor(succ.clone());

        assert_eq!(
            ring.find_successor_step(&me, Identifier::from_low_u64(30)),
            RoutingStep::Found(succ.clone())
        );
        // the successor's own identifier is included in the arc
        assert_eq!(
            ring.find_successor_step(&me, Identifier::from_low_u64(40)),
            RoutingStep::Found(succ)
        );
    }

    #[test]
    fn step_forwards_past_the_arc() {
        let me = peer(1, 10);
        let succ = peer(2, 40);
        let far = peer(3, 90);
        let mut ring = RingState::genesis(me.clone());
        ring.adopt_initial_successor(succ.clone());
        ring.install_finger_table(vec![succ.clone(), far.clone()]);

        // 100 is past both fingers; the highest qualifying finger wins
        assert_eq!(
            ring.find_successor_step(&me, Identifier::from_low_u64(100)),
            RoutingStep::Forward(far)
        );
        // 60 is past the successor but before the far finger
        assert_eq!(
            ring.find_successor_step(&me, Identifier::from_low_u64(60)),
            RoutingStep::Forward(succ)
        );
    }

    #[test]
    fn closest_preceding_falls_back_to_successor_then_self() {
        let me = peer(1, 10);
        let succ = peer(2, 40);
        let mut ring = RingState::genesis(me.clone());
        ring.adopt_initial_successor(succ.clone());

        // no fingers at all: the successor still precedes 60
        assert_eq!(
            ring.closest_preceding_node(&me, Identifier::from_low_u64(60)),
            succ
        );
        // nobody precedes 20 except self
        assert_eq!(
            ring.closest_preceding_node(&me, Identifier::from_low_u64(20)),
            me
        );
    }

    #[test]
    fn consider_new_successor_checks_the_interval() {
        let me = peer(1, 10);
        let mut ring = RingState::genesis(me.clone());
        ring.adopt_initial_successor(peer(2, 40));

        // 25 slots between 10 and 40
        assert!(ring.consider_new_successor(me.id, peer(3, 25)));
        assert_eq!(ring.successor().id, Identifier::from_low_u64(25));
        // 30 does not slot between 10 and 25
        assert!(!ring.consider_new_successor(me.id, peer(4, 30)));
        // a node never adopts itself
        assert!(!ring.consider_new_successor(me.id, me.clone()));
    }

    #[test]
    fn splice_truncates_and_stops_at_self() {
        let me = peer(1, 10);
        let mut ring = RingState::genesis(me.clone());

        ring.splice_successors(
            me.id,
            peer(2, 25),
            vec![peer(3, 40), me.clone(), peer(4, 99)],
            4,
        );
        // self ends the list; 99 lies beyond the wrap and is dropped
        let ids: Vec<Identifier> = ring.successors().iter().map(|p| p.id).collect();
        assert_eq!(
            ids,
            vec![
                Identifier::from_low_u64(25),
                Identifier::from_low_u64(40),
                Identifier::from_low_u64(10),
            ]
        );

        ring.splice_successors(
            me.id,
            peer(2, 25),
            vec![peer(3, 40), peer(5, 60), peer(6, 70)],
            2,
        );
        assert_eq!(ring.successors().len(), 2);
    }

    #[test]
    fn drop_failed_successor_self_heals() {
        let me = peer(1, 10);
        let s1 = peer(2, 25);
        let s2 = peer(3, 40);
        let mut ring = RingState::genesis(me.clone());
        ring.splice_successors(me.id, s1.clone(), vec![s2.clone()], 4);

        ring.drop_failed_successor(&me, &s1);
        assert_eq!(ring.successor(), &s2);
        // a stale failure report about s1 no longer matches the head
        ring.drop_failed_successor(&me, &s1);
        assert_eq!(ring.successor(), &s2);

        ring.drop_failed_successor(&me, &s2);
        assert_eq!(ring.successor(), &me);
    }

    #[test]
    fn notify_populates_and_refines_predecessor() {
        let me = peer(1, 40);
        let mut ring = RingState::genesis(me.clone());

        assert!(ring.record_notify(me.id, peer(2, 10)));
        assert_eq!(ring.predecessor().map(|p| p.id), Some(Identifier::from_low_u64(10)));

        // 25 is closer behind 40 than 10 is
        assert!(ring.record_notify(me.id, peer(3, 25)));
        assert_eq!(ring.predecessor().map(|p| p.id), Some(Identifier::from_low_u64(25)));

        // 10 is now behind the current predecessor
        assert!(!ring.record_notify(me.id, peer(2, 10)));
        // a node never records itself
        assert!(!ring.record_notify(me.id, me.clone()));
    }

    #[test]
    fn clear_predecessor_only_on_match() {
        let me = peer(1, 40);
        let pred = peer(2, 25);
        let mut ring = RingState::genesis(me.clone());
        ring.record_notify(me.id, pred.clone());

        ring.clear_predecessor_if(&peer(3, 30));
        assert!(ring.predecessor().is_some());
        ring.clear_predecessor_if(&pred);
        assert!(ring.predecessor().is_none());
    }
}
