use std::collections::HashMap;

use super::identifier::{in_between, Identifier};

pub type Payload = Vec<u8>;

/// Local key/payload storage. Keys are hashed filenames; payloads are opaque
/// bytes the ring never interprets. In-memory only, no eviction.
#[derive(Debug, Default)]
pub struct Bucket {
    map: HashMap<Identifier, Payload>,
}

impl Bucket {
    pub fn new() -> Self {
        Bucket { map: HashMap::new() }
    }

    pub fn insert(&mut self, key: Identifier, payload: Payload) {
        self.map.insert(key, payload);
    }

    pub fn get(&self, key: &Identifier) -> Option<&Payload> {
        self.map.get(key)
    }

    pub fn remove(&mut self, key: &Identifier) -> Option<Payload> {
        self.map.remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn keys(&self) -> Vec<Identifier> {
        self.map.keys().copied().collect()
    }

    /// Remove and return every entry that no longer falls in `(pred_id, self_id]`,
    /// i.e. the keys a newly accepted predecessor is now responsible for.
    pub fn drain_not_owned(
        &mut self,
        pred_id: Identifier,
        self_id: Identifier,
    ) -> Vec<(Identifier, Payload)> {
        let moved: Vec<Identifier> = self
            .map
            .keys()
            .filter(|k| !in_between(pred_id, **k, self_id, true))
            .copied()
            .collect();
        moved
            .into_iter()
            .filter_map(|k| self.map.remove(&k).map(|v| (k, v)))
            .collect()
    }
}
