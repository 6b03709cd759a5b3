//! Key relations of a remote participant.
//!
//! Endpoint relations are ordered by `(key id, local handle)` and resolve the
//! sender key id in a crypto header to the endpoint pair. Specific relations
//! are keyed by receiver-specific key id and resolve the key ids found in
//! receiver MACs.

use std::collections::BTreeMap;
use std::sync::Arc;

use ddsec_crypto_core::{Handle, MasterKeyMaterial};

/// Which decode path applies to a secure submessage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecureSubmessageCategory {
    InfoSubmessage,
    DatawriterSubmessage,
    DatareaderSubmessage,
}

/// Mapping from a wire key id to a local/remote pair.
#[derive(Debug, Clone)]
pub struct KeyRelation {
    pub category: SecureSubmessageCategory,
    pub key_id: u32,
    pub local: Handle,
    pub remote: Handle,
    pub key_material: Arc<MasterKeyMaterial>,
}

#[derive(Debug, Default)]
pub struct RelationIndex {
    endpoints: BTreeMap<(u32, Handle), KeyRelation>,
    specific: BTreeMap<u32, KeyRelation>,
}

impl RelationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the endpoint relation for `(key_id, local)`.
    pub fn insert_endpoint(&mut self, relation: KeyRelation) {
        self.endpoints
            .insert((relation.key_id, relation.local), relation);
    }

    pub fn remove_endpoint(&mut self, key_id: u32, local: Handle) -> Option<KeyRelation> {
        self.endpoints.remove(&(key_id, local))
    }

    /// Find an endpoint relation. With `local` the match is exact; without
    /// it the lowest local handle carrying `key_id` wins.
    pub fn find_endpoint(&self, key_id: u32, local: Option<Handle>) -> Option<&KeyRelation> {
        match local {
            Some(local) => self.endpoints.get(&(key_id, local)),
            None => self
                .endpoints
                .range((key_id, Handle::NIL)..)
                .next()
                .filter(|((k, _), _)| *k == key_id)
                .map(|(_, rel)| rel),
        }
    }

    /// Insert a specific relation unless one exists for its key id.
    pub fn insert_specific(&mut self, relation: KeyRelation) -> bool {
        if self.specific.contains_key(&relation.key_id) {
            return false;
        }
        self.specific.insert(relation.key_id, relation);
        true
    }

    pub fn remove_specific(&mut self, key_id: u32) -> Option<KeyRelation> {
        self.specific.remove(&key_id)
    }

    pub fn find_specific(&self, key_id: u32) -> Option<&KeyRelation> {
        self.specific.get(&key_id)
    }

    /// Drop every relation that names `handle` on either side.
    pub fn remove_involving(&mut self, handle: Handle) -> usize {
        let before = self.len();
        self.endpoints
            .retain(|_, rel| rel.local != handle && rel.remote != handle);
        self.specific
            .retain(|_, rel| rel.local != handle && rel.remote != handle);
        before - self.len()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len() + self.specific.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
