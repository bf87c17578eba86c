//! Caller-supplied identity objects retained per canonical key.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::identity::{PeerIdentity, PeerKey};

/// Map of canonical key to the identity object the caller supplied.
///
/// Shared by both books: the first `observe` of a key is what makes a peer
/// "known" store-wide and drives the `Peer` event. The stored identity is
/// handed back on lookups so callers see the object they supplied rather
/// than one reconstructed from the key.
#[derive(Debug)]
pub struct IdentityRegistry<Id: PeerIdentity> {
    ids: RwLock<HashMap<PeerKey, Id>>,
}

impl<Id: PeerIdentity> Default for IdentityRegistry<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: PeerIdentity> IdentityRegistry<Id> {
    pub fn new() -> Self {
        Self {
            ids: RwLock::new(HashMap::new()),
        }
    }

    /// Record the identity if its key is not yet known.
    /// Returns whether the key was previously unknown.
    pub fn observe(&self, id: &Id) -> bool {
        let key = id.peer_key();
        let mut ids = self.ids.write();
        if ids.contains_key(&key) {
            return false;
        }
        ids.insert(key, id.clone());
        true
    }

    pub fn get(&self, key: &PeerKey) -> Option<Id> {
        self.ids.read().get(key).cloned()
    }

    pub fn remove(&self, key: &PeerKey) -> Option<Id> {
        self.ids.write().remove(key)
    }

    pub fn contains(&self, key: &PeerKey) -> bool {
        self.ids.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.ids.write().clear();
    }
}
