//! Known supported protocols per peer.

use std::collections::BTreeSet;
use std::sync::Arc;

use hashlink::LinkedHashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::events::EventEmitter;
use crate::identity::{PeerIdentity, PeerKey};
use crate::registry::IdentityRegistry;

/// Map of canonical peer key to the peer's protocol set.
///
/// Membership only: no ordering guarantees beyond the set's own, no
/// per-protocol metadata. Same locking discipline as the address book:
/// one `RwLock` over the whole map, no coordination with the other book.
#[derive(Debug)]
pub struct ProtoBook<Id: PeerIdentity> {
    data: RwLock<LinkedHashMap<PeerKey, BTreeSet<String>>>,
    identities: Arc<IdentityRegistry<Id>>,
    events: EventEmitter<Id>,
}

impl<Id: PeerIdentity> ProtoBook<Id> {
    pub(crate) fn new(identities: Arc<IdentityRegistry<Id>>, events: EventEmitter<Id>) -> Self {
        Self {
            data: RwLock::new(LinkedHashMap::new()),
            identities,
            events,
        }
    }

    /// Replace the peer's protocol set. Creates the entry if absent. Emits
    /// `Peer` first for a previously unknown key, then `ProtocolsChanged`
    /// with the resulting set.
    pub fn set(
        &self,
        id: &Id,
        protocols: impl IntoIterator<Item = impl Into<String>>,
    ) -> BTreeSet<String> {
        let key = id.peer_key();
        let protocols: BTreeSet<String> = protocols.into_iter().map(Into::into).collect();
        let newly_known = self.identities.observe(id);

        let mut data = self.data.write();
        match data.get_mut(&key) {
            Some(existing) => *existing = protocols.clone(),
            None => {
                data.insert(key.clone(), protocols.clone());
            }
        }
        drop(data);

        trace!(peer = %key, count = protocols.len(), "set protocols");

        if newly_known {
            debug!(peer = %key, "new peer observed");
            self.events.peer_added(id.clone());
        }
        self.events.protocols_changed(id.clone(), protocols.clone());

        protocols
    }

    /// Union `protocols` into the peer's set. Emits `ProtocolsChanged` only
    /// when the set grew.
    pub fn add(
        &self,
        id: &Id,
        protocols: impl IntoIterator<Item = impl Into<String>>,
    ) -> BTreeSet<String> {
        let key = id.peer_key();
        let newly_known = self.identities.observe(id);

        let mut data = self.data.write();
        let existing = data.entry(key.clone()).or_insert_with(BTreeSet::new);
        let before = existing.len();
        existing.extend(protocols.into_iter().map(Into::into));
        let grown = existing.len() > before;
        let result = existing.clone();
        drop(data);

        if newly_known {
            debug!(peer = %key, "new peer observed");
            self.events.peer_added(id.clone());
        }
        if grown {
            trace!(peer = %key, count = result.len(), "added protocols");
            self.events.protocols_changed(id.clone(), result.clone());
        }

        result
    }

    /// Current set, or `None` if the peer has no entry. A peer with an entry
    /// and zero recorded protocols yields `Some` of an empty set.
    pub fn get(&self, id: &Id) -> Option<BTreeSet<String>> {
        self.get_by_key(&id.peer_key())
    }

    pub fn get_by_key(&self, key: &PeerKey) -> Option<BTreeSet<String>> {
        self.data.read().get(key).cloned()
    }

    /// Remove the peer's entry entirely. Returns whether an entry existed.
    /// No event.
    pub fn delete(&self, id: &Id) -> bool {
        let key = id.peer_key();
        let removed = self.data.write().remove(&key).is_some();
        if removed {
            debug!(peer = %key, "deleted protocols");
        }
        removed
    }

    /// One consistent snapshot of the whole book, in insertion order.
    pub fn entries(&self) -> Vec<(PeerKey, BTreeSet<String>)> {
        self.data
            .read()
            .iter()
            .map(|(key, protocols)| (key.clone(), protocols.clone()))
            .collect()
    }

    pub fn keys(&self) -> Vec<PeerKey> {
        self.data.read().keys().cloned().collect()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.data.read().contains_key(&id.peer_key())
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.data.write().clear();
    }
}
