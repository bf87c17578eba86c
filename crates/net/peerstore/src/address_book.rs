//! Known addresses per peer with observation metadata.

use std::sync::Arc;

use hashlink::LinkedHashMap;
use hashlink::linked_hash_map::Entry;
use libp2p::Multiaddr;
use parking_lot::RwLock;
use tracing::{debug, trace};
use web_time::Instant;

use crate::events::EventEmitter;
use crate::identity::{PeerIdentity, PeerKey};
use crate::registry::IdentityRegistry;

/// One observed address plus observation metadata.
///
/// Re-observation of a known address merges into the existing record:
/// `first_seen` and `confirmed_at` survive, `last_seen` is refreshed.
#[derive(Debug, Clone)]
pub struct AddressRecord {
    pub multiaddr: Multiaddr,
    /// When this address was first observed for the peer.
    pub first_seen: Instant,
    /// When this address was most recently observed.
    pub last_seen: Instant,
    /// When the address was last confirmed reachable, if ever.
    pub confirmed_at: Option<Instant>,
}

impl AddressRecord {
    fn new(multiaddr: Multiaddr, now: Instant) -> Self {
        Self {
            multiaddr,
            first_seen: now,
            last_seen: now,
            confirmed_at: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }
}

/// Map of canonical peer key to the peer's ordered address collection.
///
/// The whole map sits behind one `RwLock`, so every mutation is serialized
/// against every other mutation on this book and [`AddressBook::entries`]
/// observes one consistent snapshot. Nothing here coordinates with the
/// protocol book.
#[derive(Debug)]
pub struct AddressBook<Id: PeerIdentity> {
    data: RwLock<LinkedHashMap<PeerKey, Vec<AddressRecord>>>,
    identities: Arc<IdentityRegistry<Id>>,
    events: EventEmitter<Id>,
}

impl<Id: PeerIdentity> AddressBook<Id> {
    pub(crate) fn new(identities: Arc<IdentityRegistry<Id>>, events: EventEmitter<Id>) -> Self {
        Self {
            data: RwLock::new(LinkedHashMap::new()),
            identities,
            events,
        }
    }

    /// Replace the peer's address collection with records derived from
    /// `multiaddrs`, merging metadata for addresses that already have a
    /// record. Creates the entry if absent. Emits `Peer` first for a
    /// previously unknown key, then `MultiaddrsChanged` with the resulting
    /// collection.
    pub fn set(
        &self,
        id: &Id,
        multiaddrs: impl IntoIterator<Item = Multiaddr>,
    ) -> Vec<AddressRecord> {
        let key = id.peer_key();
        let addrs: Vec<Multiaddr> = multiaddrs.into_iter().collect();
        let now = Instant::now();
        let newly_known = self.identities.observe(id);

        let mut data = self.data.write();
        let records = match data.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let merged = merge_records(entry.get(), &addrs, now);
                *entry.get_mut() = merged.clone();
                merged
            }
            Entry::Vacant(entry) => {
                let fresh = merge_records(&[], &addrs, now);
                entry.insert(fresh.clone());
                fresh
            }
        };
        drop(data);

        trace!(peer = %key, count = records.len(), "set multiaddrs");

        if newly_known {
            debug!(peer = %key, "new peer observed");
            self.events.peer_added(id.clone());
        }
        self.events.multiaddrs_changed(id.clone(), records.clone());

        records
    }

    /// Merge `multiaddrs` into the peer's collection without dropping
    /// existing records. Emits `MultiaddrsChanged` only when membership
    /// changed; refreshing metadata of known addresses does not re-notify.
    pub fn add(
        &self,
        id: &Id,
        multiaddrs: impl IntoIterator<Item = Multiaddr>,
    ) -> Vec<AddressRecord> {
        let key = id.peer_key();
        let now = Instant::now();
        let newly_known = self.identities.observe(id);

        let mut data = self.data.write();
        let records = data.entry(key.clone()).or_insert_with(Vec::new);
        let mut grown = false;
        for addr in multiaddrs {
            match records.iter_mut().find(|r| r.multiaddr == addr) {
                Some(record) => record.last_seen = now,
                None => {
                    records.push(AddressRecord::new(addr, now));
                    grown = true;
                }
            }
        }
        let records = records.clone();
        drop(data);

        if newly_known {
            debug!(peer = %key, "new peer observed");
            self.events.peer_added(id.clone());
        }
        if grown {
            trace!(peer = %key, count = records.len(), "added multiaddrs");
            self.events.multiaddrs_changed(id.clone(), records.clone());
        }

        records
    }

    /// Current collection, or `None` if the peer has no entry. A peer with
    /// an entry and zero recorded addresses yields `Some` of an empty
    /// collection.
    pub fn get(&self, id: &Id) -> Option<Vec<AddressRecord>> {
        self.get_by_key(&id.peer_key())
    }

    pub fn get_by_key(&self, key: &PeerKey) -> Option<Vec<AddressRecord>> {
        self.data.read().get(key).cloned()
    }

    /// Stamp the matching record as confirmed reachable. Metadata only, no
    /// event. Returns whether a record matched.
    pub fn confirm(&self, id: &Id, multiaddr: &Multiaddr) -> bool {
        let key = id.peer_key();
        let mut data = self.data.write();
        let Some(records) = data.get_mut(&key) else {
            return false;
        };
        match records.iter_mut().find(|r| &r.multiaddr == multiaddr) {
            Some(record) => {
                record.confirmed_at = Some(Instant::now());
                trace!(peer = %key, %multiaddr, "confirmed multiaddr");
                true
            }
            None => false,
        }
    }

    /// Remove the peer's entry entirely. Returns whether an entry existed.
    /// No event.
    pub fn delete(&self, id: &Id) -> bool {
        let key = id.peer_key();
        let removed = self.data.write().remove(&key).is_some();
        if removed {
            debug!(peer = %key, "deleted multiaddrs");
        }
        removed
    }

    /// One consistent snapshot of the whole book, in insertion order.
    pub fn entries(&self) -> Vec<(PeerKey, Vec<AddressRecord>)> {
        self.data
            .read()
            .iter()
            .map(|(key, records)| (key.clone(), records.clone()))
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

fn merge_records(
    existing: &[AddressRecord],
    addrs: &[Multiaddr],
    now: Instant,
) -> Vec<AddressRecord> {
    let mut records: Vec<AddressRecord> = Vec::with_capacity(addrs.len());
    for addr in addrs {
        // Duplicates in the input collapse to the first occurrence
        if records.iter().any(|r| &r.multiaddr == addr) {
            continue;
        }
        let record = match existing.iter().find(|r| &r.multiaddr == addr) {
            Some(previous) => {
                let mut updated = previous.clone();
                updated.last_seen = now;
                updated
            }
            None => AddressRecord::new(addr.clone(), now),
        };
        records.push(record);
    }
    records
}
