//! Peer store facade composing the address and protocol books.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use hashlink::LinkedHashMap;
use libp2p::Multiaddr;
use tokio::sync::broadcast;
use tracing::warn;

use crate::address_book::{AddressBook, AddressRecord};
use crate::events::{EventEmitter, PeerStoreEvent};
use crate::identity::{PeerIdentity, PeerKey};
use crate::proto_book::ProtoBook;
use crate::registry::IdentityRegistry;

/// Peer store configuration.
#[derive(Debug, Clone)]
pub struct PeerStoreConfig {
    /// Broadcast channel capacity for store events.
    pub event_channel_capacity: usize,
}

impl Default for PeerStoreConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: 256,
        }
    }
}

/// On-demand projection of everything known about one peer.
///
/// Computed fresh on every read, never stored, so it cannot go stale.
#[derive(Debug, Clone)]
pub struct PeerRecord<Id: PeerIdentity> {
    pub id: Id,
    pub multiaddrs: Vec<AddressRecord>,
    pub protocols: BTreeSet<String>,
}

impl<Id: PeerIdentity> PeerRecord<Id> {
    pub fn supports(&self, protocol: &str) -> bool {
        self.protocols.contains(protocol)
    }

    pub fn has_multiaddr(&self, multiaddr: &Multiaddr) -> bool {
        self.multiaddrs.iter().any(|r| &r.multiaddr == multiaddr)
    }
}

/// Facade over the two books plus the identity registry.
///
/// Holds no attribute data of its own: reads query the live books. Each book
/// serializes its own mutations, but nothing is atomic across books: a
/// concurrent writer may be visible in one book and not yet the other, and
/// [`PeerStore::delete`] removes from the books one at a time. Callers that
/// need cross-book atomicity must coordinate externally.
#[derive(Debug)]
pub struct PeerStore<Id: PeerIdentity> {
    config: PeerStoreConfig,
    address_book: AddressBook<Id>,
    proto_book: ProtoBook<Id>,
    identities: Arc<IdentityRegistry<Id>>,
    events: EventEmitter<Id>,
}

impl<Id: PeerIdentity> Default for PeerStore<Id> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<Id: PeerIdentity> PeerStore<Id> {
    pub fn new(config: PeerStoreConfig) -> Self {
        let events = EventEmitter::new(config.event_channel_capacity);
        let identities = Arc::new(IdentityRegistry::new());
        Self {
            config,
            address_book: AddressBook::new(Arc::clone(&identities), events.clone()),
            proto_book: ProtoBook::new(Arc::clone(&identities), events.clone()),
            identities,
            events,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PeerStoreConfig::default())
    }

    pub fn config(&self) -> &PeerStoreConfig {
        &self.config
    }

    pub fn address_book(&self) -> &AddressBook<Id> {
        &self.address_book
    }

    pub fn proto_book(&self) -> &ProtoBook<Id> {
        &self.proto_book
    }

    pub fn identities(&self) -> &IdentityRegistry<Id> {
        &self.identities
    }

    /// Everything known about every peer, keyed by canonical key.
    ///
    /// Address-book entries are walked first, then proto-book entries for
    /// keys not already seen, so a key present in both books appears exactly
    /// once with fields from both. Each book is snapshotted under its own
    /// lock; the two snapshots are not taken atomically.
    pub fn all_peers(&self) -> LinkedHashMap<PeerKey, PeerRecord<Id>> {
        let mut peers = LinkedHashMap::new();

        for (key, multiaddrs) in self.address_book.entries() {
            let Some(id) = self.display_identity(&key) else {
                continue;
            };
            let protocols = self.proto_book.get_by_key(&key).unwrap_or_default();
            peers.insert(
                key,
                PeerRecord {
                    id,
                    multiaddrs,
                    protocols,
                },
            );
        }

        for (key, protocols) in self.proto_book.entries() {
            if peers.contains_key(&key) {
                continue;
            }
            let Some(id) = self.display_identity(&key) else {
                continue;
            };
            peers.insert(
                key,
                PeerRecord {
                    id,
                    multiaddrs: Vec::new(),
                    protocols,
                },
            );
        }

        peers
    }

    /// Everything known about one peer, or `None` if the peer is present in
    /// neither book nor the identity registry. Missing pieces default to
    /// empty collections, never to absent fields.
    pub fn get(&self, id: &Id) -> Option<PeerRecord<Id>> {
        let key = id.peer_key();
        let stored = self.identities.get(&key);
        let multiaddrs = self.address_book.get_by_key(&key);
        let protocols = self.proto_book.get_by_key(&key);

        if stored.is_none() && multiaddrs.is_none() && protocols.is_none() {
            return None;
        }

        Some(PeerRecord {
            id: stored.unwrap_or_else(|| id.clone()),
            multiaddrs: multiaddrs.unwrap_or_default(),
            protocols: protocols.unwrap_or_default(),
        })
    }

    /// Delete the peer from both books and drop its retained identity.
    /// Returns whether either book held the key.
    ///
    /// Two-step and non-atomic: a concurrent `set` may land in one book
    /// between the two removals. Accepted weak consistency.
    pub fn delete(&self, id: &Id) -> bool {
        let addresses_deleted = self.address_book.delete(id);
        let protocols_deleted = self.proto_book.delete(id);
        self.identities.remove(&id.peer_key());
        addresses_deleted || protocols_deleted
    }

    pub fn contains(&self, id: &Id) -> bool {
        let key = id.peer_key();
        self.identities.contains(&key)
            || self.address_book.get_by_key(&key).is_some()
            || self.proto_book.get_by_key(&key).is_some()
    }

    /// Number of distinct peers across both books.
    pub fn peer_count(&self) -> usize {
        let mut keys: HashSet<PeerKey> = self.address_book.keys().into_iter().collect();
        keys.extend(self.proto_book.keys());
        keys.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerStoreEvent<Id>> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventEmitter<Id> {
        &self.events
    }

    pub fn clear(&self) {
        self.address_book.clear();
        self.proto_book.clear();
        self.identities.clear();
    }

    fn display_identity(&self, key: &PeerKey) -> Option<Id> {
        if let Some(id) = self.identities.get(key) {
            return Some(id);
        }
        match Id::from_peer_key(key) {
            Ok(id) => Some(id),
            Err(err) => {
                // Keys only ever come from live identities, so this is a bug
                // in the identity impl rather than a caller error
                warn!(peer = %key, %err, "book key does not decode to an identity");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use libp2p::PeerId;

    use super::*;

    fn test_peer_id(n: u8) -> PeerId {
        let bytes = [n; 32];
        let key = libp2p::identity::ed25519::SecretKey::try_from_bytes(bytes).unwrap();
        let keypair =
            libp2p::identity::Keypair::from(libp2p::identity::ed25519::Keypair::from(key));
        keypair.public().to_peer_id()
    }

    fn test_addr(port: u16) -> Multiaddr {
        format!("/ip4/127.0.0.1/tcp/{port}").parse().unwrap()
    }

    /// Four peers as in the populated-books fixtures:
    /// peer 0 with two addresses and one protocol, peer 1 with one address
    /// and two protocols, peer 2 with one address only, peer 3 sharing
    /// peer 2's address and one of peer 1's protocols.
    fn populated_store() -> (PeerStore<PeerId>, Vec<PeerId>) {
        let store = PeerStore::with_defaults();
        let ids: Vec<PeerId> = (1..=4).map(test_peer_id).collect();

        let _ = store
            .address_book()
            .set(&ids[0], [test_addr(8000), test_addr(8001)]);
        let _ = store.proto_book().set(&ids[0], ["/protocol1"]);

        let _ = store.address_book().set(&ids[1], [test_addr(8002)]);
        let _ = store.proto_book().set(&ids[1], ["/protocol2", "/protocol3"]);

        let _ = store.address_book().set(&ids[2], [test_addr(8003)]);

        let _ = store.address_book().set(&ids[3], [test_addr(8003)]);
        let _ = store.proto_book().set(&ids[3], ["/protocol2"]);

        (store, ids)
    }

    #[test]
    fn test_empty_store() {
        let store = PeerStore::<PeerId>::with_defaults();
        let id = test_peer_id(1);

        assert!(store.all_peers().is_empty());
        assert_eq!(store.peer_count(), 0);
        assert!(store.get(&id).is_none());
        assert!(!store.delete(&id));
        assert!(!store.contains(&id));
    }

    #[test]
    fn test_all_peers_unions_both_books() {
        let (store, ids) = populated_store();

        let peers = store.all_peers();
        assert_eq!(peers.len(), 4);
        assert_eq!(store.peer_count(), 4);
        for id in &ids {
            assert!(peers.contains_key(&id.peer_key()));
        }
    }

    #[test]
    fn test_all_peers_proto_only_peer() {
        let store = PeerStore::with_defaults();
        let id = test_peer_id(1);
        let _ = store.proto_book().set(&id, ["/protocol1"]);

        let peers = store.all_peers();
        assert_eq!(peers.len(), 1);

        let record = peers.get(&id.peer_key()).unwrap();
        assert!(record.multiaddrs.is_empty());
        assert!(record.supports("/protocol1"));
    }

    #[test]
    fn test_get_with_data_in_both_books() {
        let (store, ids) = populated_store();

        let record = store.get(&ids[0]).unwrap();
        assert_eq!(record.id, ids[0]);
        assert!(record.supports("/protocol1"));
        assert!(record.has_multiaddr(&test_addr(8000)));
        assert!(record.has_multiaddr(&test_addr(8001)));
    }

    #[test]
    fn test_get_with_partial_presence() {
        let (store, ids) = populated_store();

        // Peer 2 never touched the proto book
        let record = store.get(&ids[2]).unwrap();
        assert!(record.protocols.is_empty());
        assert!(record.has_multiaddr(&test_addr(8003)));
    }

    #[test]
    fn test_delete_removes_from_both_books() {
        let (store, ids) = populated_store();

        assert!(store.delete(&ids[0]));
        assert_eq!(store.all_peers().len(), 3);
        assert!(store.get(&ids[0]).is_none());
        assert!(!store.delete(&ids[0]));
    }

    #[test]
    fn test_delete_peer_in_one_book_only() {
        let (store, ids) = populated_store();

        // Peer 2 only has addresses
        assert!(store.delete(&ids[2]));
        assert_eq!(store.all_peers().len(), 3);
        assert!(store.get(&ids[2]).is_none());

        // A proto-book-only peer still deletes as existing
        let extra = test_peer_id(9);
        let _ = store.proto_book().set(&extra, ["/protocol9"]);
        assert!(store.delete(&extra));
        assert!(store.get(&extra).is_none());
        assert!(!store.all_peers().contains_key(&extra.peer_key()));
    }

    #[test]
    fn test_delete_purges_retained_identity() {
        let (store, ids) = populated_store();

        assert!(store.identities().contains(&ids[0].peer_key()));
        assert!(store.delete(&ids[0]));
        assert!(!store.identities().contains(&ids[0].peer_key()));
        assert!(store.get(&ids[0]).is_none());
    }

    #[test]
    fn test_get_registry_only_peer() {
        let (store, ids) = populated_store();

        // Books emptied directly; the retained identity keeps the peer
        // visible to get with empty collections
        assert!(store.address_book().delete(&ids[0]));
        assert!(store.proto_book().delete(&ids[0]));

        let record = store.get(&ids[0]).unwrap();
        assert!(record.multiaddrs.is_empty());
        assert!(record.protocols.is_empty());

        // But all_peers only walks the books
        assert!(!store.all_peers().contains_key(&ids[0].peer_key()));
    }

    #[test]
    fn test_filter_peers_by_protocol() {
        let (store, ids) = populated_store();

        let supporting: Vec<PeerKey> = store
            .all_peers()
            .into_iter()
            .filter(|(_, record)| record.supports("/protocol2"))
            .map(|(key, _)| key)
            .collect();

        assert_eq!(supporting, vec![ids[1].peer_key(), ids[3].peer_key()]);
    }

    #[test]
    fn test_filter_peers_by_multiaddr() {
        let (store, ids) = populated_store();

        let listening: Vec<PeerKey> = store
            .all_peers()
            .into_iter()
            .filter(|(_, record)| record.has_multiaddr(&test_addr(8003)))
            .map(|(key, _)| key)
            .collect();

        assert_eq!(listening, vec![ids[2].peer_key(), ids[3].peer_key()]);
    }

    #[test]
    fn test_scenario_three_peers() {
        let store = PeerStore::with_defaults();
        let (p, q, r) = (test_peer_id(1), test_peer_id(2), test_peer_id(3));

        let _ = store.address_book().set(&p, [test_addr(1), test_addr(2)]);
        let _ = store.proto_book().set(&p, ["/proto1"]);
        let _ = store.address_book().set(&q, [test_addr(3)]);
        let _ = store.proto_book().set(&q, ["/proto2", "/proto3"]);
        let _ = store.address_book().set(&r, [test_addr(4)]);

        let peers = store.all_peers();
        assert_eq!(peers.len(), 3);
        assert!(peers.get(&r.peer_key()).unwrap().protocols.is_empty());

        let supporting: Vec<PeerKey> = peers
            .into_iter()
            .filter(|(_, record)| record.supports("/proto2"))
            .map(|(key, _)| key)
            .collect();
        assert_eq!(supporting, vec![q.peer_key()]);
    }

    #[tokio::test]
    async fn test_peer_event_once_across_books() {
        let store = PeerStore::with_defaults();
        let id = test_peer_id(1);
        let mut rx = store.subscribe();

        let _ = store.proto_book().set(&id, ["/proto1"]);
        let _ = store.address_book().set(&id, [test_addr(8000)]);

        let mut peer_events = 0;
        let mut change_events = 0;
        for _ in 0..3 {
            match rx.recv().await.unwrap() {
                PeerStoreEvent::Peer { .. } => peer_events += 1,
                event => {
                    assert!(event.is_change());
                    change_events += 1;
                }
            }
        }

        assert_eq!(peer_events, 1);
        assert_eq!(change_events, 2);

        // Full deletion makes the key unknown again
        assert!(store.delete(&id));
        let _ = store.address_book().set(&id, [test_addr(8000)]);
        match rx.recv().await.unwrap() {
            PeerStoreEvent::Peer { id: got } => assert_eq!(got, id),
            event => panic!("expected Peer, got {event:?}"),
        }
    }

    #[test]
    fn test_concurrent_mutation() {
        use std::thread;

        let store = Arc::new(PeerStore::with_defaults());
        let mut handles = vec![];

        for n in 0..8u8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let id = test_peer_id(n % 4 + 1);
                for round in 0..50u16 {
                    if n % 2 == 0 {
                        let _ = store.address_book().set(&id, [test_addr(8000 + round)]);
                    } else {
                        let _ = store.proto_book().set(&id, [format!("/proto/{round}")]);
                    }
                    let _ = store.get(&id);
                    let _ = store.all_peers();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.peer_count(), 4);
        for n in 1..=4 {
            assert!(store.get(&test_peer_id(n)).is_some());
        }
    }

    #[test]
    fn test_clear() {
        let (store, ids) = populated_store();

        store.clear();
        assert_eq!(store.peer_count(), 0);
        assert!(store.all_peers().is_empty());
        assert!(store.get(&ids[0]).is_none());
    }
}
