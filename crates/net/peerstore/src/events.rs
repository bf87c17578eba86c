//! Store events and non-blocking broadcast emitter.

use std::collections::BTreeSet;

use tokio::sync::broadcast;

use crate::address_book::AddressRecord;
use crate::identity::{PeerIdentity, PeerKey};

/// Events raised by the books as peer data changes.
#[derive(Debug, Clone)]
pub enum PeerStoreEvent<Id: PeerIdentity> {
    /// A previously unknown peer was observed by either book.
    Peer { id: Id },
    /// A peer's address collection changed; carries the resulting collection.
    MultiaddrsChanged {
        id: Id,
        multiaddrs: Vec<AddressRecord>,
    },
    /// A peer's protocol set changed; carries the resulting set.
    ProtocolsChanged {
        id: Id,
        protocols: BTreeSet<String>,
    },
}

impl<Id: PeerIdentity> PeerStoreEvent<Id> {
    pub fn id(&self) -> &Id {
        match self {
            Self::Peer { id }
            | Self::MultiaddrsChanged { id, .. }
            | Self::ProtocolsChanged { id, .. } => id,
        }
    }

    /// Canonical key of the peer the event concerns.
    pub fn key(&self) -> PeerKey {
        self.id().peer_key()
    }

    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::MultiaddrsChanged { .. } | Self::ProtocolsChanged { .. }
        )
    }
}

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Non-blocking broadcast emitter. Emission never blocks or fails the
/// triggering mutation; slow subscribers lag and drop events independently.
#[derive(Debug)]
pub struct EventEmitter<Id: PeerIdentity> {
    tx: broadcast::Sender<PeerStoreEvent<Id>>,
}

impl<Id: PeerIdentity> Clone for EventEmitter<Id> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<Id: PeerIdentity> Default for EventEmitter<Id> {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl<Id: PeerIdentity> EventEmitter<Id> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: PeerStoreEvent<Id>) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerStoreEvent<Id>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<Id: PeerIdentity> EventEmitter<Id> {
    pub fn peer_added(&self, id: Id) {
        self.emit(PeerStoreEvent::Peer { id });
    }

    pub fn multiaddrs_changed(&self, id: Id, multiaddrs: Vec<AddressRecord>) {
        self.emit(PeerStoreEvent::MultiaddrsChanged { id, multiaddrs });
    }

    pub fn protocols_changed(&self, id: Id, protocols: BTreeSet<String>) {
        self.emit(PeerStoreEvent::ProtocolsChanged { id, protocols });
    }
}
