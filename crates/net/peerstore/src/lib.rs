//! Peer metadata registry for libp2p networks.
//!
//! - [`address_book`] - known addresses per peer with observation metadata
//! - [`proto_book`] - known supported protocols per peer
//! - [`store`] - facade composing both books into one peer-centric view
//! - [`events`] - broadcast notifications for peer and attribute changes

pub mod address_book;
pub mod events;
pub mod identity;
pub mod proto_book;
pub mod registry;
pub mod store;

pub use address_book::{AddressBook, AddressRecord};
pub use events::{EventEmitter, PeerStoreEvent};
pub use identity::{IdentityError, PeerIdentity, PeerKey};
pub use proto_book::ProtoBook;
pub use registry::IdentityRegistry;
pub use store::{PeerRecord, PeerStore, PeerStoreConfig};
