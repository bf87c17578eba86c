//! Canonical peer keys and the identity capability trait.

use std::fmt;
use std::hash::Hash;

use libp2p::PeerId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The value does not decode to a recognized peer identity.
    #[error("invalid peer identity: {0}")]
    InvalidIdentity(String),
}

/// Canonical string form of a peer identity, used as the sole index for the
/// books and the identity registry.
///
/// Keys are only produced by [`PeerIdentity::peer_key`], so two distinct
/// identities never collide and the same identity always maps to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerKey(String);

impl PeerKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability trait for peer identity types.
///
/// The trait bound replaces a runtime "is this a valid identity" check: any
/// value accepted by the books already satisfies it. [`Self::from_peer_key`]
/// is the one fallible path, used to reconstruct identities from stored keys.
pub trait PeerIdentity:
    Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static
{
    /// Canonical key for this identity. Deterministic: the same identity
    /// always yields the same key.
    fn peer_key(&self) -> PeerKey;

    /// Reconstruct the identity from its canonical key.
    fn from_peer_key(key: &PeerKey) -> Result<Self, IdentityError>;
}

impl PeerIdentity for PeerId {
    fn peer_key(&self) -> PeerKey {
        PeerKey(self.to_base58())
    }

    fn from_peer_key(key: &PeerKey) -> Result<Self, IdentityError> {
        key.0
            .parse()
            .map_err(|_| IdentityError::InvalidIdentity(key.0.clone()))
    }
}
