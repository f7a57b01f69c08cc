//! Encounter derivation: peer share aggregation and encounter identifiers
//!
//! Shares heard over the broadcast medium are buffered per transient sender
//! tag. Once a tag has `t` distinct shares, the sender's ephemeral private
//! scalar is reconstructed, checked against the advertised public point, and
//! an encounter identifier is derived:
//!
//! ```text
//! EncID = hash(ecdh(local_priv, peer_pub)) = hash(ecdh(peer_priv, local_pub))
//! ```
//!
//! Both parties of a real encounter compute the same EncID; nobody else can
//! link it to either ephemeral identity.

mod aggregator;
mod buffer;

pub use aggregator::{AggregatorStats, IgnoreReason, ShareAggregator, ShareOutcome};
pub use buffer::PeerBuffer;

use crate::crypto::{self, PrivateScalar, PublicPoint};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hashed ECDH shared secret, identical on both sides of an encounter
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncounterId([u8; 32]);

impl EncounterId {
    /// Derive the identifier shared with the owner of `peer_public`
    pub fn derive(local: &PrivateScalar, peer_public: &PublicPoint) -> Self {
        let shared = crypto::ecdh(local, peer_public);
        Self(crypto::hash(shared.as_bytes()))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncounterId({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for EncounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;

    #[test]
    fn test_encounter_id_symmetry() {
        let mut rng = rand::rngs::OsRng;
        let (a_priv, a_pub) = generate_keypair(&mut rng);
        let (b_priv, b_pub) = generate_keypair(&mut rng);

        assert_eq!(
            EncounterId::derive(&a_priv, &b_pub),
            EncounterId::derive(&b_priv, &a_pub)
        );
    }

    #[test]
    fn test_encounter_id_differs_per_pair() {
        let mut rng = rand::rngs::OsRng;
        let (a_priv, _) = generate_keypair(&mut rng);
        let (_, b_pub) = generate_keypair(&mut rng);
        let (_, c_pub) = generate_keypair(&mut rng);

        assert_ne!(
            EncounterId::derive(&a_priv, &b_pub),
            EncounterId::derive(&a_priv, &c_pub)
        );
    }
}
