// Primitive library: ephemeral keypairs, ECDH, hashing and threshold sharing
//
// All operations are pure. Points live on Ristretto255; private keys and
// Shamir shares are elements of its scalar field, so a reconstructed share
// set yields exactly the scalar that produced the advertised public point.

mod keys;
mod shamir;

pub use keys::{ecdh, generate_keypair, PrivateScalar, PublicPoint, SharedPoint};
pub use shamir::{combine, split, Share};

use thiserror::Error;

/// 32-byte output of [`hash`].
pub type Digest = [u8; 32];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Insufficient shares: need {needed}, got {got}")]
    InsufficientShares { needed: u8, got: usize },

    #[error("Invalid threshold: t={threshold}, n={total}")]
    InvalidThreshold { threshold: u8, total: u8 },

    #[error("Invalid share index: {0}")]
    InvalidShareIndex(u8),

    #[error("Non-canonical scalar encoding")]
    NonCanonicalScalar,

    #[error("Invalid point encoding")]
    InvalidPoint,
}

/// One-way hash used for sender tags and encounter identifiers (Blake3).
pub fn hash(bytes: &[u8]) -> Digest {
    *blake3::hash(bytes).as_bytes()
}
