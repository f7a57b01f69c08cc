// Ephemeral key material

use super::CryptoError;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Private scalar of an ephemeral identity. Wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateScalar(Scalar);

impl PrivateScalar {
    /// Draw a uniformly random, non-zero scalar
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let mut wide = [0u8; 64];
            rng.fill_bytes(&mut wide);
            let scalar = Scalar::from_bytes_mod_order_wide(&wide);
            wide.zeroize();
            if scalar != Scalar::ZERO {
                return Self(scalar);
            }
        }
    }

    /// Decode a canonical little-endian scalar
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes))
            .map(Self)
            .ok_or(CryptoError::NonCanonicalScalar)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// The public point `priv * G`
    pub fn public_point(&self) -> PublicPoint {
        PublicPoint(RistrettoPoint::mul_base(&self.0))
    }

    pub(crate) fn from_scalar(scalar: Scalar) -> Self {
        Self(scalar)
    }

    pub(crate) fn as_scalar(&self) -> &Scalar {
        &self.0
    }
}

impl Drop for PrivateScalar {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for PrivateScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateScalar(<redacted>)")
    }
}

/// Public point of an ephemeral identity, exchanged as a compressed Ristretto encoding.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicPoint(RistrettoPoint);

impl PublicPoint {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        CompressedRistretto(*bytes)
            .decompress()
            .map(Self)
            .ok_or(CryptoError::InvalidPoint)
    }
}

impl fmt::Debug for PublicPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicPoint({})", hex::encode(&self.to_bytes()[..4]))
    }
}

/// Result of scalar multiplication between one node's private scalar and another's public point.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedPoint([u8; 32]);

impl SharedPoint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Generate a fresh ephemeral keypair
pub fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (PrivateScalar, PublicPoint) {
    let private = PrivateScalar::random(rng);
    let public = private.public_point();
    (private, public)
}

/// ECDH over Ristretto255: `priv * pub`.
///
/// Commutes across the two parties: `a * (b * G) == b * (a * G)`.
pub fn ecdh(private: &PrivateScalar, public: &PublicPoint) -> SharedPoint {
    SharedPoint((public.0 * private.0).compress().to_bytes())
}
