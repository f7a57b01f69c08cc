// Shamir (t, n) secret sharing over the Ristretto255 scalar field
//
// split:   f(x) = s + a_1*x + ... + a_{t-1}*x^{t-1}, share_i = (i, f(i)) for i in 1..=n
// combine: Lagrange interpolation of exactly t distinct points at x = 0

use super::keys::PrivateScalar;
use super::CryptoError;
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroize;

/// One point of the sharing polynomial
#[derive(Clone, PartialEq, Eq)]
pub struct Share {
    index: u8,
    value: Scalar,
}

impl Share {
    /// Build a share from its wire form. Index 0 would be the secret itself and is rejected.
    pub fn new(index: u8, value: [u8; 32]) -> Result<Self, CryptoError> {
        if index == 0 {
            return Err(CryptoError::InvalidShareIndex(index));
        }
        let value = Option::<Scalar>::from(Scalar::from_canonical_bytes(value))
            .ok_or(CryptoError::NonCanonicalScalar)?;
        Ok(Self { index, value })
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn value_bytes(&self) -> [u8; 32] {
        self.value.to_bytes()
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Share(#{})", self.index)
    }
}

impl Drop for Share {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

fn validate(threshold: u8, total: u8) -> Result<(), CryptoError> {
    if threshold == 0 || total == 0 || threshold > total {
        return Err(CryptoError::InvalidThreshold { threshold, total });
    }
    Ok(())
}

/// Split `secret` into `total` shares, any `threshold` of which reconstruct it.
pub fn split<R: RngCore + CryptoRng>(
    secret: &PrivateScalar,
    threshold: u8,
    total: u8,
    rng: &mut R,
) -> Result<Vec<Share>, CryptoError> {
    validate(threshold, total)?;

    let mut coefficients = Vec::with_capacity(threshold as usize);
    coefficients.push(*secret.as_scalar());
    for _ in 1..threshold {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        coefficients.push(Scalar::from_bytes_mod_order_wide(&wide));
        wide.zeroize();
    }

    let shares = (1..=total)
        .map(|index| {
            let x = Scalar::from(u64::from(index));
            // Horner's method
            let mut y = Scalar::ZERO;
            for coeff in coefficients.iter().rev() {
                y = y * x + coeff;
            }
            Share { index, value: y }
        })
        .collect();

    coefficients.zeroize();
    Ok(shares)
}

/// Reconstruct the secret from shares.
///
/// Exactly `threshold` distinct indices (the lowest ones) take part in the
/// interpolation; surplus shares are ignored. Duplicated indices count once.
pub fn combine(shares: &[Share], threshold: u8) -> Result<PrivateScalar, CryptoError> {
    if threshold == 0 {
        return Err(CryptoError::InvalidThreshold { threshold, total: 0 });
    }

    let distinct: BTreeMap<u8, &Share> = shares.iter().map(|s| (s.index, s)).collect();
    if distinct.len() < threshold as usize {
        return Err(CryptoError::InsufficientShares {
            needed: threshold,
            got: distinct.len(),
        });
    }

    let points: Vec<&Share> = distinct.into_values().take(threshold as usize).collect();

    let mut secret = Scalar::ZERO;
    for (i, share_i) in points.iter().enumerate() {
        let x_i = Scalar::from(u64::from(share_i.index));
        // L_i(0) = prod_{j != i} (0 - x_j) / (x_i - x_j)
        let mut basis = Scalar::ONE;
        for (j, share_j) in points.iter().enumerate() {
            if i != j {
                let x_j = Scalar::from(u64::from(share_j.index));
                basis *= -x_j * (x_i - x_j).invert();
            }
        }
        secret += share_i.value * basis;
    }

    Ok(PrivateScalar::from_scalar(secret))
}
