//! Bloom filter sizing
//!
//! FPR = (1 - e^(-k·n/m))^k
//!
//! `m` and `k` are configuration. Filters never resize, so the operator trades
//! memory for false-positive rate up front.

use crate::{EncounterError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

/// Shape shared by every counting, presence and query filter that must be compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BloomParams {
    /// Number of slots (bits or counters), `m`
    pub size_slots: usize,
    /// Number of hash functions, `k`
    pub hash_count: u8,
}

impl Default for BloomParams {
    /// 100 KB of bits, 3 hash rounds
    fn default() -> Self {
        Self {
            size_slots: 800_000,
            hash_count: 3,
        }
    }
}

impl BloomParams {
    pub fn new(size_slots: usize, hash_count: u8) -> Result<Self> {
        let params = Self {
            size_slots,
            hash_count,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.size_slots == 0 || self.size_slots > u32::MAX as usize {
            return Err(EncounterError::InvalidConfig(format!(
                "bloom size {} must be in 1..={}",
                self.size_slots,
                u32::MAX
            )));
        }
        if self.hash_count == 0 {
            return Err(EncounterError::InvalidConfig(
                "bloom hash count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Expected false-positive rate after `inserted` distinct elements
    pub fn false_positive_rate(&self, inserted: usize) -> f64 {
        let m = self.size_slots as f64;
        let k = f64::from(self.hash_count);
        let n = inserted as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    /// Smallest `(m, k)` reaching `target_fpr` for `expected` elements
    pub fn optimal(expected: usize, target_fpr: f64) -> Self {
        if expected == 0 || !(target_fpr > 0.0 && target_fpr < 1.0) {
            return Self::default();
        }
        let n = expected as f64;
        let m = (-n * target_fpr.ln() / (LN_2 * LN_2)).ceil();
        let k = ((m / n) * LN_2).round().clamp(1.0, 32.0);
        Self {
            size_slots: (m as usize).max(1),
            hash_count: k as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_valid() {
        assert!(BloomParams::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_params() {
        assert!(BloomParams::new(0, 3).is_err());
        assert!(BloomParams::new(1024, 0).is_err());
    }

    #[test]
    fn test_fpr_formula() {
        let params = BloomParams::new(1000, 3).unwrap();
        assert_eq!(params.false_positive_rate(0), 0.0);

        let expected = (1.0 - (-3.0f64 * 100.0 / 1000.0).exp()).powi(3);
        assert!((params.false_positive_rate(100) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_optimal_params_meet_target() {
        let params = BloomParams::optimal(1000, 0.01);
        assert!(params.false_positive_rate(1000) <= 0.0101);
        assert_eq!(params.hash_count, 7);
    }
}
