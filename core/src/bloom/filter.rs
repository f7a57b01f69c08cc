//! Plain (presence) Bloom filter
//!
//! Used both as the query filter a node builds from its own recent encounters
//! and as the uploaded form of a counting filter (counters collapsed to bits).
//!
//! INVARIANT: no false negatives. An inserted element always tests present.

use super::hashing::slot_indices;
use super::BloomParams;
use crate::{EncounterError, Result};
use bitvec::prelude::*;
use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    params: BloomParams,
    bits: BitVec<u8, Lsb0>,
}

impl BloomFilter {
    pub fn new(params: BloomParams) -> Self {
        Self {
            params,
            bits: bitvec![u8, Lsb0; 0; params.size_slots],
        }
    }

    /// Build from raw LSB-first bytes. Bits past `m` must be zero.
    pub(crate) fn from_raw(params: BloomParams, bytes: Vec<u8>) -> Result<Self> {
        let expected = params.size_slots.div_ceil(8);
        if bytes.len() != expected {
            return Err(EncounterError::SerializationError(format!(
                "presence payload is {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }
        let mut bits = BitVec::<u8, Lsb0>::from_vec(bytes);
        if bits[params.size_slots..].any() {
            return Err(EncounterError::SerializationError(
                "presence payload has bits set past the filter size".to_string(),
            ));
        }
        bits.truncate(params.size_slots);
        Ok(Self { params, bits })
    }

    pub(crate) fn set_slot(&mut self, slot: usize) {
        self.bits.set(slot, true);
    }

    pub fn insert(&mut self, item: &[u8]) {
        for slot in slot_indices(item, self.params) {
            self.bits.set(slot, true);
        }
    }

    /// Might `item` be in the set? Never false for an inserted item.
    pub fn contains(&self, item: &[u8]) -> bool {
        slot_indices(item, self.params)
            .into_iter()
            .all(|slot| self.bits[slot])
    }

    pub fn params(&self) -> BloomParams {
        self.params
    }

    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    pub(crate) fn as_raw_slice(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }

    /// Filters built with different `(m, k)` are not comparable
    pub fn ensure_compatible(&self, other: &BloomFilter) -> Result<()> {
        if self.params != other.params {
            return Err(EncounterError::SerializationError(format!(
                "filter parameters differ: m={} k={} vs m={} k={}",
                self.params.size_slots,
                self.params.hash_count,
                other.params.size_slots,
                other.params.hash_count
            )));
        }
        Ok(())
    }

    /// OR `other` into this filter
    pub fn union_with(&mut self, other: &BloomFilter) -> Result<()> {
        self.ensure_compatible(other)?;
        self.merge(other);
        Ok(())
    }

    /// OR without the shape check; callers guarantee identical `(m, k)`
    pub(crate) fn merge(&mut self, other: &BloomFilter) {
        debug_assert_eq!(self.params, other.params);
        for (mine, theirs) in self
            .bits
            .as_raw_mut_slice()
            .iter_mut()
            .zip(other.bits.as_raw_slice())
        {
            *mine |= *theirs;
        }
    }

    /// True when every bit set here is also set in `other`
    pub fn is_subset_of(&self, other: &BloomFilter) -> Result<bool> {
        self.ensure_compatible(other)?;
        Ok(self.bits.iter_ones().all(|slot| other.bits[slot]))
    }

    /// Number of bits set in both filters
    pub fn overlap(&self, other: &BloomFilter) -> Result<usize> {
        self.ensure_compatible(other)?;
        Ok(self.bits.iter_ones().filter(|&slot| other.bits[slot]).count())
    }

    /// Expected false-positive rate for `inserted` elements at this shape
    pub fn false_positive_rate(&self, inserted: usize) -> f64 {
        self.params.false_positive_rate(inserted)
    }
}

impl fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BloomFilter")
            .field("m", &self.params.size_slots)
            .field("k", &self.params.hash_count)
            .field("ones", &self.count_ones())
            .finish()
    }
}
