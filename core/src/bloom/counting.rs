//! Counting Bloom filter (CBF)
//!
//! One `u8` counter per slot. Insertion increments the `k` selected counters,
//! saturating at 255 instead of wrapping, so a hot slot can never read as
//! empty. Counters only go down when the whole filter is reset at a window
//! roll.

use super::filter::BloomFilter;
use super::hashing::slot_indices;
use super::BloomParams;
use crate::{EncounterError, Result};

#[derive(Debug, Clone)]
pub struct CountingBloomFilter {
    params: BloomParams,
    counters: Vec<u8>,
    inserted: u64,
}

impl CountingBloomFilter {
    pub fn new(params: BloomParams) -> Self {
        Self {
            params,
            counters: vec![0u8; params.size_slots],
            inserted: 0,
        }
    }

    pub(crate) fn from_raw(params: BloomParams, counters: Vec<u8>) -> Result<Self> {
        if counters.len() != params.size_slots {
            return Err(EncounterError::SerializationError(format!(
                "counting payload is {} bytes, expected {}",
                counters.len(),
                params.size_slots
            )));
        }
        Ok(Self {
            params,
            counters,
            inserted: 0,
        })
    }

    pub fn insert(&mut self, item: &[u8]) {
        for slot in slot_indices(item, self.params) {
            self.counters[slot] = self.counters[slot].saturating_add(1);
        }
        self.inserted += 1;
    }

    pub fn contains(&self, item: &[u8]) -> bool {
        slot_indices(item, self.params)
            .into_iter()
            .all(|slot| self.counters[slot] > 0)
    }

    /// Zero every counter
    pub fn reset(&mut self) {
        self.counters.fill(0);
        self.inserted = 0;
    }

    /// Collapse counters to bits: slot set iff its counter is non-zero
    pub fn to_presence(&self) -> BloomFilter {
        let mut filter = BloomFilter::new(self.params);
        for (slot, _) in self.counters.iter().enumerate().filter(|(_, &c)| c > 0) {
            filter.set_slot(slot);
        }
        filter
    }

    pub fn counter(&self, slot: usize) -> u8 {
        self.counters.get(slot).copied().unwrap_or(0)
    }

    pub fn counters(&self) -> &[u8] {
        &self.counters
    }

    pub fn params(&self) -> BloomParams {
        self.params
    }

    /// Insertions since creation or the last reset
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    pub fn nonzero_slots(&self) -> usize {
        self.counters.iter().filter(|&&c| c > 0).count()
    }
}
