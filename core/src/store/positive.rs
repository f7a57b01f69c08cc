// Positive filter store
//
// Keeps every uploaded presence filter under a monotonically increasing key
// and answers queries by checking the query filter against each of them.
// Uploads are never deduplicated or merged. The store is pinned to one filter
// shape; uploads and queries of any other shape are rejected.

use super::backend::StorageBackend;
use crate::bloom::{BloomFilter, BloomParams};
use crate::exposure::{BackendStore, QueryVerdict};
use crate::{EncounterError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FILTER_PREFIX: &[u8] = b"filter/";

/// When does a query filter count as matching a stored filter?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Every bit of the query is set in the stored filter. Only sound for a
    /// query holding a single encounter.
    Subset,
    /// At least `min_bits` bits are set in both
    Overlap { min_bits: usize },
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::for_params(BloomParams::default())
    }
}

impl MatchPolicy {
    /// One shared encounter sets `k` common bits
    pub fn for_params(params: BloomParams) -> Self {
        MatchPolicy::Overlap {
            min_bits: usize::from(params.hash_count),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            MatchPolicy::Overlap { min_bits: 0 } => Err(EncounterError::InvalidConfig(
                "overlap match policy needs min_bits >= 1".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// An empty query never matches
    pub fn matches(&self, query: &BloomFilter, stored: &BloomFilter) -> Result<bool> {
        query.ensure_compatible(stored)?;
        if query.is_empty() {
            return Ok(false);
        }
        match self {
            MatchPolicy::Subset => query.is_subset_of(stored),
            MatchPolicy::Overlap { min_bits } => Ok(query.overlap(stored)? >= *min_bits),
        }
    }
}

fn filter_key(seq: u64) -> Vec<u8> {
    let mut key = FILTER_PREFIX.to_vec();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

pub struct PositiveFilterStore {
    backend: Arc<dyn StorageBackend>,
    params: BloomParams,
    policy: MatchPolicy,
    next_seq: Mutex<u64>,
}

impl PositiveFilterStore {
    /// Resumes numbering after any filters already in `backend`
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        params: BloomParams,
        policy: MatchPolicy,
    ) -> Result<Self> {
        params.validate()?;
        policy.validate()?;
        let existing = backend.count_prefix(FILTER_PREFIX)? as u64;
        if existing > 0 {
            info!("📂 Positive filter store resumed with {} filters", existing);
        }
        Ok(Self {
            backend,
            params,
            policy,
            next_seq: Mutex::new(existing),
        })
    }

    pub fn params(&self) -> BloomParams {
        self.params
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    fn ensure_shape(&self, filter: &BloomFilter) -> Result<()> {
        let shape = filter.params();
        if shape != self.params {
            return Err(EncounterError::SerializationError(format!(
                "filter shape m={} k={} does not match store shape m={} k={}",
                shape.size_slots, shape.hash_count, self.params.size_slots, self.params.hash_count
            )));
        }
        Ok(())
    }

    /// Store an encoded filter. Counting filters are collapsed to presence bits.
    pub fn upload(&self, bytes: &[u8]) -> Result<u64> {
        let filter = BloomFilter::from_any_bytes(bytes)?;
        self.ensure_shape(&filter)?;

        let mut next_seq = self.next_seq.lock();
        let seq = *next_seq;
        self.backend.put(&filter_key(seq), &filter.to_bytes())?;
        self.backend.flush()?;
        *next_seq += 1;

        info!(
            "📥 Stored positive filter #{} ({} bits set)",
            seq,
            filter.count_ones()
        );
        Ok(seq)
    }

    /// Check a presence query filter against every stored filter.
    /// A stored entry that no longer decodes to the store's shape never matches.
    pub fn query(&self, bytes: &[u8]) -> Result<QueryVerdict> {
        let query = BloomFilter::from_bytes(bytes)?;
        self.ensure_shape(&query)?;
        let stored = self.backend.scan_prefix(FILTER_PREFIX)?;

        let per_filter = stored
            .iter()
            .map(|(key, value)| {
                let outcome = BloomFilter::from_bytes(value)
                    .and_then(|filter| self.policy.matches(&query, &filter));
                outcome.unwrap_or_else(|e| {
                    warn!("Skipping unusable stored filter {}: {}", hex::encode(key), e);
                    false
                })
            })
            .collect();

        let verdict = QueryVerdict::from_results(per_filter);
        debug!(
            "Query with {} bits set: {} of {} filters match",
            query.count_ones(),
            verdict.match_count(),
            verdict.per_filter.len()
        );
        Ok(verdict)
    }

    pub fn len(&self) -> Result<usize> {
        self.backend.count_prefix(FILTER_PREFIX)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl BackendStore for PositiveFilterStore {
    async fn upload(&self, filter: Vec<u8>) -> Result<()> {
        PositiveFilterStore::upload(self, &filter).map(|_| ())
    }

    async fn query(&self, filter: Vec<u8>) -> Result<QueryVerdict> {
        PositiveFilterStore::query(self, &filter)
    }
}
