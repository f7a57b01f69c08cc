//! Exposure reporting and querying
//!
//! A node reported positive uploads the presence snapshot of its recent
//! windows. Every other node periodically sends a query filter built from its
//! own recent EncIDs; a match means the two nodes derived the same EncID, i.e.
//! they met. The backend never sees an EncID, only filter bits.

mod client;
mod coordinator;
pub mod protocol;

pub use client::{RemoteBackend, DEFAULT_REQUEST_TIMEOUT};
pub use coordinator::{ExposureCoordinator, ExposureMode, TickAction};

use crate::bloom::{BloomEngine, BloomFilter};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Answer to a query: aggregate plus one entry per stored filter, in upload order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryVerdict {
    pub matched: bool,
    pub per_filter: Vec<bool>,
}

impl QueryVerdict {
    pub fn from_results(per_filter: Vec<bool>) -> Self {
        Self {
            matched: per_filter.iter().any(|&hit| hit),
            per_filter,
        }
    }

    pub fn match_count(&self) -> usize {
        self.per_filter.iter().filter(|&&hit| hit).count()
    }
}

/// Where positive filters go and where queries are answered
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendStore: Send + Sync {
    async fn upload(&self, filter: Vec<u8>) -> Result<()>;
    async fn query(&self, filter: Vec<u8>) -> Result<QueryVerdict>;
}

/// Read access to a node's bloom state
pub trait FilterSource: Send + Sync {
    fn window_id(&self) -> u64;
    fn presence_snapshot(&self) -> BloomFilter;
    fn query_filter(&self) -> BloomFilter;
}

impl FilterSource for parking_lot::Mutex<BloomEngine> {
    fn window_id(&self) -> u64 {
        self.lock().window_id()
    }

    fn presence_snapshot(&self) -> BloomFilter {
        self.lock().presence_snapshot()
    }

    fn query_filter(&self) -> BloomFilter {
        self.lock().query_filter()
    }
}
