//! Windowed Bloom engine
//!
//! Owns the live counting filter for the current window and a bounded history
//! of previous windows, each kept only as its collapsed presence filter.
//! EncIDs themselves are never retained: the query filter over recent
//! encounters is the OR of those windows, which sets exactly the bits a fresh
//! filter built from the same EncIDs would. Anything older than
//! `retained_windows - 1` previous windows is dropped outright.

use super::{BloomFilter, BloomParams, CountingBloomFilter};
use crate::encounter::EncounterId;
use std::collections::VecDeque;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct WindowRecord {
    window_id: u64,
    presence: BloomFilter,
}

pub struct BloomEngine {
    params: BloomParams,
    current: CountingBloomFilter,
    history: VecDeque<WindowRecord>,
    retained_windows: usize,
    window_id: u64,
}

impl BloomEngine {
    /// `retained_windows` counts the current window; values below 1 are treated as 1.
    pub fn new(params: BloomParams, retained_windows: usize) -> Self {
        Self {
            params,
            current: CountingBloomFilter::new(params),
            history: VecDeque::new(),
            retained_windows: retained_windows.max(1),
            window_id: 0,
        }
    }

    pub fn insert(&mut self, enc_id: &EncounterId) {
        self.current.insert(enc_id.as_bytes());
        debug!(
            "Inserted EncID {} into window {} ({} this window)",
            enc_id,
            self.window_id,
            self.current.inserted()
        );
    }

    /// Close the current window: archive its bits, zero the counters, advance the id
    pub fn window_roll(&mut self) -> u64 {
        let closed_count = self.current.inserted();
        self.history.push_front(WindowRecord {
            window_id: self.window_id,
            presence: self.current.to_presence(),
        });
        self.history.truncate(self.retained_windows - 1);
        self.current.reset();
        self.window_id += 1;

        info!(
            "🪟 Rolled bloom window {} -> {} ({} encounters closed, {} windows retained)",
            self.window_id - 1,
            self.window_id,
            closed_count,
            self.history.len() + 1
        );
        self.window_id
    }

    /// Fresh query filter over `enc_ids`, same shape as the engine's filters
    pub fn build_query<'a, I>(&self, enc_ids: I) -> BloomFilter
    where
        I: IntoIterator<Item = &'a EncounterId>,
    {
        let mut query = BloomFilter::new(self.params);
        for enc_id in enc_ids {
            query.insert(enc_id.as_bytes());
        }
        query
    }

    /// Current counters collapsed to bits, OR-ed with retained windows
    pub fn presence_snapshot(&self) -> BloomFilter {
        let mut snapshot = self.current.to_presence();
        for record in &self.history {
            snapshot.merge(&record.presence);
        }
        snapshot
    }

    /// Query over every encounter of the retained windows
    pub fn query_filter(&self) -> BloomFilter {
        self.presence_snapshot()
    }

    pub fn counting_filter(&self) -> &CountingBloomFilter {
        &self.current
    }

    pub fn params(&self) -> BloomParams {
        self.params
    }

    pub fn window_id(&self) -> u64 {
        self.window_id
    }

    /// Ids of the closed windows still covered, newest first
    pub fn retained_window_ids(&self) -> Vec<u64> {
        self.history.iter().map(|record| record.window_id).collect()
    }

    pub fn retained_history(&self) -> usize {
        self.history.len()
    }
}
