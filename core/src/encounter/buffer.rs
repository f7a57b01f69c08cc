// Per-sender share buffer

use crate::crypto::{PublicPoint, Share};
use crate::identity::SenderTag;
use crate::{EncounterError, Result};
use std::collections::BTreeMap;
use std::time::Instant;

/// Shares heard from one transient sender tag, unique by index
#[derive(Debug)]
pub struct PeerBuffer {
    tag: SenderTag,
    peer_public: PublicPoint,
    shares: BTreeMap<u8, Share>,
    first_seen_at: Instant,
}

impl PeerBuffer {
    pub fn new(tag: SenderTag, peer_public: PublicPoint, first_seen_at: Instant) -> Self {
        Self {
            tag,
            peer_public,
            shares: BTreeMap::new(),
            first_seen_at,
        }
    }

    /// Record a share. A second share with an already recorded index is refused.
    pub fn insert(&mut self, share: Share) -> Result<usize> {
        let index = share.index();
        if self.shares.contains_key(&index) {
            return Err(EncounterError::DuplicateShare { index });
        }
        self.shares.insert(index, share);
        Ok(self.shares.len())
    }

    pub fn tag(&self) -> SenderTag {
        self.tag
    }

    pub fn peer_public(&self) -> PublicPoint {
        self.peer_public
    }

    pub fn first_seen_at(&self) -> Instant {
        self.first_seen_at
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn indices(&self) -> Vec<u8> {
        self.shares.keys().copied().collect()
    }

    /// The `threshold` lowest-index shares, or `None` while below threshold
    pub fn threshold_shares(&self, threshold: u8) -> Option<Vec<Share>> {
        if self.shares.len() < threshold as usize {
            return None;
        }
        Some(self.shares.values().take(threshold as usize).cloned().collect())
    }
}
