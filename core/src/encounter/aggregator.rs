// Peer share aggregation and reconstruction

use super::buffer::PeerBuffer;
use super::EncounterId;
use crate::crypto::{self, PublicPoint, Share};
use crate::identity::{EphemeralIdentity, SenderTag};
use crate::{EncounterError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

/// Why a share was dropped without touching any buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Our own broadcast echoed back
    OwnShare,
    /// The tag does not belong to the advertised public point
    TagMismatch,
    /// The tag already produced an encounter this epoch
    AlreadyReconstructed,
    /// No local identity to derive an encounter against
    NoActiveIdentity,
}

/// Result of feeding one share to the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    Ignored(IgnoreReason),
    /// Index already recorded for this tag; nothing changed
    Duplicate,
    /// Stored; `collected` distinct shares so far
    Buffered { collected: usize },
    /// Threshold reached but the shares did not match the advertised point
    Rejected,
    Reconstructed(EncounterId),
}

/// Running counters, mostly for logs and the CLI status line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub received: u64,
    pub duplicates: u64,
    pub evicted: u64,
    pub discarded: u64,
    pub rejected: u64,
    pub reconstructed: u64,
}

/// Buffers shares per sender tag and turns complete sets into encounter identifiers
pub struct ShareAggregator {
    threshold: u8,
    capacity: usize,
    buffers: HashMap<SenderTag, PeerBuffer>,
    /// Tags reconstructed this epoch, at most `capacity`, oldest first
    completed: HashSet<SenderTag>,
    completed_order: VecDeque<SenderTag>,
    stats: AggregatorStats,
}

impl ShareAggregator {
    pub fn new(threshold: u8, capacity: usize) -> Self {
        Self {
            threshold,
            capacity: capacity.max(1),
            buffers: HashMap::new(),
            completed: HashSet::new(),
            completed_order: VecDeque::new(),
            stats: AggregatorStats::default(),
        }
    }

    /// Feed one received share.
    ///
    /// Reconstruction runs as soon as the tag holds `t` distinct shares and
    /// uses the active local identity for the ECDH step.
    pub fn on_share_received(
        &mut self,
        tag: SenderTag,
        share: Share,
        sender_public: PublicPoint,
        local: &EphemeralIdentity,
        now: Instant,
    ) -> ShareOutcome {
        self.stats.received += 1;

        if tag == local.tag() {
            return ShareOutcome::Ignored(IgnoreReason::OwnShare);
        }
        if SenderTag::for_point(&sender_public) != tag {
            tracing::debug!("Ignored share #{} with mismatched tag {}", share.index(), tag);
            return ShareOutcome::Ignored(IgnoreReason::TagMismatch);
        }
        if self.completed.contains(&tag) {
            return ShareOutcome::Ignored(IgnoreReason::AlreadyReconstructed);
        }

        if !self.buffers.contains_key(&tag) && self.buffers.len() >= self.capacity {
            self.evict_oldest();
        }

        let index = share.index();
        let buffer = self
            .buffers
            .entry(tag)
            .or_insert_with(|| PeerBuffer::new(tag, sender_public, now));

        let collected = match buffer.insert(share) {
            Ok(collected) => collected,
            Err(err) => {
                self.stats.duplicates += 1;
                tracing::debug!("{} from {} (no-op)", err, tag);
                return ShareOutcome::Duplicate;
            }
        };

        tracing::debug!("Received share #{} from {} ({}/{})", index, tag, collected, self.threshold);

        if collected < self.threshold as usize {
            return ShareOutcome::Buffered { collected };
        }

        match self.reconstruct(tag, local) {
            Ok(enc_id) => ShareOutcome::Reconstructed(enc_id),
            Err(err) => {
                tracing::warn!("Reconstruction for {} failed: {}", tag, err);
                ShareOutcome::Rejected
            }
        }
    }

    /// Reconstruct the peer behind `tag` from exactly `t` buffered shares.
    ///
    /// Fails with `InsufficientShares` (buffer kept) below threshold. Any
    /// other outcome destroys the buffer.
    pub fn reconstruct(&mut self, tag: SenderTag, local: &EphemeralIdentity) -> Result<EncounterId> {
        let (shares, peer_public) = {
            let buffer = self.buffers.get(&tag).ok_or(EncounterError::InsufficientShares {
                needed: self.threshold,
                got: 0,
            })?;
            let shares = buffer
                .threshold_shares(self.threshold)
                .ok_or(EncounterError::InsufficientShares {
                    needed: self.threshold,
                    got: buffer.len(),
                })?;
            (shares, buffer.peer_public())
        };

        self.buffers.remove(&tag);

        let recovered = match crypto::combine(&shares, self.threshold) {
            Ok(recovered) => recovered,
            Err(err) => {
                self.stats.rejected += 1;
                return Err(err.into());
            }
        };
        if recovered.public_point() != peer_public {
            self.stats.rejected += 1;
            return Err(EncounterError::SerializationError(format!(
                "shares from {} do not reconstruct the advertised public point",
                tag
            )));
        }

        let enc_id = EncounterId::derive(local.private_scalar(), &peer_public);
        self.mark_completed(tag);
        self.stats.reconstructed += 1;
        tracing::info!("🤝 Reconstructed {} → EncID {}", tag, enc_id);

        Ok(enc_id)
    }

    /// Drop every incomplete buffer and forget completed tags.
    ///
    /// Called atomically with the local identity swap.
    pub fn on_epoch_rollover(&mut self) -> usize {
        let discarded = self.buffers.len();
        for buffer in self.buffers.values() {
            tracing::debug!(
                "Discarded {} with {}/{} shares",
                buffer.tag(),
                buffer.len(),
                self.threshold
            );
        }
        self.buffers.clear();
        self.completed.clear();
        self.completed_order.clear();
        self.stats.discarded += discarded as u64;
        discarded
    }

    /// Remember `tag` as done, forgetting the oldest once over capacity
    fn mark_completed(&mut self, tag: SenderTag) {
        if !self.completed.insert(tag) {
            return;
        }
        self.completed_order.push_back(tag);
        while self.completed_order.len() > self.capacity {
            if let Some(oldest) = self.completed_order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .buffers
            .values()
            .min_by_key(|buffer| buffer.first_seen_at())
            .map(|buffer| buffer.tag());

        if let Some(tag) = oldest {
            self.buffers.remove(&tag);
            self.stats.evicted += 1;
            let err = EncounterError::CapacityExceeded {
                capacity: self.capacity,
            };
            tracing::debug!("{}: evicted oldest buffer {}", err, tag);
        }
    }

    pub fn buffer(&self, tag: &SenderTag) -> Option<&PeerBuffer> {
        self.buffers.get(tag)
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }
}
