// Encounter engine: identity, aggregation and bloom state of one node
//
// Lock order is aggregator -> identity -> bloom. Rotation holds the aggregator
// lock across the identity swap and the buffer purge, so a share is either
// handled entirely before or entirely after a rotation.

use crate::bloom::{BloomEngine, BloomFilter};
use crate::config::ProtocolConfig;
use crate::encounter::{AggregatorStats, IgnoreReason, ShareAggregator, ShareOutcome};
use crate::exposure::FilterSource;
use crate::identity::{EphemeralIdentity, IdentityManager, SenderTag};
use crate::transport::Advertisement;
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What one timer tick did
#[derive(Debug, Default)]
pub struct TickReport {
    /// Version of the identity created this tick
    pub rotated: Option<u64>,
    /// Incomplete peer buffers dropped by that rotation
    pub discarded_buffers: usize,
    /// Share whose broadcast slot arrived
    pub outgoing: Option<Advertisement>,
    /// New window id if the bloom window rolled
    pub window_rolled: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub identity_version: Option<u64>,
    pub own_tag: Option<SenderTag>,
    pub remaining_shares: usize,
    pub peer_buffers: usize,
    pub window_id: u64,
    pub encounters_in_window: u64,
    pub aggregator: AggregatorStats,
}

pub struct EncounterEngine {
    identity: IdentityManager,
    aggregator: Mutex<ShareAggregator>,
    bloom: Mutex<BloomEngine>,
    window_started_at: Mutex<Option<Instant>>,
    window_duration: Duration,
}

impl EncounterEngine {
    pub fn new(config: &ProtocolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            identity: IdentityManager::new(
                config.share_threshold,
                config.share_count,
                config.epoch_duration(),
            )?,
            aggregator: Mutex::new(ShareAggregator::new(
                config.share_threshold,
                config.peer_buffer_capacity,
            )),
            bloom: Mutex::new(BloomEngine::new(config.bloom, config.retained_windows)),
            window_started_at: Mutex::new(None),
            window_duration: config.window_duration(),
        })
    }

    /// Swap in a fresh identity and drop every incomplete peer buffer
    pub fn rotate(&self, now: Instant) -> Result<(Arc<EphemeralIdentity>, usize)> {
        let mut aggregator = self.aggregator.lock();
        let identity = self.identity.rotate(now)?;
        let discarded = aggregator.on_epoch_rollover();
        if discarded > 0 {
            info!("♻️  Epoch rollover discarded {} incomplete peer buffers", discarded);
        }
        Ok((identity, discarded))
    }

    /// Timer step: rotate when due, roll the window when due, hand out a due share
    pub fn on_tick(&self, now: Instant) -> Result<TickReport> {
        let mut report = TickReport::default();

        if self.identity.needs_rotation(now) {
            let (identity, discarded) = self.rotate(now)?;
            report.rotated = Some(identity.version());
            report.discarded_buffers = discarded;
        }

        report.window_rolled = self.roll_window_if_due(now);
        report.outgoing = self
            .identity
            .due_share(now)
            .map(|outgoing| Advertisement::from(&outgoing));

        Ok(report)
    }

    fn roll_window_if_due(&self, now: Instant) -> Option<u64> {
        let mut started_at = self.window_started_at.lock();
        match *started_at {
            None => {
                *started_at = Some(now);
                None
            }
            Some(start) if now.saturating_duration_since(start) >= self.window_duration => {
                *started_at = Some(now);
                Some(self.bloom.lock().window_roll())
            }
            Some(_) => None,
        }
    }

    /// Feed one received datagram. Malformed datagrams are an error.
    pub fn on_datagram(&self, datagram: &[u8], now: Instant) -> Result<ShareOutcome> {
        let advertisement = Advertisement::from_bytes(datagram)?;
        let (tag, share, sender_public) = advertisement.into_parts();

        let mut aggregator = self.aggregator.lock();
        let Some(local) = self.identity.active() else {
            debug!("Share from {} before first rotation", tag);
            return Ok(ShareOutcome::Ignored(IgnoreReason::NoActiveIdentity));
        };

        let outcome = aggregator.on_share_received(tag, share, sender_public, &local, now);
        if let ShareOutcome::Reconstructed(enc_id) = &outcome {
            self.bloom.lock().insert(enc_id);
        }
        Ok(outcome)
    }

    pub fn identity(&self) -> &IdentityManager {
        &self.identity
    }

    pub fn bloom(&self) -> &Mutex<BloomEngine> {
        &self.bloom
    }

    pub fn stats(&self) -> EngineStats {
        let aggregator = self.aggregator.lock();
        let active = self.identity.active();
        let bloom = self.bloom.lock();
        EngineStats {
            identity_version: active.as_ref().map(|identity| identity.version()),
            own_tag: active.as_ref().map(|identity| identity.tag()),
            remaining_shares: self.identity.remaining_shares(),
            peer_buffers: aggregator.buffer_count(),
            window_id: bloom.window_id(),
            encounters_in_window: bloom.counting_filter().inserted(),
            aggregator: aggregator.stats().clone(),
        }
    }
}

impl FilterSource for EncounterEngine {
    fn window_id(&self) -> u64 {
        self.bloom.window_id()
    }

    fn presence_snapshot(&self) -> BloomFilter {
        self.bloom.presence_snapshot()
    }

    fn query_filter(&self) -> BloomFilter {
        self.bloom.query_filter()
    }
}
