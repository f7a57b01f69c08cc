// Ephemeral identity lifecycle: rotation and share broadcast schedule

mod ephemeral;

pub use ephemeral::{EphemeralIdentity, SenderTag, ShareSet};

use crate::crypto::{self, PublicPoint, Share};
use crate::{EncounterError, Result};
use ephemeral::BroadcastSchedule;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A share ready to leave the node, with the identity data the datagram carries
#[derive(Debug, Clone)]
pub struct OutgoingShare {
    pub share: Share,
    pub public: PublicPoint,
    pub tag: SenderTag,
    pub version: u64,
}

struct Schedule {
    version: u64,
    slots: BroadcastSchedule,
}

/// Owns the active ephemeral identity and the broadcast slots of its shares.
///
/// The active identity is an `Arc` snapshot swapped under a write lock, so a
/// reader holding a clone keeps seeing one consistent identity even while a
/// rotation replaces it.
pub struct IdentityManager {
    threshold: u8,
    total: u8,
    epoch_duration: Duration,
    active: RwLock<Option<Arc<EphemeralIdentity>>>,
    schedule: Mutex<Schedule>,
}

impl IdentityManager {
    pub fn new(threshold: u8, total: u8, epoch_duration: Duration) -> Result<Self> {
        if threshold == 0 || total == 0 || threshold > total {
            return Err(EncounterError::InvalidConfig(format!(
                "share threshold {} must be in 1..={}",
                threshold, total
            )));
        }
        if epoch_duration.is_zero() {
            return Err(EncounterError::InvalidConfig(
                "epoch duration must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            threshold,
            total,
            epoch_duration,
            active: RwLock::new(None),
            schedule: Mutex::new(Schedule {
                version: 0,
                slots: BroadcastSchedule::default(),
            }),
        })
    }

    /// Replace the active identity with a fresh one created at `now`.
    ///
    /// Unbroadcast shares of the previous identity are discarded.
    pub fn rotate(&self, now: Instant) -> Result<Arc<EphemeralIdentity>> {
        let mut rng = rand::rngs::OsRng;
        let mut schedule = self.schedule.lock();
        let mut active = self.active.write();

        if let Some(current) = active.as_ref() {
            if now < current.created_at() {
                return Err(EncounterError::ClockError {
                    behind: current.created_at() - now,
                });
            }
        }

        let version = schedule.version + 1;
        let (private, _) = crypto::generate_keypair(&mut rng);
        let shares = crypto::split(&private, self.threshold, self.total, &mut rng)?;
        let share_set = ShareSet::new(shares, self.threshold, self.total);
        let identity = Arc::new(EphemeralIdentity::new(
            private,
            now,
            self.epoch_duration,
            version,
        ));

        let discarded = schedule.slots.remaining();
        *schedule = Schedule {
            version,
            slots: BroadcastSchedule::uniform(share_set, now, self.epoch_duration),
        };
        *active = Some(identity.clone());

        tracing::info!(
            "🔑 Rotated ephemeral identity v{} tag={} ({} shares, t={}, {} unsent discarded)",
            version,
            identity.tag(),
            self.total,
            self.threshold,
            discarded
        );

        Ok(identity)
    }

    /// Snapshot of the active identity, if one has been generated
    pub fn active(&self) -> Option<Arc<EphemeralIdentity>> {
        self.active.read().clone()
    }

    /// Tag of the active identity; shares carrying it are our own echoes
    pub fn own_tag(&self) -> Option<SenderTag> {
        self.active.read().as_ref().map(|identity| identity.tag())
    }

    /// True when no identity exists yet or the active epoch has elapsed
    pub fn needs_rotation(&self, now: Instant) -> bool {
        match self.active.read().as_ref() {
            Some(identity) => identity.is_expired(now),
            None => true,
        }
    }

    /// Next unbroadcast share in index order, regardless of its slot time
    pub fn next_share(&self) -> Option<OutgoingShare> {
        let mut schedule = self.schedule.lock();
        let slot = schedule.slots.pop()?;
        self.outgoing(schedule.version, slot.share)
    }

    /// Next unbroadcast share whose slot has arrived
    pub fn due_share(&self, now: Instant) -> Option<OutgoingShare> {
        let mut schedule = self.schedule.lock();
        let slot = schedule.slots.pop_due(now)?;
        self.outgoing(schedule.version, slot.share)
    }

    /// Shares still waiting for a slot in the current epoch
    pub fn remaining_shares(&self) -> usize {
        self.schedule.lock().slots.remaining()
    }

    pub fn epoch_duration(&self) -> Duration {
        self.epoch_duration
    }

    fn outgoing(&self, version: u64, share: Share) -> Option<OutgoingShare> {
        let active = self.active.read();
        let identity = active.as_ref().filter(|identity| identity.version() == version)?;
        Some(OutgoingShare {
            share,
            public: identity.public_point(),
            tag: identity.tag(),
            version,
        })
    }
}
