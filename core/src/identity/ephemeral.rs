// Ephemeral identities and their broadcast schedule

use crate::crypto::{self, PrivateScalar, PublicPoint, Share};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Transient sender tag: hash of the sender's ephemeral public point.
///
/// Rotates with the identity, so it never links two epochs of the same node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SenderTag([u8; 32]);

impl SenderTag {
    pub fn for_point(public: &PublicPoint) -> Self {
        Self(crypto::hash(&public.to_bytes()))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short hex form for logs
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for SenderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SenderTag({})", self.short())
    }
}

impl fmt::Display for SenderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

/// The node's keypair for one rotation epoch
pub struct EphemeralIdentity {
    private: PrivateScalar,
    public: PublicPoint,
    tag: SenderTag,
    created_at: Instant,
    epoch_duration: Duration,
    version: u64,
}

impl EphemeralIdentity {
    pub(crate) fn new(
        private: PrivateScalar,
        created_at: Instant,
        epoch_duration: Duration,
        version: u64,
    ) -> Self {
        let public = private.public_point();
        Self {
            tag: SenderTag::for_point(&public),
            private,
            public,
            created_at,
            epoch_duration,
            version,
        }
    }

    pub(crate) fn private_scalar(&self) -> &PrivateScalar {
        &self.private
    }

    pub fn public_point(&self) -> PublicPoint {
        self.public
    }

    pub fn tag(&self) -> SenderTag {
        self.tag
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn epoch_duration(&self) -> Duration {
        self.epoch_duration
    }

    /// Rotation counter, starting at 1 for the first identity
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn expires_at(&self) -> Instant {
        self.created_at + self.epoch_duration
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }
}

impl fmt::Debug for EphemeralIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralIdentity")
            .field("tag", &self.tag)
            .field("version", &self.version)
            .field("epoch_duration", &self.epoch_duration)
            .finish()
    }
}

/// Threshold split of an identity's private scalar
#[derive(Debug, Clone)]
pub struct ShareSet {
    shares: Vec<Share>,
    threshold: u8,
    total: u8,
}

impl ShareSet {
    pub(crate) fn new(shares: Vec<Share>, threshold: u8, total: u8) -> Self {
        Self { shares, threshold, total }
    }

    pub fn shares(&self) -> &[Share] {
        &self.shares
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn total(&self) -> u8 {
        self.total
    }
}

/// A share waiting for its broadcast slot
#[derive(Debug, Clone)]
pub(crate) struct ScheduledShare {
    pub due_at: Instant,
    pub share: Share,
}

/// Broadcast slots evenly spaced across one epoch, consumed in index order
#[derive(Debug, Default)]
pub(crate) struct BroadcastSchedule {
    pending: VecDeque<ScheduledShare>,
}

impl BroadcastSchedule {
    pub fn uniform(share_set: ShareSet, start: Instant, epoch: Duration) -> Self {
        let total = u32::from(share_set.total.max(1));
        let pending = share_set
            .shares
            .into_iter()
            .enumerate()
            .map(|(slot, share)| ScheduledShare {
                due_at: start + epoch * slot as u32 / total,
                share,
            })
            .collect();
        Self { pending }
    }

    pub fn pop(&mut self) -> Option<ScheduledShare> {
        self.pending.pop_front()
    }

    pub fn pop_due(&mut self, now: Instant) -> Option<ScheduledShare> {
        match self.pending.front() {
            Some(next) if next.due_at <= now => self.pending.pop_front(),
            _ => None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_keypair, split};

    #[test]
    fn test_tag_follows_public_point() {
        let (private, public) = generate_keypair(&mut rand::rngs::OsRng);
        let identity = EphemeralIdentity::new(private, Instant::now(), Duration::from_secs(15), 1);
        assert_eq!(identity.tag(), SenderTag::for_point(&public));
        assert_eq!(identity.public_point(), public);
    }

    #[test]
    fn test_identity_expiry() {
        let (private, _) = generate_keypair(&mut rand::rngs::OsRng);
        let start = Instant::now();
        let identity = EphemeralIdentity::new(private, start, Duration::from_secs(15), 1);

        assert!(!identity.is_expired(start + Duration::from_secs(14)));
        assert!(identity.is_expired(start + Duration::from_secs(15)));
    }

    #[test]
    fn test_uniform_schedule_spacing() {
        let mut rng = rand::rngs::OsRng;
        let (private, _) = generate_keypair(&mut rng);
        let shares = split(&private, 3, 5, &mut rng).unwrap();
        let start = Instant::now();

        let mut schedule = BroadcastSchedule::uniform(
            ShareSet::new(shares, 3, 5),
            start,
            Duration::from_secs(15),
        );

        let mut expected = 0u64;
        let mut index = 1u8;
        while let Some(slot) = schedule.pop() {
            assert_eq!(slot.due_at, start + Duration::from_secs(expected));
            assert_eq!(slot.share.index(), index);
            expected += 3;
            index += 1;
        }
        assert_eq!(index, 6);
    }

    #[test]
    fn test_pop_due_waits_for_slot() {
        let mut rng = rand::rngs::OsRng;
        let (private, _) = generate_keypair(&mut rng);
        let shares = split(&private, 2, 2, &mut rng).unwrap();
        let start = Instant::now();
        let mut schedule = BroadcastSchedule::uniform(
            ShareSet::new(shares, 2, 2),
            start,
            Duration::from_secs(10),
        );

        assert!(schedule.pop_due(start).is_some());
        assert!(schedule.pop_due(start + Duration::from_secs(4)).is_none());
        assert!(schedule.pop_due(start + Duration::from_secs(5)).is_some());
        assert_eq!(schedule.remaining(), 0);
    }
}
