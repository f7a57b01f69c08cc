// Share advertisement datagram
//
// Fixed 98 bytes:
// [1]  wire version
// [1]  share index (1..=n)
// [32] share value, canonical scalar
// [32] sender public point, compressed Ristretto
// [32] sender tag, hash of the public point

use crate::crypto::{PublicPoint, Share};
use crate::identity::{OutgoingShare, SenderTag};
use crate::{EncounterError, Result};

pub const ADVERTISEMENT_VERSION: u8 = 0x01;
pub const ADVERTISEMENT_LEN: usize = 98;

#[derive(Debug, Clone)]
pub struct Advertisement {
    share: Share,
    sender_public: PublicPoint,
    sender_tag: SenderTag,
}

impl Advertisement {
    pub fn new(share: Share, sender_public: PublicPoint, sender_tag: SenderTag) -> Self {
        Self {
            share,
            sender_public,
            sender_tag,
        }
    }

    pub fn share(&self) -> &Share {
        &self.share
    }

    pub fn sender_public(&self) -> PublicPoint {
        self.sender_public
    }

    pub fn sender_tag(&self) -> SenderTag {
        self.sender_tag
    }

    pub fn into_parts(self) -> (SenderTag, Share, PublicPoint) {
        (self.sender_tag, self.share, self.sender_public)
    }

    pub fn to_bytes(&self) -> [u8; ADVERTISEMENT_LEN] {
        let mut out = [0u8; ADVERTISEMENT_LEN];
        out[0] = ADVERTISEMENT_VERSION;
        out[1] = self.share.index();
        out[2..34].copy_from_slice(&self.share.value_bytes());
        out[34..66].copy_from_slice(&self.sender_public.to_bytes());
        out[66..98].copy_from_slice(self.sender_tag.as_bytes());
        out
    }

    /// Parse a datagram. Tag/point consistency is left to the aggregator.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != ADVERTISEMENT_LEN {
            return Err(EncounterError::SerializationError(format!(
                "advertisement must be {} bytes, got {}",
                ADVERTISEMENT_LEN,
                data.len()
            )));
        }
        if data[0] != ADVERTISEMENT_VERSION {
            return Err(EncounterError::SerializationError(format!(
                "unsupported advertisement version {}",
                data[0]
            )));
        }

        let share = Share::new(data[1], field(&data[2..34]))?;
        let sender_public = PublicPoint::from_bytes(&field(&data[34..66]))?;
        let sender_tag = SenderTag::from_bytes(field(&data[66..98]));

        Ok(Self {
            share,
            sender_public,
            sender_tag,
        })
    }
}

fn field(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    out
}

impl From<&OutgoingShare> for Advertisement {
    fn from(outgoing: &OutgoingShare) -> Self {
        Self::new(outgoing.share.clone(), outgoing.public, outgoing.tag)
    }
}
