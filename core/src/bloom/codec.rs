//! Filter wire codec: size-prefixed and CRC32-checked
//!
//! Format (header 15 bytes, trailer 4 bytes):
//! [4 bytes] magic "DIMY"
//! [1 byte]  codec version
//! [1 byte]  kind (0x01 presence, 0x02 counting)
//! [4 bytes] m, slot count (LE u32)
//! [1 byte]  k, hash count
//! [4 bytes] payload length (LE u32)
//! [N bytes] payload. Presence: ceil(m/8) bytes LSB-first; counting: m counters
//! [4 bytes] CRC32 over everything before it (LE)

use super::{BloomFilter, BloomParams, CountingBloomFilter};
use crate::{EncounterError, Result};
use crc32fast::Hasher;

const FILTER_MAGIC: [u8; 4] = *b"DIMY";
const FILTER_CODEC_VERSION: u8 = 0x01;

const HEADER_LEN: usize = 15;
const TRAILER_LEN: usize = 4;

/// Which filter a byte string carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FilterKind {
    Presence = 0x01,
    Counting = 0x02,
}

impl FilterKind {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FilterKind::Presence),
            0x02 => Ok(FilterKind::Counting),
            other => Err(EncounterError::SerializationError(format!(
                "unknown filter kind 0x{:02x}",
                other
            ))),
        }
    }

    fn payload_len(self, params: BloomParams) -> usize {
        match self {
            FilterKind::Presence => params.size_slots.div_ceil(8),
            FilterKind::Counting => params.size_slots,
        }
    }
}

fn encode(kind: FilterKind, params: BloomParams, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    buf.extend_from_slice(&FILTER_MAGIC);
    buf.push(FILTER_CODEC_VERSION);
    buf.push(kind as u8);
    buf.extend_from_slice(&(params.size_slots as u32).to_le_bytes());
    buf.push(params.hash_count);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);

    let mut hasher = Hasher::new();
    hasher.update(&buf);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    buf
}

fn malformed(reason: impl Into<String>) -> EncounterError {
    EncounterError::SerializationError(reason.into())
}

fn decode(data: &[u8]) -> Result<(FilterKind, BloomParams, &[u8])> {
    if data.len() < HEADER_LEN + TRAILER_LEN {
        return Err(malformed(format!(
            "filter too short: need at least {} bytes, got {}",
            HEADER_LEN + TRAILER_LEN,
            data.len()
        )));
    }
    if data[0..4] != FILTER_MAGIC {
        return Err(malformed("bad filter magic"));
    }
    if data[4] != FILTER_CODEC_VERSION {
        return Err(malformed(format!("unsupported filter codec version {}", data[4])));
    }

    let kind = FilterKind::from_u8(data[5])?;
    let size_slots = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    let hash_count = data[10];
    let payload_len = u32::from_le_bytes([data[11], data[12], data[13], data[14]]) as usize;

    let params = BloomParams {
        size_slots,
        hash_count,
    };
    params
        .validate()
        .map_err(|err| malformed(format!("bad filter parameters: {}", err)))?;

    if payload_len != kind.payload_len(params) {
        return Err(malformed(format!(
            "payload length {} does not match m={} for {:?}",
            payload_len, size_slots, kind
        )));
    }
    let expected_total = HEADER_LEN + payload_len + TRAILER_LEN;
    if data.len() != expected_total {
        return Err(malformed(format!(
            "filter length mismatch: need {} bytes, got {}",
            expected_total,
            data.len()
        )));
    }

    let crc_offset = HEADER_LEN + payload_len;
    let mut hasher = Hasher::new();
    hasher.update(&data[..crc_offset]);
    let expected_crc = hasher.finalize();
    let actual_crc = u32::from_le_bytes([
        data[crc_offset],
        data[crc_offset + 1],
        data[crc_offset + 2],
        data[crc_offset + 3],
    ]);
    if expected_crc != actual_crc {
        return Err(malformed("filter CRC32 mismatch"));
    }

    Ok((kind, params, &data[HEADER_LEN..crc_offset]))
}

impl BloomFilter {
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(FilterKind::Presence, self.params(), self.as_raw_slice())
    }

    /// Decode a presence filter; counting bytes are refused
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        match decode(data)? {
            (FilterKind::Presence, params, payload) => BloomFilter::from_raw(params, payload.to_vec()),
            (kind, _, _) => Err(malformed(format!("expected presence filter, got {:?}", kind))),
        }
    }

    /// Decode either kind, collapsing counters to bits
    pub fn from_any_bytes(data: &[u8]) -> Result<Self> {
        match decode(data)? {
            (FilterKind::Presence, params, payload) => BloomFilter::from_raw(params, payload.to_vec()),
            (FilterKind::Counting, params, payload) => {
                Ok(CountingBloomFilter::from_raw(params, payload.to_vec())?.to_presence())
            }
        }
    }
}

impl CountingBloomFilter {
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(FilterKind::Counting, self.params(), self.counters())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        match decode(data)? {
            (FilterKind::Counting, params, payload) => {
                CountingBloomFilter::from_raw(params, payload.to_vec())
            }
            (kind, _, _) => Err(malformed(format!("expected counting filter, got {:?}", kind))),
        }
    }
}
