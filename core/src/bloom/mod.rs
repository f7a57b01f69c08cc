//! Bloom filters for encounter storage and exposure matching
//!
//! - `CountingBloomFilter`: what a node writes EncIDs into during a window
//! - `BloomFilter`: presence bits, used for uploads and for queries
//! - `BloomEngine`: window rotation and bounded history
//! - `codec`: the on-the-wire form of both filter kinds

mod codec;
mod counting;
mod engine;
mod filter;
mod hashing;
mod params;

pub use counting::CountingBloomFilter;
pub use engine::BloomEngine;
pub use filter::BloomFilter;
pub use params::BloomParams;
