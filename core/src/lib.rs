// DIMY Core: Encounter Discovery Engine
//
// "Did I meet you?" answered from rotating ephemeral keys, threshold shares
// and bloom filters, without either side ever learning who the other was.

pub mod bloom;
pub mod config;
pub mod crypto;
pub mod encounter;
pub mod exposure;
pub mod identity;
pub mod node;
pub mod store;
pub mod transport;

use std::time::Duration;
use thiserror::Error;

pub use bloom::{BloomEngine, BloomFilter, BloomParams, CountingBloomFilter};
pub use config::ProtocolConfig;
pub use crypto::CryptoError;
pub use encounter::{EncounterId, ShareAggregator, ShareOutcome};
pub use exposure::{BackendStore, ExposureCoordinator, FilterSource, QueryVerdict, RemoteBackend};
pub use identity::{EphemeralIdentity, IdentityManager, SenderTag};
pub use node::{EncounterEngine, NodeCommand, NodeEvent, NodeHandle, NodeRuntime};
pub use store::{BackendServer, MatchPolicy, PositiveFilterStore};
pub use transport::{Advertisement, Location, MemoryMedium, ShareTransport, UdpTransport};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EncounterError {
    #[error("Clock error: rotation requested {behind:?} before the active epoch started")]
    ClockError { behind: Duration },
    #[error("Insufficient shares: need {needed}, got {got}")]
    InsufficientShares { needed: u8, got: usize },
    #[error("Duplicate share index {index}")]
    DuplicateShare { index: u8 },
    #[error("Peer buffer capacity {capacity} exceeded")]
    CapacityExceeded { capacity: usize },
    #[error("Transport failure: {0}")]
    TransportFailure(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<CryptoError> for EncounterError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InsufficientShares { needed, got } => {
                EncounterError::InsufficientShares { needed, got }
            }
            CryptoError::InvalidThreshold { .. } => EncounterError::InvalidConfig(err.to_string()),
            other => EncounterError::SerializationError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EncounterError>;
