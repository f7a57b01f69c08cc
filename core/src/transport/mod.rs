//! Share broadcast transport
//!
//! A node's physical neighbourhood is modelled as a `Location`: everything
//! broadcast at a location reaches every node currently listening there, the
//! sender included. Delivery is unordered and lossy; nothing above this layer
//! assumes otherwise.

mod advertisement;
mod memory;
mod udp;

pub use advertisement::{Advertisement, ADVERTISEMENT_LEN, ADVERTISEMENT_VERSION};
pub use memory::{MemoryMedium, MemoryTransport};
pub use udp::UdpTransport;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broadcast domain a node is in; for UDP this is the port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location(pub u16);

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loc:{}", self.0)
    }
}

#[async_trait]
pub trait ShareTransport: Send + Sync {
    /// Send one datagram to everyone at the current location
    async fn broadcast(&self, datagram: &[u8]) -> Result<()>;

    /// Wait for the next datagram heard at the current location
    async fn recv(&self) -> Result<Vec<u8>>;

    /// Leave the current location and start listening at `location`
    async fn move_to(&self, location: Location) -> Result<()>;

    fn location(&self) -> Location;
}
