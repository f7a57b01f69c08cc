// In-process broadcast medium, one tokio broadcast channel per location

use super::{Location, ShareTransport};
use crate::{EncounterError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Shared "air" that `MemoryTransport`s broadcast into
#[derive(Default)]
pub struct MemoryMedium {
    channels: Mutex<HashMap<Location, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryMedium {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn sender(&self, location: Location) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .lock()
            .entry(location)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn subscribe(&self, location: Location) -> broadcast::Receiver<Vec<u8>> {
        self.sender(location).subscribe()
    }

    /// Nodes currently listening at `location`
    pub fn listeners(&self, location: Location) -> usize {
        self.channels
            .lock()
            .get(&location)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Transport attached to this medium, listening at `location`
    pub fn attach(self: &Arc<Self>, location: Location) -> MemoryTransport {
        MemoryTransport {
            medium: Arc::clone(self),
            location: Mutex::new(location),
            rx: tokio::sync::Mutex::new(self.subscribe(location)),
        }
    }
}

pub struct MemoryTransport {
    medium: Arc<MemoryMedium>,
    location: Mutex<Location>,
    rx: tokio::sync::Mutex<broadcast::Receiver<Vec<u8>>>,
}

#[async_trait]
impl ShareTransport for MemoryTransport {
    async fn broadcast(&self, datagram: &[u8]) -> Result<()> {
        let location = *self.location.lock();
        // No listeners is not an error: the datagram is simply lost
        let _ = self.medium.sender(location).send(datagram.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok(datagram) => return Ok(datagram),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!("Memory transport lagged, {} datagrams lost", missed);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EncounterError::TransportFailure(
                        "memory medium closed".to_string(),
                    ));
                }
            }
        }
    }

    async fn move_to(&self, location: Location) -> Result<()> {
        let fresh = self.medium.subscribe(location);
        *self.rx.lock().await = fresh;
        *self.location.lock() = location;
        Ok(())
    }

    fn location(&self) -> Location {
        *self.location.lock()
    }
}
