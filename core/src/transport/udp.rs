// UDP broadcast transport
//
// Location N is UDP port N. Shares are sent to <broadcast addr>:N and heard by
// every process bound to that port, so the listen socket must allow address
// (and on unix, port) reuse.

use super::{Location, ShareTransport, ADVERTISEMENT_LEN};
use crate::{EncounterError, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;

// Anything larger than an advertisement is dropped by the codec anyway
const RECV_BUFFER: usize = 2 * ADVERTISEMENT_LEN;

pub struct UdpTransport {
    broadcast_ip: Ipv4Addr,
    location: Mutex<Location>,
    sender: UdpSocket,
    listener: RwLock<Arc<UdpSocket>>,
}

fn io_failure(context: &str, err: std::io::Error) -> EncounterError {
    EncounterError::TransportFailure(format!("{}: {}", context, err))
}

/// Bind a listening socket with SO_REUSEADDR (and SO_REUSEPORT on unix)
fn bind_listener(port: u16) -> Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )
    .map_err(|e| io_failure("socket create", e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| io_failure("SO_REUSEADDR", e))?;
    #[cfg(unix)]
    socket
        .set_reuse_port(true)
        .map_err(|e| io_failure("SO_REUSEPORT", e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| io_failure("nonblocking", e))?;

    let addr: socket2::SockAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).into();
    socket.bind(&addr).map_err(|e| io_failure("bind", e))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(|e| io_failure("tokio wrap", e))
}

impl UdpTransport {
    /// Must be called inside a tokio runtime
    pub async fn bind(location: Location, broadcast_ip: Ipv4Addr) -> Result<Self> {
        let sender = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| io_failure("bind sender", e))?;
        sender
            .set_broadcast(true)
            .map_err(|e| io_failure("SO_BROADCAST", e))?;
        let listener = bind_listener(location.0)?;

        tracing::info!("📡 UDP transport listening on {} (broadcast {})", location, broadcast_ip);

        Ok(Self {
            broadcast_ip,
            location: Mutex::new(location),
            sender,
            listener: RwLock::new(Arc::new(listener)),
        })
    }

    pub fn broadcast_ip(&self) -> Ipv4Addr {
        self.broadcast_ip
    }
}

#[async_trait]
impl ShareTransport for UdpTransport {
    async fn broadcast(&self, datagram: &[u8]) -> Result<()> {
        let target = SocketAddrV4::new(self.broadcast_ip, self.location.lock().0);
        self.sender
            .send_to(datagram, target)
            .await
            .map_err(|e| io_failure("send", e))?;
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let listener = Arc::clone(&self.listener.read());
        let mut buf = [0u8; RECV_BUFFER];
        let (len, _) = listener
            .recv_from(&mut buf)
            .await
            .map_err(|e| io_failure("recv", e))?;
        Ok(buf[..len].to_vec())
    }

    async fn move_to(&self, location: Location) -> Result<()> {
        let listener = bind_listener(location.0)?;
        *self.listener.write() = Arc::new(listener);
        let previous = std::mem::replace(&mut *self.location.lock(), location);
        tracing::info!("🚶 Moved {} -> {}", previous, location);
        Ok(())
    }

    fn location(&self) -> Location {
        *self.location.lock()
    }
}
