use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Largest datagram the receive side accepts.
pub const MAX_DATAGRAM: usize = 65_535;

/// UDP transport for outbound RTP packet delivery.
///
/// Binds an ephemeral socket (`0.0.0.0:0`) per session. Clones share the
/// socket, so the streaming pump can send on it while the session keeps
/// ownership; the socket closes when the last clone is dropped.
///
/// This layer is address-only: it does not know about sessions. The caller
/// resolves the destination before calling [`send_to`](Self::send_to).
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind an ephemeral UDP socket for outbound RTP.
    pub fn bind() -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Send raw bytes to a specific socket address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, addr)?)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// Bind the client's receive socket on `port` (0 picks an ephemeral port).
///
/// Reads time out after `poll` so the receiving loop can observe its stop
/// signal.
pub fn bind_receiver(port: u16, poll: Duration) -> Result<Arc<UdpSocket>> {
    let socket = UdpSocket::bind(("0.0.0.0", port))?;
    socket.set_read_timeout(Some(poll))?;
    tracing::debug!(local_addr = ?socket.local_addr().ok(), "data-plane socket bound");
    Ok(Arc::new(socket))
}
