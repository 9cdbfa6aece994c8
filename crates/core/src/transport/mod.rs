//! Network transport layer for control signaling and RTP media delivery.
//!
//! The system uses a split transport model:
//!
//! - **TCP** ([`tcp`]): carries control requests and replies. One TCP
//!   connection per client, with a thread per connection. Both ends frame
//!   messages with [`tcp::MessageReader`].
//!
//! - **UDP** ([`udp`]): carries RTP media packets. Each session owns one
//!   outbound socket on the server and one receive socket on the client.

pub mod tcp;
pub mod udp;

use std::io;

pub use udp::UdpTransport;

/// Whether an I/O error is a read timeout rather than a hard failure.
///
/// Sockets in this crate poll with bounded timeouts, which surface as
/// `WouldBlock` or `TimedOut` depending on the platform.
pub fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
