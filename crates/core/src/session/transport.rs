use std::fmt;
use std::net::SocketAddr;

use crate::transport::UdpTransport;

/// Negotiated data-plane delivery for a session.
///
/// Created during SETUP from the client's advertised port and the address
/// of its control connection. Dropping it closes the session's socket, so
/// the streaming pump must be stopped first.
pub struct Transport {
    /// Where RTP datagrams go (`client_ip:client_port`).
    pub client_addr: SocketAddr,
    /// Per-session outbound socket.
    pub udp: UdpTransport,
}

impl Transport {
    pub fn new(client_addr: SocketAddr, udp: UdpTransport) -> Self {
        tracing::debug!(%client_addr, "transport configured");
        Self { client_addr, udp }
    }
}

/// Client-side transport line carried by SETUP.
///
/// ```text
/// Transport: RTP/UDP; client_port= 25000
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    /// Client's RTP receive port.
    pub client_port: u16,
}

impl TransportHeader {
    pub fn new(client_port: u16) -> Self {
        Self { client_port }
    }

    /// Parse the value of the transport line (everything after `Transport:`).
    ///
    /// Looks for `client_port=` among semicolon-separated parameters and
    /// tolerates whitespace after the `=`. An RFC 2326 style port pair
    /// (`client_port=8000-8001`) yields its first port.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/UDP; client_port= 25000").unwrap();
    /// assert_eq!(th.client_port, 25000);
    ///
    /// assert!(TransportHeader::parse("RTP/UDP").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        for part in header.split(';') {
            if let Some(ports) = part.trim().strip_prefix("client_port=") {
                let port = ports.trim().split('-').next()?;
                return port.trim().parse().ok().map(Self::new);
            }
        }
        None
    }
}

impl fmt::Display for TransportHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transport: RTP/UDP; client_port= {}", self.client_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_transport() {
        let th = TransportHeader::parse("RTP/UDP; client_port= 5000").unwrap();
        assert_eq!(th.client_port, 5000);
    }

    #[test]
    fn parse_port_pair() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
        assert_eq!(th.client_port, 8000);
    }

    #[test]
    fn parse_no_client_port() {
        assert!(TransportHeader::parse("RTP/UDP;unicast").is_none());
    }

    #[test]
    fn parse_non_numeric_port() {
        assert!(TransportHeader::parse("RTP/UDP; client_port= abc").is_none());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let line = TransportHeader::new(25000).to_string();
        let value = line.split_once(':').unwrap().1;
        assert_eq!(TransportHeader::parse(value), Some(TransportHeader::new(25000)));
    }
}
