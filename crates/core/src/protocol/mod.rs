//! Control protocol: an RTSP dialect with fixed line positions.
//!
//! This module handles the text-based session-control protocol: building
//! and parsing requests and replies, routing methods on the server, and
//! generating the SDP description body.
//!
//! ## Message format
//!
//! Lines are separated by `\n` (`\r\n` is accepted on input) and every
//! message ends with an empty line:
//!
//! ```text
//! PLAY movie.mjpeg RTSP/1.0\n
//! CSeq: 4\n
//! Session: 123456\n
//! RequestedFrame: 125\n
//! \n
//! ```
//!
//! Unlike RFC 2326, headers are positional. Line 1 is always `CSeq`; line 2
//! is `Transport` for SETUP and `Session` for every other method except
//! GET_LIST. The parser reads those positions and nothing else.
//!
//! ## Methods
//!
//! | Method | Valid server state | Purpose |
//! |--------|--------------------|---------|
//! | SETUP | INIT, SWITCHING | Open media, negotiate the client data port |
//! | DESCRIBE | any | SDP description of the session |
//! | PLAY | READY | Start (or seek and start) the streaming pump |
//! | PAUSE | PLAYING | Stop the pump, keep the position |
//! | TEARDOWN | not INIT | End the session |
//! | SWITCH | READY, PLAYING | Release current media before a new SETUP |
//! | GET_LIST | any | Names of playable media |

pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;

pub use handler::MethodHandler;
pub use request::{Method, RtspRequest};
pub use response::RtspResponse;

/// Protocol token on request and status lines.
pub const PROTOCOL_VERSION: &str = "RTSP/1.0";

/// Split `Name: value`, matching the name case-insensitively.
pub(crate) fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    key.trim()
        .eq_ignore_ascii_case(name)
        .then_some(value.trim())
}
