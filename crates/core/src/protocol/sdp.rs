//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the body returned by DESCRIBE replies:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <session> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                             ← session name
//! t=0 0                                        ← timing
//! a=tool:rtsp-vod                              ← server software
//! m=video <control-port> RTP/AVP 26            ← media description
//! a=control:streamid=<session>                 ← stream control id
//! a=mimetype:string;"video/MJPEG"              ← payload format
//! ```
//!
//! Origin and session-name fields come from
//! [`ServerConfig`](crate::ServerConfig).

use crate::server::ServerConfig;

/// Inputs describing one session.
pub struct Description<'a> {
    pub host: &'a str,
    pub control_port: u16,
    pub payload_type: u8,
    pub session_id: u32,
}

/// Generate an SDP session description.
pub fn generate_sdp(desc: &Description<'_>, config: &ServerConfig) -> String {
    let sdp = [
        "v=0".to_string(),
        format!(
            "o={} {} {} IN IP4 {}",
            config.sdp_username, desc.session_id, config.sdp_session_version, desc.host
        ),
        format!("s={}", config.sdp_session_name),
        "t=0 0".to_string(),
        "a=tool:rtsp-vod".to_string(),
        format!(
            "m=video {} RTP/AVP {}",
            desc.control_port, desc.payload_type
        ),
        format!("a=control:streamid={}", desc.session_id),
        "a=mimetype:string;\"video/MJPEG\"".to_string(),
    ];

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}
