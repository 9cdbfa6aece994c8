use std::fmt;
use std::str::FromStr;

use super::{PROTOCOL_VERSION, field};
use crate::error::{ParseErrorKind, Result, RtspError};
use crate::session::transport::TransportHeader;

/// Control methods understood by client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Setup,
    Describe,
    Play,
    Pause,
    Teardown,
    Switch,
    GetList,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Describe => "DESCRIBE",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
            Self::Switch => "SWITCH",
            Self::GetList => "GET_LIST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = RtspError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "SETUP" => Self::Setup,
            "DESCRIBE" => Self::Describe,
            "PLAY" => Self::Play,
            "PAUSE" => Self::Pause,
            "TEARDOWN" => Self::Teardown,
            "SWITCH" => Self::Switch,
            "GET_LIST" => Self::GetList,
            other => {
                return Err(RtspError::parse(ParseErrorKind::UnknownMethod(
                    other.to_string(),
                )));
            }
        })
    }
}

/// A control request.
///
/// ```text
/// SETUP movie.mjpeg RTSP/1.0
/// CSeq: 1
/// Transport: RTP/UDP; client_port= 25000
/// ```
///
/// Which optional fields appear on the wire depends on the method:
///
/// | Method | Line 2 | Line 3 |
/// |--------|--------|--------|
/// | SETUP | `Transport` (required) | `Session` (re-SETUP after SWITCH) |
/// | PLAY | `Session` | `RequestedFrame` (seek) |
/// | GET_LIST | none | none |
/// | others | `Session` | none |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: Method,
    /// Media name. Empty for GET_LIST.
    pub target: String,
    pub cseq: u32,
    /// Session id; 0 or `None` before one has been assigned.
    pub session: Option<u32>,
    /// Client data-plane port (SETUP only).
    pub client_port: Option<u16>,
    /// Seek target (PLAY only). May be out of range; the server clamps.
    pub requested_frame: Option<i64>,
}

impl RtspRequest {
    pub fn new(method: Method, target: &str, cseq: u32) -> Self {
        Self {
            method,
            target: target.to_string(),
            cseq,
            session: None,
            client_port: None,
            requested_frame: None,
        }
    }

    pub fn with_session(mut self, session: u32) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_client_port(mut self, port: u16) -> Self {
        self.client_port = Some(port);
        self
    }

    pub fn with_requested_frame(mut self, frame: i64) -> Self {
        self.requested_frame = Some(frame);
        self
    }

    /// Serialize to wire format, including the terminating blank line.
    pub fn serialize(&self) -> String {
        let mut lines = Vec::with_capacity(5);

        if self.method == Method::GetList {
            lines.push(format!("{} {}", self.method, PROTOCOL_VERSION));
        } else {
            lines.push(format!(
                "{} {} {}",
                self.method, self.target, PROTOCOL_VERSION
            ));
        }
        lines.push(format!("CSeq: {}", self.cseq));

        match self.method {
            Method::Setup => {
                let port = self.client_port.unwrap_or(0);
                lines.push(TransportHeader::new(port).to_string());
                if let Some(session) = self.session.filter(|id| *id != 0) {
                    lines.push(format!("Session: {session}"));
                }
            }
            Method::GetList => {}
            _ => {
                lines.push(format!("Session: {}", self.session.unwrap_or(0)));
                if let Some(frame) = self.requested_frame {
                    lines.push(format!("RequestedFrame: {frame}"));
                }
            }
        }

        let mut out = lines.join("\n");
        out.push_str("\n\n");
        out
    }

    /// Parse a request from its text representation.
    ///
    /// Fields are read from their fixed line positions only; a missing
    /// required line or a non-integer field is a parse error.
    pub fn parse(raw: &str) -> Result<Self> {
        let lines: Vec<&str> = raw.lines().take_while(|l| !l.is_empty()).collect();

        let first = lines
            .first()
            .ok_or(RtspError::parse(ParseErrorKind::EmptyMessage))?;
        let parts: Vec<&str> = first.split_whitespace().collect();
        let method: Method = parts
            .first()
            .ok_or(RtspError::parse(ParseErrorKind::InvalidRequestLine))?
            .parse()?;

        let (target, version) = match (method, parts.as_slice()) {
            (Method::GetList, [_, version]) => ("", *version),
            (_, [_, target, version]) => (*target, *version),
            _ => return Err(RtspError::parse(ParseErrorKind::InvalidRequestLine)),
        };
        if version != PROTOCOL_VERSION {
            tracing::warn!(version, "peer sent unexpected protocol version");
        }

        let cseq = required(&lines, 1, "CSeq")?;
        let mut request = RtspRequest::new(method, target, parse_int(cseq, "CSeq")?);

        match method {
            Method::Setup => {
                let transport = required(&lines, 2, "Transport")?;
                let header = TransportHeader::parse(transport)
                    .ok_or(RtspError::parse(ParseErrorKind::InvalidField("Transport")))?;
                request.client_port = Some(header.client_port);
                if let Some(session) = optional(&lines, 3, "Session") {
                    request.session = Some(parse_int(session, "Session")?);
                }
            }
            Method::GetList => {}
            _ => {
                let session = required(&lines, 2, "Session")?;
                request.session = Some(parse_int(session, "Session")?);
                if method == Method::Play
                    && let Some(frame) = optional(&lines, 3, "RequestedFrame")
                {
                    request.requested_frame = Some(parse_int(frame, "RequestedFrame")?);
                }
            }
        }

        Ok(request)
    }
}

fn required<'a>(lines: &[&'a str], index: usize, name: &'static str) -> Result<&'a str> {
    let line = lines
        .get(index)
        .ok_or(RtspError::parse(ParseErrorKind::MissingLine(name)))?;
    field(line, name).ok_or(RtspError::parse(ParseErrorKind::InvalidField(name)))
}

fn optional<'a>(lines: &[&'a str], index: usize, name: &str) -> Option<&'a str> {
    lines.get(index).and_then(|line| field(line, name))
}

pub(crate) fn parse_int<T: FromStr>(value: &str, name: &'static str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RtspError::parse(ParseErrorKind::InvalidField(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_setup_request() {
        let raw = "SETUP movie.mjpeg RTSP/1.0\nCSeq: 1\nTransport: RTP/UDP; client_port= 25000\n\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::Setup);
        assert_eq!(req.target, "movie.mjpeg");
        assert_eq!(req.cseq, 1);
        assert_eq!(req.client_port, Some(25000));
        assert_eq!(req.session, None);
    }

    #[test]
    fn parse_play_with_seek() {
        let raw = "PLAY movie.mjpeg RTSP/1.0\r\ncSeq: 4\r\nSession: 123456\r\nRequestedFrame: 130\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::Play);
        assert_eq!(req.cseq, 4);
        assert_eq!(req.session, Some(123456));
        assert_eq!(req.requested_frame, Some(130));
    }

    #[test]
    fn parse_play_without_seek() {
        let raw = "PLAY movie.mjpeg RTSP/1.0\nCSeq: 2\nSession: 7\n\n";
        assert_eq!(RtspRequest::parse(raw).unwrap().requested_frame, None);
    }

    #[test]
    fn parse_get_list_has_no_target() {
        let req = RtspRequest::parse("GET_LIST RTSP/1.0\nCSeq: 9\n\n").unwrap();
        assert_eq!(req.method, Method::GetList);
        assert!(req.target.is_empty());
        assert_eq!(req.cseq, 9);
    }

    #[test]
    fn serialize_matches_wire_layout() {
        let setup = RtspRequest::new(Method::Setup, "movie.mjpeg", 1).with_client_port(25000);
        assert_eq!(
            setup.serialize(),
            "SETUP movie.mjpeg RTSP/1.0\nCSeq: 1\nTransport: RTP/UDP; client_port= 25000\n\n"
        );

        let play = RtspRequest::new(Method::Play, "movie.mjpeg", 3)
            .with_session(123456)
            .with_requested_frame(125);
        assert_eq!(
            play.serialize(),
            "PLAY movie.mjpeg RTSP/1.0\nCSeq: 3\nSession: 123456\nRequestedFrame: 125\n\n"
        );

        let list = RtspRequest::new(Method::GetList, "", 5);
        assert_eq!(list.serialize(), "GET_LIST RTSP/1.0\nCSeq: 5\n\n");
    }

    #[test]
    fn serialized_requests_parse_back() {
        let resetup = RtspRequest::new(Method::Setup, "other.mjpeg", 6)
            .with_client_port(4000)
            .with_session(42);
        assert_eq!(RtspRequest::parse(&resetup.serialize()).unwrap(), resetup);
    }

    #[test]
    fn parse_empty_request() {
        assert!(matches!(
            RtspRequest::parse(""),
            Err(RtspError::Parse {
                kind: ParseErrorKind::EmptyMessage
            })
        ));
    }

    #[test]
    fn parse_unknown_method() {
        assert!(matches!(
            RtspRequest::parse("OPTIONS * RTSP/1.0\nCSeq: 1\n\n"),
            Err(RtspError::Parse {
                kind: ParseErrorKind::UnknownMethod(_)
            })
        ));
    }

    #[test]
    fn parse_missing_session_line() {
        assert!(matches!(
            RtspRequest::parse("PAUSE movie.mjpeg RTSP/1.0\nCSeq: 3\n\n"),
            Err(RtspError::Parse {
                kind: ParseErrorKind::MissingLine("Session")
            })
        ));
    }

    #[test]
    fn parse_non_integer_cseq() {
        assert!(matches!(
            RtspRequest::parse("PAUSE movie.mjpeg RTSP/1.0\nCSeq: three\nSession: 1\n\n"),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidField("CSeq")
            })
        ));
    }

    #[test]
    fn parse_fields_are_positional() {
        // Session before CSeq is not accepted.
        assert!(RtspRequest::parse("PAUSE movie.mjpeg RTSP/1.0\nSession: 1\nCSeq: 3\n\n").is_err());
    }
}
