//! Error types for the streaming library.

use std::fmt;

/// Errors that can occur in the streaming library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Control protocol**: [`Parse`](Self::Parse) for malformed request or
///   reply text.
/// - **Data plane**: [`Rtp`](Self::Rtp) for datagrams that do not decode.
/// - **Replies**: [`MediaNotFound`](Self::MediaNotFound) (404),
///   [`NotServiceable`](Self::NotServiceable) (500),
///   [`UnexpectedStatus`](Self::UnexpectedStatus),
///   [`ReplyTimeout`](Self::ReplyTimeout).
/// - **Transport**: [`Io`](Self::Io), [`Disconnected`](Self::Disconnected).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
///
/// Stale replies (CSeq or session mismatch) and requests issued outside
/// their valid state are filtered, not reported, so they have no variant.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A control message could not be decoded.
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A data-plane datagram could not be decoded as an RTP packet.
    #[error("RTP decode error: {kind}")]
    Rtp { kind: RtpErrorKind },

    /// The named media does not exist or could not be opened (404).
    #[error("media not found: {0}")]
    MediaNotFound(String),

    /// The server could not service the request in its current state (500).
    #[error("{method} not serviceable in the current session state")]
    NotServiceable { method: String },

    /// The server answered with a status this client does not understand.
    #[error("unexpected reply status {code} {reason}")]
    UnexpectedStatus { code: u16, reason: String },

    /// No matching reply arrived within the configured timeout.
    #[error("no reply to {method} (CSeq {cseq})")]
    ReplyTimeout { method: String, cseq: u32 },

    /// The control connection was closed by the peer.
    #[error("control connection closed")]
    Disconnected,

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl RtspError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }

    pub(crate) fn rtp(kind: RtpErrorKind) -> Self {
        Self::Rtp { kind }
    }
}

/// Specific kind of control message parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no first line).
    EmptyMessage,
    /// First line of a request was not `METHOD target RTSP/1.0`.
    InvalidRequestLine,
    /// First line of a reply was not `RTSP/1.0 <code> <reason>`.
    InvalidStatusLine,
    /// The method token is not one this protocol knows.
    UnknownMethod(String),
    /// A line required at a fixed position was absent.
    MissingLine(&'static str),
    /// A line was present but did not carry the expected field.
    InvalidField(&'static str),
    /// The message head was not valid UTF-8.
    InvalidEncoding,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::UnknownMethod(method) => write!(f, "unknown method {method}"),
            Self::MissingLine(name) => write!(f, "missing {name} line"),
            Self::InvalidField(name) => write!(f, "invalid {name} field"),
            Self::InvalidEncoding => write!(f, "message is not valid UTF-8"),
        }
    }
}

/// Specific kind of RTP decode failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpErrorKind {
    /// Fewer bytes than the 12-byte fixed header.
    TooShort(usize),
    /// Version bits were not 2.
    BadVersion(u8),
    /// The extension header or its declared words run past the datagram.
    TruncatedExtension,
}

impl fmt::Display for RtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(len) => write!(f, "packet too short ({len} bytes)"),
            Self::BadVersion(v) => write!(f, "unsupported RTP version {v}"),
            Self::TruncatedExtension => write!(f, "truncated header extension"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
