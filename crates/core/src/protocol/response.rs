use super::request::parse_int;
use super::{PROTOCOL_VERSION, field};
use crate::error::{ParseErrorKind, Result, RtspError};

/// A control reply.
///
/// Serializes to:
///
/// ```text
/// RTSP/1.0 200 OK\n
/// CSeq: 1\n
/// Session: 123456\n
/// Frames: 250\n
/// Fps: 25\n
/// \n
/// ```
///
/// Line 0 is the status line, line 1 `CSeq`, and line 2 `Session` when the
/// reply belongs to a session. Everything after that is method specific:
/// `Name: value` headers (SETUP metadata, DESCRIBE content headers) or bare
/// lines (the GET_LIST media names). A body, when present, follows the
/// blank line and its size is announced by a `Content-Length` line.
///
/// Uses a builder pattern: chain [`with_session`](Self::with_session),
/// [`add_header`](Self::add_header), [`add_line`](Self::add_line) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub cseq: u32,
    pub session: Option<u32>,
    pub lines: Vec<String>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str, cseq: u32) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            cseq,
            session: None,
            lines: Vec::new(),
            body: None,
        }
    }

    /// 200 OK.
    pub fn ok(cseq: u32) -> Self {
        Self::new(200, "OK", cseq)
    }

    /// 404 Not Found: the named media does not exist.
    pub fn not_found(cseq: u32) -> Self {
        Self::new(404, "Not Found", cseq)
    }

    /// 500: the request cannot be serviced in the current session state.
    pub fn not_serviceable(cseq: u32) -> Self {
        Self::new(500, "Connection Error", cseq)
    }

    pub fn with_session(mut self, session: u32) -> Self {
        self.session = Some(session);
        self
    }

    pub fn add_header(self, name: &str, value: impl std::fmt::Display) -> Self {
        self.add_line(format!("{name}: {value}"))
    }

    pub fn add_line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// Look up a `Name: value` line after the fixed positions.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| field(line, name))
    }

    /// Serialize to wire format, including the terminating blank line.
    ///
    /// If a body is present, `Content-Length` is appended automatically.
    pub fn serialize(&self) -> String {
        let mut response = format!(
            "{} {} {}\nCSeq: {}\n",
            PROTOCOL_VERSION, self.status_code, self.status_text, self.cseq
        );

        if let Some(session) = self.session {
            response.push_str(&format!("Session: {session}\n"));
        }
        for line in &self.lines {
            response.push_str(line);
            response.push('\n');
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\n\n", body.len()));
            response.push_str(body);
        } else {
            response.push('\n');
        }
        response
    }

    /// Parse a complete reply (as framed by
    /// [`MessageReader`](crate::transport::tcp::MessageReader)).
    pub fn parse(raw: &str) -> Result<Self> {
        let (head, rest) = split_head(raw);
        let lines: Vec<&str> = head.lines().collect();

        let status_line = lines
            .first()
            .filter(|l| !l.trim().is_empty())
            .ok_or(RtspError::parse(ParseErrorKind::EmptyMessage))?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("RTSP/") {
            return Err(RtspError::parse(ParseErrorKind::InvalidStatusLine));
        }
        let status_code: u16 = parts
            .next()
            .and_then(|code| code.parse().ok())
            .ok_or(RtspError::parse(ParseErrorKind::InvalidStatusLine))?;
        let status_text = parts.next().unwrap_or_default().trim().to_string();

        let cseq = lines
            .get(1)
            .ok_or(RtspError::parse(ParseErrorKind::MissingLine("CSeq")))?;
        let cseq = field(cseq, "CSeq")
            .ok_or(RtspError::parse(ParseErrorKind::InvalidField("CSeq")))?;

        let mut response = RtspResponse::new(status_code, &status_text, parse_int(cseq, "CSeq")?);

        let mut extra = 2;
        if let Some(session) = lines.get(2).and_then(|l| field(l, "Session")) {
            response.session = Some(parse_int(session, "Session")?);
            extra = 3;
        }

        let mut content_length = None;
        for line in lines.iter().skip(extra) {
            if let Some(len) = field(line, "Content-Length") {
                content_length = Some(parse_int::<usize>(len, "Content-Length")?);
            } else {
                response.lines.push(line.to_string());
            }
        }

        if let Some(len) = content_length {
            let body = rest.get(..len).unwrap_or(rest);
            response.body = Some(body.to_string());
        }

        Ok(response)
    }
}

/// Split at the first blank line. Accepts `\n` and `\r\n` line endings.
fn split_head(raw: &str) -> (&str, &str) {
    ["\r\n\r\n", "\n\n"]
        .iter()
        .filter_map(|sep| raw.find(sep).map(|pos| (pos, sep.len())))
        .min()
        .map_or((raw, ""), |(pos, len)| (&raw[..pos], &raw[pos + len..]))
}
