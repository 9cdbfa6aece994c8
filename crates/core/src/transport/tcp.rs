use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use super::is_timeout;
use crate::error::{ParseErrorKind, Result, RtspError};
use crate::media::MediaLibrary;
use crate::protocol::{MethodHandler, RtspRequest};
use crate::server::ServerConfig;

/// Read timeout on control sockets, so loops can observe shutdown.
pub const CONTROL_POLL: Duration = Duration::from_millis(500);

/// Largest body a control message may announce.
pub const MAX_BODY: usize = 64 * 1024;

/// Incremental reader for blank-line-terminated control messages.
///
/// Reads line by line until an empty line, then, if the head announced a
/// `Content-Length`, that many body bytes. Read timeouts return
/// `Ok(None)` and keep the partial message, so callers can poll a socket
/// with a read timeout without losing data.
///
/// A message whose head is not UTF-8 or whose `Content-Length` is invalid
/// or above [`MAX_BODY`] comes back as [`RtspError::Parse`]; the reader
/// stays usable for the next message.
pub struct MessageReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
    head: Vec<u8>,
    body: Vec<u8>,
    body_len: Option<usize>,
}

impl<R: Read> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            line: Vec::new(),
            head: Vec::new(),
            body: Vec::new(),
            body_len: None,
        }
    }

    /// Returns the next complete message, `Ok(None)` on a read timeout,
    /// or [`RtspError::Disconnected`] at end of stream.
    pub fn read_message(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(len) = self.body_len {
                if self.body.len() < len {
                    let mut chunk = [0u8; 4096];
                    let want = (len - self.body.len()).min(chunk.len());
                    match self.reader.read(&mut chunk[..want]) {
                        Ok(0) => return Err(RtspError::Disconnected),
                        Ok(n) => self.body.extend_from_slice(&chunk[..n]),
                        Err(e) if is_timeout(&e) => return Ok(None),
                        Err(e) => return Err(e.into()),
                    }
                    continue;
                }
                self.body_len = None;
                let head = std::mem::take(&mut self.head);
                let body = std::mem::take(&mut self.body);
                let mut message = decode_head(head)?;
                message.push_str(&String::from_utf8_lossy(&body));
                return Ok(Some(message));
            }

            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return Err(RtspError::Disconnected),
                Ok(_) => {}
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            if !self.line.ends_with(b"\n") {
                continue;
            }

            let line = std::mem::take(&mut self.line);
            let blank = line.iter().all(|b| matches!(b, b'\r' | b'\n'));
            if blank && self.head.is_empty() {
                continue;
            }
            self.head.extend_from_slice(&line);
            if !blank {
                continue;
            }

            let head = std::mem::take(&mut self.head);
            let text = decode_head(head)?;
            match content_length(&text)? {
                0 => return Ok(Some(text)),
                len => {
                    self.head = text.into_bytes();
                    self.body_len = Some(len);
                }
            }
        }
    }
}

fn decode_head(head: Vec<u8>) -> Result<String> {
    String::from_utf8(head).map_err(|_| RtspError::parse(ParseErrorKind::InvalidEncoding))
}

/// Declared body length; 0 when the head has no `Content-Length` line.
fn content_length(head: &str) -> Result<usize> {
    let Some(value) = head
        .lines()
        .find_map(|line| crate::protocol::field(line, "Content-Length"))
    else {
        return Ok(0);
    };
    match value.parse::<usize>() {
        Ok(len) if len <= MAX_BODY => Ok(len),
        _ => Err(RtspError::parse(ParseErrorKind::InvalidField(
            "Content-Length",
        ))),
    }
}

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(
    listener: TcpListener,
    library: Arc<dyn MediaLibrary>,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let library = library.clone();
                let config = config.clone();
                let running = running.clone();
                thread::spawn(move || {
                    Connection::handle(stream, library, config, running);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single control connection with its own session.
struct Connection {
    reader: MessageReader<TcpStream>,
    writer: TcpStream,
    handler: MethodHandler,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    pub fn handle(
        stream: TcpStream,
        library: Arc<dyn MediaLibrary>,
        config: Arc<ServerConfig>,
        running: Arc<AtomicBool>,
    ) {
        let (peer_addr, local_addr) = match (stream.peer_addr(), stream.local_addr()) {
            (Ok(peer), Ok(local)) => (peer, local),
            _ => return,
        };

        tracing::info!(%peer_addr, "client connected");

        if let Err(e) = stream.set_read_timeout(Some(CONTROL_POLL)) {
            tracing::warn!(%peer_addr, error = %e, "failed to set read timeout");
            return;
        }
        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };

        let mut conn = Connection {
            reader: MessageReader::new(reader_stream),
            writer: stream,
            handler: MethodHandler::new(library, config, peer_addr, local_addr),
            peer_addr,
        };

        let reason = conn.run(&running);
        conn.handler.close();

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// Request/reply loop. Returns the reason for exiting.
    fn run(&mut self, running: &AtomicBool) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let text = match self.reader.read_message() {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(RtspError::Disconnected) => return "connection closed by client",
                Err(e @ RtspError::Parse { .. }) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "undecodable message dropped");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(peer = %self.peer_addr, error = %e, "control read failed");
                    return "read error";
                }
            };

            let request = match RtspRequest::parse(&text) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                    continue;
                }
            };

            tracing::debug!(
                peer = %self.peer_addr,
                method = %request.method,
                target = %request.target,
                cseq = request.cseq,
                "request"
            );

            let Some(response) = self.handler.handle(&request) else {
                continue;
            };

            tracing::debug!(
                peer = %self.peer_addr,
                status = response.status_code,
                cseq = response.cseq,
                "response"
            );

            if self
                .writer
                .write_all(response.serialize().as_bytes())
                .is_err()
            {
                return "write error";
            }
        }

        "server shutting down"
    }
}
