//! Client session state machine.
//!
//! [`Client`] mirrors the server's session states from the requester's
//! side:
//!
//! ```text
//! setup()     INIT    -> READY     (learn session id, frame count, fps)
//! play()      READY   -> PLAYING   (start the frame receiver)
//! pause()     PLAYING -> READY     (stop the frame receiver)
//! teardown()  not INIT -> INIT -> READY (reset, then SETUP again)
//! ```
//!
//! Calls made outside their valid state are no-ops that return `Ok(())`.
//! Every request carries a fresh CSeq; a reply is used only if it echoes
//! that CSeq and, once a session id is known, that session id. Anything
//! else on the control connection is logged and skipped.
//!
//! Seeking is PAUSE, then PLAY with a `RequestedFrame` line computed from
//! the last displayed frame.

pub mod control;
pub mod receiver;

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use control::ControlChannel;
pub use receiver::{
    FrameReceiver, FrameSink, MonotonicFilter, ReceiverReport, ReceiverStats, SharedSink,
};

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::protocol::request::parse_int;
use crate::protocol::{Method, RtspRequest, RtspResponse};
use crate::session::clamp_seek;
use crate::transport::udp::bind_receiver;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Control address of the server, `host:port`.
    pub server_addr: String,
    /// Local data-plane port advertised in SETUP. 0 picks an ephemeral port.
    pub rtp_port: u16,
    /// Media to set up first.
    pub media: String,
    /// How long to wait for a matching reply.
    pub reply_timeout: Duration,
    /// Seconds skipped by fast-forward and rewind.
    pub skip_secs: u32,
    /// Read timeout on the data-plane socket.
    pub poll: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8554".to_string(),
            rtp_port: 0,
            media: "movie.mjpeg".to_string(),
            reply_timeout: Duration::from_secs(2),
            skip_secs: 5,
            poll: Duration::from_millis(500),
        }
    }
}

/// Client-side session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Init,
    Ready,
    Playing,
}

/// What SETUP told us about the media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: u32,
    pub frame_count: u32,
    pub fps: u32,
}

impl SessionInfo {
    /// Total play time of the media.
    pub fn duration(&self) -> Duration {
        if self.fps == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(f64::from(self.frame_count) / f64::from(self.fps))
    }

    /// Duration as `MM:SS`.
    pub fn duration_label(&self) -> String {
        format_clock(self.duration().as_secs())
    }
}

/// Format seconds as `MM:SS`.
pub fn format_clock(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Whether `reply` answers the request sent with `cseq` in session
/// `session_id` (0 while no session is known).
pub fn reply_matches(reply: &RtspResponse, cseq: u32, session_id: u32) -> bool {
    reply.cseq == cseq && (session_id == 0 || reply.session == Some(session_id))
}

/// Frame to request when skipping `skip_secs` from `current`.
///
/// Never negative; the upper bound is left to the caller and the server.
pub fn seek_target(current: u32, fps: u32, skip_secs: u32, forward: bool) -> i64 {
    let delta = i64::from(fps) * i64::from(skip_secs);
    let current = i64::from(current);
    if forward {
        current + delta
    } else {
        (current - delta).max(0)
    }
}

/// Control-plane client with its data-plane receiver.
pub struct Client {
    config: ClientConfig,
    control: ControlChannel,
    sink: SharedSink,
    state: ClientState,
    cseq: u32,
    media: String,
    /// Kept across SWITCH; cleared by TEARDOWN.
    session_id: u32,
    info: Option<SessionInfo>,
    rtp_socket: Option<Arc<UdpSocket>>,
    receiver: Option<FrameReceiver>,
    filter: MonotonicFilter,
    last_stats: ReceiverStats,
}

impl Client {
    /// Open the control connection. No request is sent yet.
    pub fn connect(config: ClientConfig, sink: SharedSink) -> Result<Self> {
        let control = ControlChannel::connect(&config.server_addr)?;
        let media = config.media.clone();
        Ok(Self {
            config,
            control,
            sink,
            state: ClientState::Init,
            cseq: 0,
            media,
            session_id: 0,
            info: None,
            rtp_socket: None,
            receiver: None,
            filter: MonotonicFilter::new(),
            last_stats: ReceiverStats::default(),
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.info.as_ref()
    }

    /// CSeq of the most recent request.
    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn media(&self) -> &str {
        &self.media
    }

    /// Last frame accepted by the receiver, as of the last pause.
    pub fn current_frame(&self) -> Option<u32> {
        self.filter.last()
    }

    /// Statistics from the most recently stopped receiver.
    pub fn last_stats(&self) -> &ReceiverStats {
        &self.last_stats
    }

    /// Local data-plane port, once bound.
    pub fn rtp_port(&self) -> Option<u16> {
        self.rtp_socket
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
            .map(|addr| addr.port())
    }

    /// SETUP the current media. INIT only.
    pub fn setup(&mut self) -> Result<()> {
        if !self.guard(Method::Setup, self.state == ClientState::Init) {
            return Ok(());
        }

        let socket = match &self.rtp_socket {
            Some(socket) => socket.clone(),
            None => bind_receiver(self.config.rtp_port, self.config.poll)?,
        };
        let port = socket.local_addr()?.port();
        let session_id = self.session_id;

        let reply = match self.transact(Method::Setup, |request| {
            let request = request.with_client_port(port);
            match session_id {
                0 => request,
                id => request.with_session(id),
            }
        }) {
            Ok(reply) => reply,
            Err(e) => {
                // The server drops the session when SETUP fails.
                if matches!(
                    e,
                    RtspError::MediaNotFound(_) | RtspError::NotServiceable { .. }
                ) {
                    self.session_id = 0;
                }
                self.rtp_socket = None;
                return Err(e);
            }
        };

        let info = SessionInfo {
            session_id: reply
                .session
                .ok_or(RtspError::parse(ParseErrorKind::MissingLine("Session")))?,
            frame_count: parse_int(required_header(&reply, "Frames")?, "Frames")?,
            fps: parse_int(required_header(&reply, "Fps")?, "Fps")?,
        };

        self.session_id = info.session_id;
        self.info = Some(info);
        self.rtp_socket = Some(socket);
        self.filter.reset();
        self.state = ClientState::Ready;
        self.sink.lock().on_session(&info);

        tracing::info!(
            session_id = info.session_id,
            media = %self.media,
            frames = info.frame_count,
            fps = info.fps,
            duration = %info.duration_label(),
            rtp_port = port,
            "session ready"
        );
        Ok(())
    }

    /// DESCRIBE: the SDP text for the current media.
    pub fn describe(&mut self) -> Result<String> {
        let session_id = self.session_id;
        let reply = self.transact(Method::Describe, |r| r.with_session(session_id))?;
        Ok(reply.body.unwrap_or_default())
    }

    /// GET_LIST: names of the media the server can play.
    pub fn list(&mut self) -> Result<Vec<String>> {
        let reply = self.transact(Method::GetList, |r| r)?;
        Ok(reply.lines)
    }

    /// PLAY from the current position. READY only.
    pub fn play(&mut self) -> Result<()> {
        self.play_from(None)
    }

    /// PLAY, optionally seeking to `frame` first. READY only.
    pub fn play_from(&mut self, frame: Option<i64>) -> Result<()> {
        if !self.guard(Method::Play, self.state == ClientState::Ready) {
            return Ok(());
        }
        let Some(socket) = self.rtp_socket.clone() else {
            return Err(RtspError::NotServiceable {
                method: Method::Play.to_string(),
            });
        };

        if frame.is_some() {
            // Nothing sent before the pause may satisfy the re-armed filter.
            let dropped = receiver::drain(&socket)?;
            tracing::trace!(dropped, "stale datagrams drained before seek");
        }

        let session_id = self.session_id;
        self.transact(Method::Play, |request| {
            let request = request.with_session(session_id);
            match frame {
                Some(frame) => request.with_requested_frame(frame),
                None => request,
            }
        })?;

        if let Some(frame) = frame {
            let frame_count = self.info.map_or(0, |info| info.frame_count);
            self.filter.reset_to(clamp_seek(frame, frame_count));
        }

        self.receiver = Some(FrameReceiver::start(
            socket,
            self.filter,
            self.sink.clone(),
        )?);
        self.state = ClientState::Playing;

        tracing::info!(session_id, seek = ?frame, "playing");
        Ok(())
    }

    /// PAUSE. PLAYING only.
    pub fn pause(&mut self) -> Result<()> {
        if !self.guard(Method::Pause, self.state == ClientState::Playing) {
            return Ok(());
        }
        let session_id = self.session_id;
        self.transact(Method::Pause, |r| r.with_session(session_id))?;
        self.stop_receiver();
        self.state = ClientState::Ready;

        tracing::info!(session_id, frame = ?self.filter.last(), "paused");
        Ok(())
    }

    /// Skip forward by the configured number of seconds.
    pub fn fast_forward(&mut self) -> Result<()> {
        self.skip(true)
    }

    /// Skip back by the configured number of seconds.
    pub fn rewind(&mut self) -> Result<()> {
        self.skip(false)
    }

    fn skip(&mut self, forward: bool) -> Result<()> {
        if self.state == ClientState::Init {
            tracing::debug!(forward, "seek ignored without a session");
            return Ok(());
        }
        if self.state == ClientState::Playing {
            self.pause()?;
        }

        let fps = self.info.map_or(0, |info| info.fps);
        let current = self.filter.last().unwrap_or(0);
        let target = seek_target(current, fps, self.config.skip_secs, forward);

        tracing::debug!(current, target, forward, "seeking");
        self.play_from(Some(target))
    }

    /// SWITCH to `media`, then SETUP it under the same session id.
    /// READY or PLAYING only.
    pub fn switch_media(&mut self, media: &str) -> Result<()> {
        if !self.guard(Method::Switch, self.state != ClientState::Init) {
            return Ok(());
        }
        let session_id = self.session_id;
        self.transact(Method::Switch, |r| r.with_session(session_id))?;

        self.stop_receiver();
        self.sink.lock().clear();
        self.filter.reset();
        self.info = None;
        self.media = media.to_string();
        self.state = ClientState::Init;

        tracing::info!(session_id, media, "switching media");
        self.setup()
    }

    /// TEARDOWN, reset every session-scoped counter, then SETUP again so
    /// the next session is ready to play.
    pub fn teardown(&mut self) -> Result<()> {
        if self.state == ClientState::Init {
            tracing::debug!("teardown ignored without a session");
            return Ok(());
        }
        self.end_session()?;
        self.setup()
    }

    /// TEARDOWN without re-SETUP; stops every background task.
    pub fn close(mut self) -> Result<()> {
        if self.state == ClientState::Init {
            self.stop_receiver();
            return Ok(());
        }
        self.end_session()
    }

    fn end_session(&mut self) -> Result<()> {
        let session_id = self.session_id;
        let result = self
            .transact(Method::Teardown, |r| r.with_session(session_id))
            .map(|_| ());

        self.stop_receiver();
        self.rtp_socket = None;
        self.sink.lock().clear();
        self.filter.reset();
        self.cseq = 0;
        self.session_id = 0;
        self.info = None;
        self.state = ClientState::Init;

        tracing::info!(session_id, "session torn down");
        result
    }

    fn stop_receiver(&mut self) {
        let Some(receiver) = self.receiver.take() else {
            return;
        };
        match receiver.stop() {
            Some(report) => {
                if let Some(e) = &report.error {
                    tracing::warn!(error = %e, "receiver ended with an error");
                }
                tracing::info!(
                    frames = report.stats.frames,
                    lost = report.stats.lost_frames(),
                    loss_rate = %report.stats.loss_rate_label(),
                    data_rate = report.stats.data_rate(),
                    "receiver stopped"
                );
                self.filter = report.filter;
                self.last_stats = report.stats;
            }
            None => self.filter.reset(),
        }
    }

    fn guard(&self, method: Method, valid: bool) -> bool {
        if !valid {
            tracing::debug!(%method, state = ?self.state, "request not valid in current state");
        }
        valid
    }

    /// Send one request and wait for its reply.
    ///
    /// Replies with a stale CSeq or another session id are skipped. Non-200
    /// statuses become errors.
    fn transact(
        &mut self,
        method: Method,
        build: impl FnOnce(RtspRequest) -> RtspRequest,
    ) -> Result<RtspResponse> {
        self.cseq += 1;
        let cseq = self.cseq;
        let target = match method {
            Method::GetList => "",
            _ => self.media.as_str(),
        };
        let request = build(RtspRequest::new(method, target, cseq));
        self.control.send(&request)?;

        let deadline = Instant::now() + self.config.reply_timeout;
        let reply = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let reply = match self.control.recv_reply(remaining) {
                None => {
                    return Err(RtspError::ReplyTimeout {
                        method: method.to_string(),
                        cseq,
                    });
                }
                Some(Err(e @ RtspError::Parse { .. })) => {
                    tracing::warn!(error = %e, "malformed reply skipped");
                    continue;
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(reply)) => reply,
            };
            if reply_matches(&reply, cseq, self.session_id) {
                break reply;
            }
            tracing::debug!(
                expected_cseq = cseq,
                cseq = reply.cseq,
                session = ?reply.session,
                "stale reply discarded"
            );
        };

        match reply.status_code {
            200 => Ok(reply),
            404 => Err(RtspError::MediaNotFound(self.media.clone())),
            500 => Err(RtspError::NotServiceable {
                method: method.to_string(),
            }),
            code => Err(RtspError::UnexpectedStatus {
                code,
                reason: reply.status_text,
            }),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop_receiver();
    }
}

fn required_header<'a>(reply: &'a RtspResponse, name: &'static str) -> Result<&'a str> {
    reply
        .header(name)
        .ok_or(RtspError::parse(ParseErrorKind::MissingLine(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_label_is_minutes_and_seconds() {
        let info = SessionInfo {
            session_id: 1,
            frame_count: 250,
            fps: 25,
        };
        assert_eq!(info.duration(), Duration::from_secs(10));
        assert_eq!(info.duration_label(), "00:10");
        assert_eq!(format_clock(754), "12:34");

        let no_rate = SessionInfo { fps: 0, ..info };
        assert_eq!(no_rate.duration_label(), "00:00");
    }

    #[test]
    fn seek_target_skips_whole_seconds() {
        assert_eq!(seek_target(10, 25, 5, true), 135);
        assert_eq!(seek_target(200, 25, 5, false), 75);
        assert_eq!(seek_target(100, 25, 5, false), 0);
    }

    #[test]
    fn replies_are_fenced_by_cseq_and_session() {
        let reply = RtspResponse::ok(3).with_session(123456);
        assert!(reply_matches(&reply, 3, 123456));
        assert!(reply_matches(&reply, 3, 0));
        assert!(!reply_matches(&reply, 2, 123456));
        assert!(!reply_matches(&reply, 3, 654321));
        assert!(!reply_matches(&RtspResponse::ok(3), 3, 123456));
    }
}
