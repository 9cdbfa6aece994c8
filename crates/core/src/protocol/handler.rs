use std::net::SocketAddr;
use std::sync::Arc;

use crate::media::MediaLibrary;
use crate::media::rtp::RtpStream;
use crate::protocol::request::{Method, RtspRequest};
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp::{self, Description};
use crate::server::ServerConfig;
use crate::session::{Session, SessionState, Transport, clamp_seek};
use crate::transport::UdpTransport;

/// Server session state machine for a single control connection.
///
/// Owns the connection's [`Session`]. Every request either produces a
/// reply or, when it is not valid in the current state, nothing at all
/// (see [`ServerConfig::reject_out_of_state`]).
pub struct MethodHandler {
    library: Arc<dyn MediaLibrary>,
    config: Arc<ServerConfig>,
    client_addr: SocketAddr,
    server_addr: SocketAddr,
    session: Session,
}

impl MethodHandler {
    pub fn new(
        library: Arc<dyn MediaLibrary>,
        config: Arc<ServerConfig>,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Self {
        MethodHandler {
            library,
            config,
            client_addr,
            server_addr,
            session: Session::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Handle one request. `None` means no reply is sent.
    pub fn handle(&mut self, request: &RtspRequest) -> Option<RtspResponse> {
        if let Some(id) = request.session
            && id != 0
            && id != self.session.id
        {
            tracing::debug!(
                session_id = self.session.id,
                request_session = id,
                method = %request.method,
                cseq = request.cseq,
                "dropping request for another session"
            );
            return None;
        }

        let state = self.session.state();
        match (request.method, state) {
            (Method::Setup, SessionState::Init | SessionState::Switching) => {
                Some(self.handle_setup(request))
            }
            (Method::Describe, _) => Some(self.handle_describe(request)),
            (Method::GetList, _) => Some(self.handle_get_list(request.cseq)),
            (Method::Play, SessionState::Ready) => Some(self.handle_play(request)),
            (Method::Pause, SessionState::Playing) => Some(self.handle_pause(request.cseq)),
            (Method::Teardown, s) if s != SessionState::Init => {
                Some(self.handle_teardown(request.cseq))
            }
            (Method::Switch, SessionState::Ready | SessionState::Playing) => {
                Some(self.handle_switch(request.cseq))
            }
            _ => self.out_of_state(request),
        }
    }

    /// Stop the pump and release the data socket when the connection ends.
    pub fn close(&mut self) {
        if self.session.id != 0 {
            tracing::info!(session_id = self.session.id, "session closed with connection");
        }
        self.session.reset();
    }

    fn out_of_state(&self, request: &RtspRequest) -> Option<RtspResponse> {
        tracing::debug!(
            session_id = self.session.id,
            method = %request.method,
            state = ?self.session.state(),
            cseq = request.cseq,
            "request not valid in current state"
        );
        if !self.config.reject_out_of_state {
            return None;
        }
        Some(self.reply(RtspResponse::not_serviceable(request.cseq)))
    }

    /// Attach the session id, if one exists.
    fn reply(&self, response: RtspResponse) -> RtspResponse {
        match self.session.id {
            0 => response,
            id => response.with_session(id),
        }
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq;
        let name = request.target.as_str();

        let source = match self.library.open(name) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(media = name, error = %e, "SETUP for unavailable media");
                let reply = self.reply(RtspResponse::not_found(cseq));
                self.session.reset();
                return reply;
            }
        };

        let udp = match UdpTransport::bind() {
            Ok(udp) => udp,
            Err(e) => {
                tracing::error!(error = %e, "failed to bind data-plane socket");
                let reply = self.reply(RtspResponse::not_serviceable(cseq));
                self.session.reset();
                return reply;
            }
        };

        let session_id = self.session.ensure_id();
        let port = request.client_port.unwrap_or(0);
        let target = SocketAddr::new(self.client_addr.ip(), port);
        let stream = RtpStream::with_random_ssrc(self.config.payload_type, source.fps());

        self.session
            .open(name, source, Transport::new(target, udp), stream);
        self.session.set_state(SessionState::Ready);

        tracing::info!(
            session_id,
            media = name,
            client_rtp = %target,
            frames = self.session.frame_count,
            fps = self.session.fps,
            "session set up"
        );

        RtspResponse::ok(cseq)
            .with_session(session_id)
            .add_header("Frames", self.session.frame_count)
            .add_header("Fps", self.session.fps)
    }

    fn handle_describe(&self, request: &RtspRequest) -> RtspResponse {
        let host = match &self.config.public_host {
            Some(host) => host.clone(),
            None => self.server_addr.ip().to_string(),
        };
        let body = sdp::generate_sdp(
            &Description {
                host: &host,
                control_port: self.server_addr.port(),
                payload_type: self.config.payload_type,
                session_id: self.session.id,
            },
            &self.config,
        );

        let base = self
            .session
            .media
            .as_deref()
            .unwrap_or(request.target.as_str());

        self.reply(RtspResponse::ok(request.cseq))
            .add_header("Content-Base", base)
            .add_header("Content-Type", "application/sdp")
            .with_body(body)
    }

    fn handle_get_list(&self, cseq: u32) -> RtspResponse {
        self.library
            .list()
            .into_iter()
            .fold(self.reply(RtspResponse::ok(cseq)), |response, info| {
                response.add_line(info.name)
            })
    }

    fn handle_play(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq;
        let seek = request
            .requested_frame
            .map(|frame| clamp_seek(frame, self.session.frame_count));

        // A pump that panicked took the source with it.
        if !self.session.has_source()
            && let Some(name) = self.session.media.clone()
        {
            match self.library.open(&name) {
                Ok(source) => self.session.restore_source(source),
                Err(e) => tracing::error!(media = %name, error = %e, "failed to reopen media"),
            }
        }

        if let Err(e) = self.session.start_pump(seek) {
            tracing::error!(session_id = self.session.id, error = %e, "failed to start pump");
            return self.reply(RtspResponse::not_serviceable(cseq));
        }
        self.session.set_state(SessionState::Playing);

        tracing::info!(session_id = self.session.id, seek = ?seek, "session playing");
        self.reply(RtspResponse::ok(cseq))
    }

    fn handle_pause(&mut self, cseq: u32) -> RtspResponse {
        self.session.stop_pump();
        self.session.set_state(SessionState::Ready);

        tracing::info!(
            session_id = self.session.id,
            packets_sent = self.session.packets_sent(),
            "session paused"
        );
        self.reply(RtspResponse::ok(cseq))
    }

    fn handle_teardown(&mut self, cseq: u32) -> RtspResponse {
        let session_id = self.session.id;
        self.session.reset();

        tracing::info!(session_id, "session torn down");
        RtspResponse::ok(cseq).with_session(session_id)
    }

    fn handle_switch(&mut self, cseq: u32) -> RtspResponse {
        let previous = self.session.media.take();
        self.session.release();
        self.session.set_state(SessionState::Switching);

        tracing::info!(session_id = self.session.id, previous = ?previous, "media released for switch");
        self.reply(RtspResponse::ok(cseq))
    }
}
