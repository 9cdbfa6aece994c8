//! Server-side session state.
//!
//! A session is the per-connection state object created by SETUP and
//! cleared by TEARDOWN. It tracks:
//!
//! - A server-assigned session id (random, 6 digits), echoed in every
//!   reply and used by the client to fence stale replies.
//! - The playback state.
//! - The opened media: its frame source, frame count and frame rate.
//! - The data-plane transport and, while PLAYING, the streaming pump.
//!
//! ## Session lifecycle
//!
//! ```text
//! SETUP          INIT|SWITCHING -> READY
//! PLAY           READY          -> PLAYING
//! PAUSE          PLAYING        -> READY
//! SWITCH         READY|PLAYING  -> SWITCHING
//! TEARDOWN       not INIT       -> INIT
//! TCP disconnect any            -> (released)
//! ```
//!
//! The session is owned by the connection's
//! [`MethodHandler`](crate::protocol::MethodHandler). The pump only sees
//! what it is handed at start: the frame source (returned on stop), a
//! clone of the socket, and the shared packet counter.

pub mod pump;
pub mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;

use crate::error::{Result, RtspError};
use crate::media::FrameSource;
use crate::media::rtp::RtpStream;
pub use pump::{Pump, PumpParams};
pub use transport::Transport;

/// Range session ids are drawn from.
pub const SESSION_ID_RANGE: std::ops::RangeInclusive<u32> = 100_000..=999_999;

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No media opened.
    Init,
    /// Media opened, pump idle.
    Ready,
    /// Pump running.
    Playing,
    /// Media released by SWITCH; waiting for a SETUP naming the new media.
    Switching,
}

/// Per-connection session.
pub struct Session {
    /// Session id; 0 while no session exists.
    pub id: u32,
    state: SessionState,
    /// Name of the opened media.
    pub media: Option<String>,
    pub frame_count: u32,
    pub fps: u32,
    source: Option<Box<dyn FrameSource>>,
    transport: Option<Transport>,
    stream: Option<RtpStream>,
    pump: Option<Pump>,
    counter: Arc<AtomicU32>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            id: 0,
            state: SessionState::Init,
            media: None,
            frame_count: 0,
            fps: 0,
            source: None,
            transport: None,
            stream: None,
            pump: None,
            counter: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Transition to a new state.
    pub fn set_state(&mut self, state: SessionState) {
        tracing::debug!(session_id = self.id, old_state = ?self.state, new_state = ?state, "state transition");
        self.state = state;
    }

    /// Assign a fresh random id unless one is already held (re-SETUP after
    /// SWITCH keeps the id the client has learned).
    pub fn ensure_id(&mut self) -> u32 {
        if self.id == 0 {
            self.id = rand::rng().random_range(SESSION_ID_RANGE);
        }
        self.id
    }

    /// Install freshly opened media and its transport.
    pub fn open(
        &mut self,
        media: &str,
        source: Box<dyn FrameSource>,
        transport: Transport,
        stream: RtpStream,
    ) {
        self.media = Some(media.to_string());
        self.frame_count = source.frame_count();
        self.fps = source.fps();
        self.source = Some(source);
        self.transport = Some(transport);
        self.stream = Some(stream);
        self.counter.store(0, Ordering::Relaxed);
    }

    /// Packets sent since SETUP.
    pub fn packets_sent(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.pump.is_some()
    }

    /// Replace the frame source, e.g. after a pump panicked with it.
    pub fn restore_source(&mut self, source: Box<dyn FrameSource>) {
        self.source = Some(source);
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Start the pump with an optional seek target. Requires open media.
    pub fn start_pump(&mut self, seek: Option<u32>) -> Result<()> {
        let not_ready = || RtspError::NotServiceable {
            method: "PLAY".to_string(),
        };
        let (Some(transport), Some(stream)) = (&self.transport, &self.stream) else {
            return Err(not_ready());
        };
        let Some(source) = self.source.take() else {
            return Err(not_ready());
        };

        let params = PumpParams {
            udp: transport.udp.clone(),
            target: transport.client_addr,
            stream: stream.clone(),
            counter: self.counter.clone(),
            seek,
        };
        self.pump = Some(Pump::start(source, params)?);
        Ok(())
    }

    /// Stop the pump, if running, and take the frame source back.
    pub fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            self.source = pump.stop();
        }
    }

    /// Stop the pump, then close the socket and drop the media.
    ///
    /// The id is kept; callers decide whether the session itself ends.
    pub fn release(&mut self) {
        self.stop_pump();
        if self.transport.take().is_some() {
            tracing::debug!(session_id = self.id, "data-plane socket closed");
        }
        self.source = None;
        self.stream = None;
        self.media = None;
        self.frame_count = 0;
        self.fps = 0;
    }

    /// Release everything and return to INIT with no id.
    pub fn reset(&mut self) {
        self.release();
        self.id = 0;
        self.counter.store(0, Ordering::Relaxed);
        self.set_state(SessionState::Init);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Clamp a requested seek frame into `[0, frame_count - 1]`.
pub fn clamp_seek(requested: i64, frame_count: u32) -> u32 {
    let last = i64::from(frame_count.saturating_sub(1));
    requested.clamp(0, last) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_seek_bounds() {
        assert_eq!(clamp_seek(500, 250), 249);
        assert_eq!(clamp_seek(250, 250), 249);
        assert_eq!(clamp_seek(-3, 250), 0);
        assert_eq!(clamp_seek(125, 250), 125);
        assert_eq!(clamp_seek(10, 0), 0);
    }

    #[test]
    fn ids_are_six_digits_and_stable() {
        let mut session = Session::new();
        let id = session.ensure_id();
        assert!(SESSION_ID_RANGE.contains(&id));
        assert_eq!(session.ensure_id(), id);
    }

    #[test]
    fn reset_clears_session_scope() {
        let mut session = Session::new();
        session.ensure_id();
        session.set_state(SessionState::Ready);
        session.reset();
        assert_eq!(session.id, 0);
        assert_eq!(session.state(), SessionState::Init);
        assert_eq!(session.packets_sent(), 0);
        assert!(!session.is_playing());
    }

    #[test]
    fn start_pump_without_media_fails() {
        let mut session = Session::new();
        assert!(session.start_pump(None).is_err());
    }
}
