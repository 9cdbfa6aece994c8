//! Server-side streaming pump.
//!
//! One pump runs per session while it is PLAYING. Each tick it waits up to
//! one frame interval on its stop channel, then fetches a frame (the
//! pending seek target once, otherwise the next sequential frame), wraps
//! it in an RTP packet and sends it as one datagram.
//!
//! The frame source moves into the pump thread and is handed back by
//! [`Pump::stop`], so a later PLAY resumes where this one stopped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::error::Result;
use crate::media::FrameSource;
use crate::media::rtp::RtpStream;
use crate::transport::UdpTransport;

/// Everything a pump needs besides the frame source.
pub struct PumpParams {
    pub udp: UdpTransport,
    pub target: SocketAddr,
    pub stream: RtpStream,
    /// Packets sent in this session. Survives pause/resume.
    pub counter: Arc<AtomicU32>,
    /// Frame to send first; cleared after one use.
    pub seek: Option<u32>,
}

/// Handle to a running pump thread.
pub struct Pump {
    stop: Sender<()>,
    handle: JoinHandle<Box<dyn FrameSource>>,
}

impl Pump {
    /// Spawn the pump thread.
    pub fn start(source: Box<dyn FrameSource>, params: PumpParams) -> Result<Self> {
        let (stop, stop_rx) = channel::bounded(1);
        let interval = Duration::from_secs_f64(1.0 / f64::from(source.fps().max(1)));

        tracing::debug!(
            target = %params.target,
            seek = ?params.seek,
            interval_ms = interval.as_millis() as u64,
            "starting pump"
        );

        let handle = thread::Builder::new()
            .name("rtp-pump".to_string())
            .spawn(move || run(source, params, stop_rx, interval))?;

        Ok(Self { stop, handle })
    }

    /// Signal the pump and wait for it to exit.
    ///
    /// Returns the frame source, or `None` if the pump thread panicked.
    pub fn stop(self) -> Option<Box<dyn FrameSource>> {
        // A full channel or an exited thread both mean the signal is moot.
        let _ = self.stop.try_send(());
        match self.handle.join() {
            Ok(source) => Some(source),
            Err(_) => {
                tracing::error!("pump thread panicked");
                None
            }
        }
    }
}

fn run(
    mut source: Box<dyn FrameSource>,
    mut params: PumpParams,
    stop: Receiver<()>,
    interval: Duration,
) -> Box<dyn FrameSource> {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let frame = match params.seek.take() {
            Some(index) => source.frame_at(index),
            None => source.next_frame(),
        };
        let Some(frame) = frame else {
            tracing::trace!("no frame available, skipping tick");
            continue;
        };

        let count = params.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let number = frame.number;
        let packet = params.stream.packet(number, count, frame.data).encode();

        match params.udp.send_to(&packet, params.target) {
            Ok(_) => tracing::trace!(frame = number, count, bytes = packet.len(), "frame sent"),
            Err(e) => tracing::warn!(frame = number, target = %params.target, error = %e, "RTP send failed"),
        }
    }

    tracing::debug!("pump stopped");
    source
}
