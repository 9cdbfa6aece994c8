//! Client-side data plane: RTP receive loop, ordering filter and
//! throughput/loss statistics.

use std::net::UdpSocket;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

use super::SessionInfo;
use crate::error::{Result, RtspError};
use crate::media::rtp::RtpPacket;
use crate::transport::is_timeout;
use crate::transport::udp::MAX_DATAGRAM;

/// Presentation surface for accepted frames.
pub trait FrameSink: Send {
    /// A session was set up.
    fn on_session(&mut self, _info: &SessionInfo) {}

    /// One accepted frame, with the statistics as of this frame.
    fn on_frame(&mut self, frame: u32, payload: &[u8], stats: &ReceiverStats);

    /// The session ended; drop whatever is displayed.
    fn clear(&mut self) {}
}

/// Sink shared between the client and its receiver thread.
pub type SharedSink = Arc<Mutex<Box<dyn FrameSink>>>;

/// Accepts only frames newer than the last accepted one.
///
/// After [`reset_to`](Self::reset_to) the next accepted frame is the first
/// one at or after the floor, regardless of what was accepted before.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonotonicFilter {
    last: Option<u32>,
    floor: Option<u32>,
}

impl MonotonicFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `frame` should be delivered, and records it if so.
    pub fn accept(&mut self, frame: u32) -> bool {
        if let Some(floor) = self.floor {
            if frame < floor {
                return false;
            }
            self.floor = None;
            self.last = Some(frame);
            return true;
        }
        match self.last {
            Some(last) if frame <= last => false,
            _ => {
                self.last = Some(frame);
                true
            }
        }
    }

    /// Re-arm after a seek to `floor`.
    pub fn reset_to(&mut self, floor: u32) {
        self.last = None;
        self.floor = Some(floor);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Last accepted frame.
    pub fn last(&self) -> Option<u32> {
        self.last
    }
}

/// Frames lost given how many were expected and how many arrived.
pub fn loss(expected: u64, received: u64) -> u64 {
    expected.saturating_sub(received)
}

/// Loss as a percentage of `expected`.
pub fn loss_rate(expected: u64, received: u64) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    loss(expected, received) as f64 * 100.0 / expected as f64
}

/// Receive statistics for one PLAY.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReceiverStats {
    /// Datagram bytes received, accepted or not.
    pub bytes: u64,
    /// Frames accepted by the filter.
    pub frames: u64,
    pub first_frame: Option<u32>,
    pub highest_frame: Option<u32>,
    /// Server send counter from the most recent packet.
    pub last_counter: Option<u32>,
    /// Time since the receiver started.
    pub elapsed: Duration,
}

impl ReceiverStats {
    fn record(&mut self, frame: u32) {
        self.frames += 1;
        self.first_frame.get_or_insert(frame);
        self.highest_frame = Some(self.highest_frame.map_or(frame, |h| h.max(frame)));
    }

    /// Bytes per second since the receiver started.
    pub fn data_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / secs
    }

    /// Frames the server should have delivered, from the first accepted
    /// frame to the highest one seen.
    pub fn expected_frames(&self) -> u64 {
        match (self.first_frame, self.highest_frame) {
            (Some(first), Some(highest)) => u64::from(highest.saturating_sub(first)) + 1,
            _ => 0,
        }
    }

    /// Frames missing between the first accepted frame and the highest
    /// one, i.e. `highest - first + 1 - accepted`, not `highest - accepted`.
    /// Counting starts again at every PLAY, so a seek is never loss.
    pub fn lost_frames(&self) -> u64 {
        loss(self.expected_frames(), self.frames)
    }

    pub fn loss_rate(&self) -> f64 {
        loss_rate(self.expected_frames(), self.frames)
    }

    /// Loss rate formatted like `20.00%`.
    pub fn loss_rate_label(&self) -> String {
        format!("{:.2}%", self.loss_rate())
    }
}

/// What a stopped receiver hands back.
#[derive(Debug)]
pub struct ReceiverReport {
    pub filter: MonotonicFilter,
    pub stats: ReceiverStats,
    /// Hard socket failure that ended the loop early.
    pub error: Option<RtspError>,
}

/// Handle to a running receive thread.
pub struct FrameReceiver {
    stop: Sender<()>,
    handle: JoinHandle<ReceiverReport>,
}

impl FrameReceiver {
    /// Spawn the receive loop on `socket`, which must have a read timeout.
    pub fn start(socket: Arc<UdpSocket>, filter: MonotonicFilter, sink: SharedSink) -> Result<Self> {
        let (stop, stop_rx) = channel::bounded(1);
        let handle = thread::Builder::new()
            .name("rtp-receiver".to_string())
            .spawn(move || run(&socket, filter, &sink, &stop_rx))?;
        Ok(Self { stop, handle })
    }

    /// Signal the loop and wait for it. `None` if the thread panicked.
    pub fn stop(self) -> Option<ReceiverReport> {
        let _ = self.stop.try_send(());
        match self.handle.join() {
            Ok(report) => Some(report),
            Err(_) => {
                tracing::error!("receiver thread panicked");
                None
            }
        }
    }
}

fn run(
    socket: &UdpSocket,
    mut filter: MonotonicFilter,
    sink: &SharedSink,
    stop: &Receiver<()>,
) -> ReceiverReport {
    let started = Instant::now();
    let mut stats = ReceiverStats::default();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut error = None;

    loop {
        match stop.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => break,
        }

        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "RTP receive failed");
                error = Some(e.into());
                break;
            }
        };

        stats.bytes += n as u64;
        stats.elapsed = started.elapsed();

        let packet = match RtpPacket::decode(&buf[..n]) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(bytes = n, error = %e, "undecodable datagram dropped");
                continue;
            }
        };

        let frame = u32::from(packet.sequence);
        if !filter.accept(frame) {
            tracing::trace!(frame, last = ?filter.last(), "out-of-order frame dropped");
            continue;
        }

        stats.record(frame);
        stats.last_counter = packet.frame_counter().or(stats.last_counter);
        sink.lock().on_frame(frame, &packet.payload, &stats);
    }

    stats.elapsed = started.elapsed();
    tracing::debug!(
        frames = stats.frames,
        bytes = stats.bytes,
        lost = stats.lost_frames(),
        "receiver stopped"
    );
    ReceiverReport {
        filter,
        stats,
        error,
    }
}

/// Discard datagrams already queued on `socket`.
pub fn drain(socket: &UdpSocket) -> Result<usize> {
    socket.set_nonblocking(true)?;
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut dropped = 0;
    let result = loop {
        match socket.recv(&mut buf) {
            Ok(_) => dropped += 1,
            Err(e) if is_timeout(&e) => break Ok(dropped),
            Err(e) => break Err(e.into()),
        }
    };
    socket.set_nonblocking(false)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::{PAYLOAD_TYPE_JPEG, RtpStream};

    #[test]
    fn filter_accepts_only_new_maxima() {
        let mut filter = MonotonicFilter::new();
        let accepted: Vec<u32> = [0, 1, 1, 3, 2, 4, 4, 9, 5]
            .into_iter()
            .filter(|f| filter.accept(*f))
            .collect();
        assert_eq!(accepted, vec![0, 1, 3, 4, 9]);
        assert_eq!(filter.last(), Some(9));
    }

    #[test]
    fn filter_reset_to_allows_rewind() {
        let mut filter = MonotonicFilter::new();
        assert!(filter.accept(200));
        filter.reset_to(75);
        assert!(!filter.accept(74));
        assert!(filter.accept(76));
        assert!(!filter.accept(75));
        assert!(filter.accept(77));
    }

    #[test]
    fn loss_formula() {
        assert_eq!(loss(100, 80), 20);
        assert_eq!(loss(100, 120), 0);
        assert!((loss_rate(100, 80) - 20.0).abs() < f64::EPSILON);
        assert_eq!(loss_rate(0, 0), 0.0);
    }

    #[test]
    fn stats_labels_loss_rate() {
        let stats = ReceiverStats {
            frames: 80,
            first_frame: Some(0),
            highest_frame: Some(99),
            ..ReceiverStats::default()
        };
        assert_eq!(stats.expected_frames(), 100);
        assert_eq!(stats.lost_frames(), 20);
        assert_eq!(stats.loss_rate_label(), "20.00%");
    }

    #[test]
    fn loss_counts_from_first_accepted_frame() {
        // Playback resumed at frame 125 after a seek.
        let stats = ReceiverStats {
            frames: 10,
            first_frame: Some(125),
            highest_frame: Some(134),
            ..ReceiverStats::default()
        };
        assert_eq!(stats.expected_frames(), 10);
        assert_eq!(stats.lost_frames(), 0);
        assert_eq!(stats.loss_rate_label(), "0.00%");
    }

    #[test]
    fn data_rate_is_bytes_per_second() {
        let stats = ReceiverStats {
            bytes: 5_000,
            elapsed: Duration::from_secs(2),
            ..ReceiverStats::default()
        };
        assert_eq!(stats.data_rate(), 2_500.0);
        assert_eq!(ReceiverStats::default().data_rate(), 0.0);
    }

    struct Collect(Arc<Mutex<Vec<(u32, Vec<u8>)>>>);

    impl FrameSink for Collect {
        fn on_frame(&mut self, frame: u32, payload: &[u8], _stats: &ReceiverStats) {
            self.0.lock().push((frame, payload.to_vec()));
        }
    }

    #[test]
    fn receiver_filters_and_forwards() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let socket = Arc::new(socket);

        let frames = Arc::new(Mutex::new(Vec::new()));
        let collect: Box<dyn FrameSink> = Box::new(Collect(frames.clone()));
        let sink: SharedSink = Arc::new(Mutex::new(collect));
        let receiver = FrameReceiver::start(socket, MonotonicFilter::new(), sink).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let stream = RtpStream::new(PAYLOAD_TYPE_JPEG, 7, 25);
        for (counter, frame) in [0u32, 1, 1, 0, 2].into_iter().enumerate() {
            let packet = stream.packet(frame, counter as u32 + 1, vec![frame as u8]);
            sender.send_to(&packet.encode(), addr).unwrap();
        }
        sender.send_to(b"junk", addr).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while frames.lock().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        let report = receiver.stop().unwrap();
        assert!(report.error.is_none());
        assert_eq!(
            *frames.lock(),
            vec![(0, vec![0]), (1, vec![1]), (2, vec![2])]
        );
        assert_eq!(report.filter.last(), Some(2));
        assert_eq!(report.stats.frames, 3);
        assert_eq!(report.stats.last_counter, Some(5));
        assert_eq!(report.stats.lost_frames(), 0);
    }

    #[test]
    fn drain_empties_the_queue() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"a", addr).unwrap();
        sender.send_to(b"b", addr).unwrap();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(drain(&socket).unwrap(), 2);
        let mut buf = [0u8; 8];
        assert!(socket.recv(&mut buf).is_err());
    }
}
