use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{Result, RtspError};
use crate::protocol::{RtspRequest, RtspResponse};
use crate::transport::tcp::{CONTROL_POLL, MessageReader};

/// Client end of the control connection.
///
/// A background thread reads and parses replies as they arrive and queues
/// them; the reader is running before the first request is written.
pub struct ControlChannel {
    writer: TcpStream,
    replies: Receiver<Result<RtspResponse>>,
    stop: Sender<()>,
    reader: Option<JoinHandle<()>>,
}

impl ControlChannel {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(CONTROL_POLL))?;
        let reader_stream = stream.try_clone()?;

        let (tx, replies) = channel::unbounded();
        let (stop, stop_rx) = channel::bounded(1);
        let reader = thread::Builder::new()
            .name("rtsp-replies".to_string())
            .spawn(move || read_replies(MessageReader::new(reader_stream), &tx, &stop_rx))?;

        tracing::debug!(server = addr, "control connection open");
        Ok(Self {
            writer: stream,
            replies,
            stop,
            reader: Some(reader),
        })
    }

    /// Write one request.
    pub fn send(&mut self, request: &RtspRequest) -> Result<()> {
        tracing::debug!(method = %request.method, cseq = request.cseq, "sending request");
        self.writer.write_all(request.serialize().as_bytes())?;
        Ok(())
    }

    /// Next queued reply, waiting at most `timeout`. `None` on timeout.
    ///
    /// Unparseable replies are returned as errors so the caller can log and
    /// skip them.
    pub fn recv_reply(&self, timeout: Duration) -> Option<Result<RtspResponse>> {
        match self.replies.recv_timeout(timeout) {
            Ok(reply) => Some(reply),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(RtspError::Disconnected)),
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        let _ = self.stop.try_send(());
        // Unblocks a reader parked in read().
        let _ = self.writer.shutdown(Shutdown::Both);
        if let Some(handle) = self.reader.take()
            && handle.join().is_err()
        {
            tracing::error!("reply reader panicked");
        }
    }
}

fn read_replies(
    mut reader: MessageReader<TcpStream>,
    replies: &Sender<Result<RtspResponse>>,
    stop: &Receiver<()>,
) {
    loop {
        match stop.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => break,
        }

        let reply = match reader.read_message() {
            Ok(Some(text)) => RtspResponse::parse(&text),
            Ok(None) => continue,
            Err(e @ RtspError::Parse { .. }) => Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "control connection closed");
                let _ = replies.send(Err(e));
                break;
            }
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn undecodable_reply_does_not_close_the_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .write_all(b"RTSP/1.0 200 OK\nCSeq: \xff\n\nRTSP/1.0 200 OK\nCSeq: 1\n\n")
                .unwrap();
            stream
        });

        let channel = ControlChannel::connect(&addr).unwrap();
        let _stream = server.join().unwrap();

        let timeout = Duration::from_secs(2);
        assert!(matches!(
            channel.recv_reply(timeout),
            Some(Err(RtspError::Parse { .. }))
        ));
        let reply = channel.recv_reply(timeout).unwrap().unwrap();
        assert_eq!(reply.cseq, 1);
    }
}
