use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::error::{Result, RtspError};
use crate::media::MediaLibrary;
use crate::media::rtp::PAYLOAD_TYPE_JPEG;
use crate::transport::tcp;

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public host advertised in the SDP `o=` line.
    /// When `None`, the address the client connected to is used.
    pub public_host: Option<String>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
    /// RTP payload type stamped on every data packet.
    pub payload_type: u8,
    /// Reply 500 to requests that are not valid in the current session
    /// state instead of dropping them without a reply.
    pub reject_out_of_state: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Stream".to_string(),
            payload_type: PAYLOAD_TYPE_JPEG,
            reject_out_of_state: false,
        }
    }
}

/// Video-on-demand control server.
///
/// Accepts control connections on a background thread and gives each
/// connection its own thread and session. Media comes from the shared
/// [`MediaLibrary`].
pub struct Server {
    running: Arc<AtomicBool>,
    bind_addr: String,
    local_addr: Option<SocketAddr>,
    library: Arc<dyn MediaLibrary>,
    config: Arc<ServerConfig>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(bind_addr: &str, library: Arc<dyn MediaLibrary>) -> Self {
        Self::with_config(bind_addr, library, ServerConfig::default())
    }

    /// Create a server with custom protocol/SDP configuration.
    pub fn with_config(
        bind_addr: &str,
        library: Arc<dyn MediaLibrary>,
        config: ServerConfig,
    ) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            local_addr: None,
            library,
            config: Arc::new(config),
            accept_thread: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.running.store(true, Ordering::SeqCst);
        self.local_addr = Some(local_addr);

        let running = self.running.clone();
        let library = self.library.clone();
        let config = self.config.clone();

        tracing::info!(addr = %local_addr, "control server listening");

        let handle = thread::Builder::new()
            .name("rtsp-accept".to_string())
            .spawn(move || tcp::accept_loop(listener, library, config, running));
        match handle {
            Ok(handle) => {
                self.accept_thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.local_addr = None;
                Err(e.into())
            }
        }
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    ///
    /// Connection threads observe the flag within one control poll
    /// interval and release their sessions on the way out.
    pub fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(RtspError::NotStarted);
        }
        tracing::info!("server stopping");
        if let Some(handle) = self.accept_thread.take()
            && handle.join().is_err()
        {
            tracing::error!("accept thread panicked");
        }
        self.local_addr = None;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the server's protocol configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    pub fn library(&self) -> Arc<dyn MediaLibrary> {
        self.library.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}
