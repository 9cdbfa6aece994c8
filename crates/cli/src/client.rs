use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use rtsp::client::SharedSink;
use rtsp::{Client, ClientConfig, FrameSink, ReceiverStats, SessionInfo};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rtsp-client",
    about = "Video-on-demand RTSP client; frames are written to a cache file"
)]
struct Args {
    /// Server host
    #[arg(default_value = "127.0.0.1")]
    server: String,

    /// Server control port
    #[arg(long, short, default_value_t = 8554)]
    port: u16,

    /// Local RTP port (0 picks a free one)
    #[arg(long, default_value_t = 0)]
    rtp_port: u16,

    /// Media to set up
    #[arg(long, short, default_value = "movie.mjpeg")]
    media: String,

    /// Directory for the frame cache and description files
    #[arg(long, default_value = ".")]
    cache_dir: PathBuf,

    /// Seconds skipped by ff/rew
    #[arg(long, default_value_t = 5)]
    skip: u32,

    /// Seconds to wait for a reply
    #[arg(long, default_value_t = 2)]
    reply_timeout: u64,
}

/// Writes each accepted frame to `cache-<session>.jpg`.
struct CacheSink {
    dir: PathBuf,
    path: Option<PathBuf>,
    fps: u32,
    duration: String,
}

impl CacheSink {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            path: None,
            fps: 0,
            duration: String::new(),
        }
    }
}

impl FrameSink for CacheSink {
    fn on_session(&mut self, info: &SessionInfo) {
        self.path = Some(self.dir.join(format!("cache-{}.jpg", info.session_id)));
        self.fps = info.fps;
        self.duration = info.duration_label();
    }

    fn on_frame(&mut self, frame: u32, payload: &[u8], stats: &ReceiverStats) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = fs::write(path, payload) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write frame");
        }

        // Roughly once a second.
        if self.fps != 0 && frame % self.fps == 0 {
            let position = rtsp::client::format_clock(u64::from(frame / self.fps));
            tracing::info!(
                frame,
                position = %format!("{}/{}", position, self.duration),
                data_rate = %format!("{:.0} B/s", stats.data_rate()),
                lost = stats.lost_frames(),
                loss_rate = %stats.loss_rate_label(),
                "playing"
            );
        }
    }

    fn clear(&mut self) {
        if let Some(path) = self.path.take()
            && let Err(e) = fs::remove_file(&path)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove cache file");
        }
    }
}

const HELP: &str = "commands: play, pause, ff, rew, describe, list, switch <name>, stop, quit";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = ClientConfig {
        server_addr: format!("{}:{}", args.server, args.port),
        rtp_port: args.rtp_port,
        media: args.media,
        reply_timeout: Duration::from_secs(args.reply_timeout),
        skip_secs: args.skip,
        ..ClientConfig::default()
    };
    let cache: Box<dyn FrameSink> = Box::new(CacheSink::new(args.cache_dir.clone()));
    let sink: SharedSink = Arc::new(Mutex::new(cache));

    let mut client = match Client::connect(config, sink) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            return;
        }
    };

    if let Err(e) = client.setup() {
        eprintln!("SETUP failed: {}", e);
    } else if let Some(info) = client.session() {
        println!(
            "session {}: {} frames at {} fps ({})",
            info.session_id,
            info.frame_count,
            info.fps,
            info.duration_label()
        );
    }
    println!("{HELP}");

    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        };
        let mut words = line.split_whitespace();
        let result = match (words.next(), words.next()) {
            (None, _) => continue,
            (Some("play"), _) => client.play(),
            (Some("pause"), _) => client.pause(),
            (Some("ff"), _) => client.fast_forward(),
            (Some("rew"), _) => client.rewind(),
            (Some("stop"), _) => client.teardown(),
            (Some("switch"), Some(name)) => client.switch_media(name),
            (Some("describe"), _) => client.describe().and_then(|sdp| {
                let path = args.cache_dir.join("describe.txt");
                fs::write(&path, &sdp)?;
                print!("{sdp}");
                Ok(())
            }),
            (Some("list"), _) => client.list().map(|names| {
                for name in names {
                    println!("  {name}");
                }
            }),
            (Some("quit"), _) => break,
            _ => {
                println!("{HELP}");
                continue;
            }
        };
        if let Err(e) = result {
            eprintln!("{}", e);
        }
    }

    if let Err(e) = client.close() {
        tracing::warn!(error = %e, "teardown on exit failed");
    }
}
