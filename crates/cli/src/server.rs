use std::io;
use std::sync::Arc;

use clap::Parser;
use rtsp::media::DEFAULT_FPS;
use rtsp::{MediaDirectory, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rtsp-server",
    about = "Video-on-demand RTSP server for MJPEG files"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Directory holding the .mjpeg files to serve
    #[arg(long, short, default_value = ".")]
    media_dir: String,

    /// Frame rate to stream at
    #[arg(long, default_value_t = DEFAULT_FPS)]
    fps: u32,

    /// Host advertised in DESCRIBE replies
    #[arg(long)]
    public_host: Option<String>,

    /// Reply 500 to requests that are invalid in the current state
    #[arg(long)]
    reject_out_of_state: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let library = match MediaDirectory::open(&args.media_dir, args.fps) {
        Ok(library) => library,
        Err(e) => {
            eprintln!("Failed to open media directory {}: {}", args.media_dir, e);
            return;
        }
    };

    let config = ServerConfig {
        public_host: args.public_host,
        reject_out_of_state: args.reject_out_of_state,
        ..ServerConfig::default()
    };
    let mut server = Server::with_config(&args.bind, Arc::new(library), config);

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return;
    }

    for info in server.library().list() {
        println!("  {} ({} frames)", info.name, info.frame_count);
    }
    println!("RTSP server on {}, press Enter to stop", args.bind);
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        tracing::warn!(error = %e, "stdin read failed");
    }

    if let Err(e) = server.stop() {
        eprintln!("Failed to stop server: {}", e);
    }
}
