pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{Client, ClientConfig, ClientState, FrameSink, ReceiverStats, SessionInfo};
pub use error::{Result, RtspError};
pub use media::{FrameSource, MediaDirectory, MediaLibrary, MemoryLibrary};
pub use server::{Server, ServerConfig};
