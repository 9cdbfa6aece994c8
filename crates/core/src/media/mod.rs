//! Media sources and RTP packetization.
//!
//! The server never decodes media. It pulls encoded frames from a
//! [`FrameSource`] opened through a [`MediaLibrary`] and wraps each frame
//! in one RTP packet ([`rtp::RtpPacket`]).
//!
//! ## Frame numbering
//!
//! Frames are numbered from 0. [`FrameSource::next_frame`] yields the frame
//! at the current position and advances it; [`FrameSource::frame_at`]
//! yields the requested frame and repositions the source right after it,
//! so sequential delivery resumes from the seek target.
//!
//! ## Implementations
//!
//! | Library | Module | Backing |
//! |---------|--------|---------|
//! | [`MediaDirectory`] | [`mjpeg`] | `.mjpeg` files in a directory |
//! | [`MemoryLibrary`] | [`memory`] | frames held in memory |

pub mod memory;
pub mod mjpeg;
pub mod rtp;

pub use memory::MemoryLibrary;
pub use mjpeg::{MediaDirectory, MjpegFile};

use crate::error::Result;

/// Default frame rate for media without an intrinsic rate.
pub const DEFAULT_FPS: u32 = 25;

/// One encoded frame and its position in the media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub number: u32,
    pub data: Vec<u8>,
}

/// Sequential and random-access reader of encoded frames.
///
/// A source is owned by exactly one session; the streaming pump borrows it
/// by value for the duration of a PLAY and hands it back when stopped.
pub trait FrameSource: Send {
    /// Frame at the current position, advancing by one. `None` when no
    /// data is available (end of media or a read failure).
    fn next_frame(&mut self) -> Option<Frame>;

    /// Frame at `index`, leaving the source positioned at `index + 1`.
    fn frame_at(&mut self, index: u32) -> Option<Frame>;

    /// Total number of frames.
    fn frame_count(&self) -> u32;

    /// Playback rate in frames per second.
    fn fps(&self) -> u32;
}

/// A playable media entry as reported by [`MediaLibrary::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub name: String,
    pub frame_count: u32,
}

/// Enumerates playable media and opens frame sources by name.
///
/// Shared by every connection on a server, so implementations must be
/// safe to call concurrently.
pub trait MediaLibrary: Send + Sync {
    /// All playable media, sorted by name.
    fn list(&self) -> Vec<MediaInfo>;

    /// Open a fresh source positioned at frame 0.
    ///
    /// Returns [`RtspError::MediaNotFound`](crate::RtspError::MediaNotFound)
    /// when no media by that name can be opened.
    fn open(&self, name: &str) -> Result<Box<dyn FrameSource>>;
}
