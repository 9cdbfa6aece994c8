use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Frame, FrameSource, MediaInfo, MediaLibrary};
use crate::error::{Result, RtspError};

/// Library of clips held in memory.
///
/// Clips are shared between sources, so opening the same name from many
/// connections does not copy frame data.
#[derive(Clone, Default)]
pub struct MemoryLibrary {
    clips: Arc<RwLock<BTreeMap<String, Clip>>>,
}

#[derive(Clone)]
struct Clip {
    frames: Arc<Vec<Vec<u8>>>,
    fps: u32,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a clip. Replaces any existing clip with the same name.
    pub fn insert(&self, name: &str, frames: Vec<Vec<u8>>, fps: u32) {
        tracing::debug!(name, frames = frames.len(), fps, "clip registered");
        self.clips.write().insert(
            name.to_string(),
            Clip {
                frames: Arc::new(frames),
                fps: fps.max(1),
            },
        );
    }
}

impl MediaLibrary for MemoryLibrary {
    fn list(&self) -> Vec<MediaInfo> {
        self.clips
            .read()
            .iter()
            .map(|(name, clip)| MediaInfo {
                name: name.clone(),
                frame_count: clip.frames.len() as u32,
            })
            .collect()
    }

    fn open(&self, name: &str) -> Result<Box<dyn FrameSource>> {
        let clip = self
            .clips
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RtspError::MediaNotFound(name.to_string()))?;
        Ok(Box::new(MemorySource { clip, position: 0 }))
    }
}

struct MemorySource {
    clip: Clip,
    position: u32,
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Option<Frame> {
        let index = self.position;
        self.frame_at(index)
    }

    fn frame_at(&mut self, index: u32) -> Option<Frame> {
        let data = self.clip.frames.get(index as usize)?.clone();
        self.position = index + 1;
        Some(Frame {
            number: index,
            data,
        })
    }

    fn frame_count(&self) -> u32 {
        self.clip.frames.len() as u32
    }

    fn fps(&self) -> u32 {
        self.clip.fps
    }
}
