//! MJPEG file media.
//!
//! The container is the simple length-prefixed format used by classic
//! RTSP/RTP lab servers: each JPEG frame is preceded by its byte length
//! written as exactly 5 ASCII decimal digits.
//!
//! ```text
//! 01234<1234 bytes of JPEG>00987<987 bytes of JPEG>...
//! ```
//!
//! Files are read and indexed once on open, which makes seeking O(1).

use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{DEFAULT_FPS, Frame, FrameSource, MediaInfo, MediaLibrary};
use crate::error::{Result, RtspError};

const LENGTH_PREFIX: usize = 5;

/// File extensions recognised by [`MediaDirectory`].
pub const MJPEG_EXTENSIONS: &[&str] = &["mjpeg", "mjpg"];

/// An indexed MJPEG file.
pub struct MjpegFile {
    data: Vec<u8>,
    frames: Vec<Range<usize>>,
    fps: u32,
    position: u32,
}

impl MjpegFile {
    pub fn open(path: &Path, fps: u32) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(Self::from_bytes(data, fps))
    }

    /// Index an in-memory MJPEG stream.
    ///
    /// A trailing partial frame (bad prefix or short body) ends the index;
    /// everything before it stays playable.
    pub fn from_bytes(data: Vec<u8>, fps: u32) -> Self {
        let frames = index_frames(&data);
        Self {
            data,
            frames,
            fps: fps.max(1),
            position: 0,
        }
    }
}

fn index_frames(data: &[u8]) -> Vec<Range<usize>> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while offset + LENGTH_PREFIX <= data.len() {
        let len = std::str::from_utf8(&data[offset..offset + LENGTH_PREFIX])
            .ok()
            .and_then(|digits| digits.parse::<usize>().ok());
        let Some(len) = len else {
            tracing::warn!(offset, "invalid MJPEG length prefix, truncating index");
            break;
        };

        let start = offset + LENGTH_PREFIX;
        let end = start + len;
        if end > data.len() {
            tracing::warn!(offset, len, "MJPEG frame runs past end of file, truncating index");
            break;
        }
        frames.push(start..end);
        offset = end;
    }

    frames
}

impl FrameSource for MjpegFile {
    fn next_frame(&mut self) -> Option<Frame> {
        let index = self.position;
        self.frame_at(index)
    }

    fn frame_at(&mut self, index: u32) -> Option<Frame> {
        let range = self.frames.get(index as usize)?.clone();
        self.position = index + 1;
        Some(Frame {
            number: index,
            data: self.data[range].to_vec(),
        })
    }

    fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }

    fn fps(&self) -> u32 {
        self.fps
    }
}

/// Directory of MJPEG files.
///
/// The catalog (name → frame count) is computed on construction and on
/// [`rescan`](Self::rescan), so listing is cheap. Clones share the catalog.
#[derive(Clone)]
pub struct MediaDirectory {
    root: PathBuf,
    fps: u32,
    catalog: Arc<RwLock<BTreeMap<String, u32>>>,
}

impl MediaDirectory {
    /// Scan `root` for MJPEG files played back at `fps`.
    pub fn open(root: impl Into<PathBuf>, fps: u32) -> Result<Self> {
        let directory = Self {
            root: root.into(),
            fps: if fps == 0 { DEFAULT_FPS } else { fps },
            catalog: Arc::new(RwLock::new(BTreeMap::new())),
        };
        directory.rescan()?;
        Ok(directory)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Re-read the directory and recount frames. Returns the number of
    /// playable files found.
    pub fn rescan(&self) -> Result<usize> {
        let mut catalog = BTreeMap::new();

        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !is_mjpeg(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match MjpegFile::open(&path, self.fps) {
                Ok(file) => {
                    catalog.insert(name.to_string(), file.frame_count());
                }
                Err(e) => tracing::warn!(name, error = %e, "skipping unreadable media"),
            }
        }

        let found = catalog.len();
        tracing::info!(root = %self.root.display(), files = found, "media directory scanned");
        *self.catalog.write() = catalog;
        Ok(found)
    }
}

fn is_mjpeg(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                MJPEG_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
}

impl MediaLibrary for MediaDirectory {
    fn list(&self) -> Vec<MediaInfo> {
        self.catalog
            .read()
            .iter()
            .map(|(name, frames)| MediaInfo {
                name: name.clone(),
                frame_count: *frames,
            })
            .collect()
    }

    fn open(&self, name: &str) -> Result<Box<dyn FrameSource>> {
        // Only names from the catalog, so a request cannot walk out of root.
        if !self.catalog.read().contains_key(name) {
            return Err(RtspError::MediaNotFound(name.to_string()));
        }
        match MjpegFile::open(&self.root.join(name), self.fps) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) => {
                tracing::warn!(name, error = %e, "failed to open media");
                Err(RtspError::MediaNotFound(name.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frames: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for frame in frames {
            out.extend_from_slice(format!("{:05}", frame.len()).as_bytes());
            out.extend_from_slice(frame.as_bytes());
        }
        out
    }

    #[test]
    fn indexes_frames() {
        let mut file = MjpegFile::from_bytes(encode(&["abc", "de", "f"]), 25);
        assert_eq!(file.frame_count(), 3);
        assert_eq!(file.next_frame().unwrap().data, b"abc");
        assert_eq!(file.frame_at(2).unwrap().data, b"f");
        assert!(file.next_frame().is_none());
        assert_eq!(file.frame_at(1).unwrap().number, 1);
    }

    #[test]
    fn truncated_tail_is_dropped() {
        let mut data = encode(&["abc"]);
        data.extend_from_slice(b"00010short");
        let file = MjpegFile::from_bytes(data, 25);
        assert_eq!(file.frame_count(), 1);
    }

    #[test]
    fn garbage_prefix_yields_empty_index() {
        let file = MjpegFile::from_bytes(b"hello world".to_vec(), 25);
        assert_eq!(file.frame_count(), 0);
    }

    #[test]
    fn directory_lists_and_opens() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("movie.Mjpeg"), encode(&["a", "b"])).unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let library = MediaDirectory::open(dir.path(), 0).unwrap();
        assert_eq!(
            library.list(),
            vec![MediaInfo {
                name: "movie.Mjpeg".to_string(),
                frame_count: 2
            }]
        );

        let source = library.open("movie.Mjpeg").unwrap();
        assert_eq!(source.fps(), DEFAULT_FPS);
        assert!(matches!(
            library.open("notes.txt"),
            Err(RtspError::MediaNotFound(_))
        ));
        assert!(matches!(
            library.open("../movie.Mjpeg"),
            Err(RtspError::MediaNotFound(_))
        ));
    }

    #[test]
    fn rescan_picks_up_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let library = MediaDirectory::open(dir.path(), 25).unwrap();
        assert!(library.list().is_empty());

        fs::write(dir.path().join("late.mjpeg"), encode(&["x"])).unwrap();
        assert_eq!(library.rescan().unwrap(), 1);
        assert_eq!(library.list()[0].name, "late.mjpeg");
    }
}
