//! Local file frame source.
//!
//! `FileSource` plays frames in file order and reports `Exhausted` at the end.
//! Supported inputs:
//! - a still image (one frame)
//! - a directory of images (sorted by file name)
//! - a video file (feature: ingest-file-ffmpeg)
//! - `stub://name` (synthetic, `frame_limit` frames)
//!
//! With `play_realtime` reads are paced to `target_fps`, so a file plays at
//! roughly camera speed instead of as fast as detection allows.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::synthetic::SyntheticScene;
use super::{FrameSource, SourceStats, STUB_SCHEME};
#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::error::{LookoutError, Result};
use crate::frame::{Frame, ReadResult};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Configuration for a local file source.
#[derive(Clone, Debug, PartialEq)]
pub struct FileConfig {
    /// Local path, or `stub://name` for the synthetic generator.
    pub path: String,
    /// Pace reads to `target_fps`.
    pub play_realtime: bool,
    pub target_fps: u32,
    /// Number of frames a synthetic file yields before it is exhausted.
    pub frame_limit: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            play_realtime: true,
            target_fps: 30,
            frame_limit: 300,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    config: FileConfig,
    backend: FileBackend,
    started: bool,
    exhausted: bool,
    pacer: Pacer,
    frames_captured: u64,
}

enum FileBackend {
    Synthetic(SyntheticScene),
    Images(ImageSequence),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
    /// Released by `stop`.
    Closed,
}

impl FileSource {
    /// Open the file. Fails with `SourceUnavailable` when it does not exist
    /// or cannot be decoded by any compiled-in backend.
    pub fn new(config: FileConfig) -> Result<Self> {
        if config.path.trim().is_empty() {
            return Err(LookoutError::unavailable("file", "no path configured"));
        }
        let backend = if config.path.starts_with(STUB_SCHEME) {
            FileBackend::Synthetic(SyntheticScene::new(640, 480))
        } else {
            if config.path.contains("://") {
                return Err(LookoutError::unavailable(
                    &config.path,
                    "file ingestion only supports local paths",
                ));
            }
            open_local(&config.path)?
        };
        let pacer = Pacer::new(config.play_realtime, config.target_fps);
        Ok(Self {
            config,
            backend,
            started: false,
            exhausted: false,
            pacer,
            frames_captured: 0,
        })
    }

    fn next_from_backend(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(scene) => {
                if scene.frame_count() >= self.config.frame_limit {
                    Ok(None)
                } else {
                    Ok(Some(scene.next_frame()))
                }
            }
            FileBackend::Images(images) => images.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
            FileBackend::Closed => Ok(None),
        }
    }
}

fn open_local(path: &str) -> Result<FileBackend> {
    let p = Path::new(path);
    if !p.exists() {
        return Err(LookoutError::unavailable(path, "file does not exist"));
    }
    if p.is_dir() {
        return Ok(FileBackend::Images(ImageSequence::from_dir(p)?));
    }
    if is_image_path(p) {
        return Ok(FileBackend::Images(ImageSequence::new(vec![p.to_path_buf()])));
    }
    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        Ok(FileBackend::Ffmpeg(FfmpegFileSource::new(path)?))
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        Err(LookoutError::unavailable(
            path,
            "video files require the ingest-file-ffmpeg feature",
        ))
    }
}

impl FrameSource for FileSource {
    fn start(&mut self) -> Result<()> {
        if matches!(self.backend, FileBackend::Closed) {
            return Err(LookoutError::unavailable(&self.config.path, "file source closed"));
        }
        if !self.started {
            self.started = true;
            log::info!("FileSource: playing {}", self.describe());
        }
        Ok(())
    }

    fn read(&mut self) -> Result<ReadResult> {
        if !self.started {
            return Err(LookoutError::SourceRead("file source not started".into()));
        }
        if self.exhausted {
            return Ok(ReadResult::Exhausted);
        }
        self.pacer.wait();
        match self.next_from_backend()? {
            Some(frame) => {
                self.frames_captured += 1;
                Ok(ReadResult::Frame(frame))
            }
            None => {
                self.exhausted = true;
                log::info!(
                    "FileSource: {} exhausted after {} frames",
                    self.describe(),
                    self.frames_captured
                );
                Ok(ReadResult::Exhausted)
            }
        }
    }

    fn more(&self) -> bool {
        if self.exhausted {
            return false;
        }
        match &self.backend {
            FileBackend::Synthetic(scene) => scene.frame_count() < self.config.frame_limit,
            FileBackend::Images(images) => images.remaining() > 0,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(_) => true,
            FileBackend::Closed => false,
        }
    }

    fn stop(&mut self) {
        self.backend = FileBackend::Closed;
        if self.started {
            self.started = false;
            log::info!("FileSource: closed {}", self.describe());
        }
    }

    fn describe(&self) -> String {
        self.config.path.clone()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            frames_missed: 0,
        }
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Still images and image directories
// ----------------------------------------------------------------------------

struct ImageSequence {
    paths: Vec<PathBuf>,
    position: usize,
}

impl ImageSequence {
    fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths, position: 0 }
    }

    fn from_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| LookoutError::unavailable(dir.display().to_string(), e))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image_path(path))
            .collect();
        if paths.is_empty() {
            return Err(LookoutError::unavailable(
                dir.display().to_string(),
                "directory contains no images",
            ));
        }
        paths.sort();
        Ok(Self::new(paths))
    }

    fn remaining(&self) -> usize {
        self.paths.len() - self.position
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        let image = image::open(path).map_err(|e| {
            LookoutError::SourceRead(format!("decode {}: {}", path.display(), e))
        })?;
        Ok(Some(Frame::new(image.into_rgb8(), self.position as u64)))
    }
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

// ----------------------------------------------------------------------------
// Playback pacing
// ----------------------------------------------------------------------------

struct Pacer {
    interval: Option<Duration>,
    next_due: Option<Instant>,
}

impl Pacer {
    fn new(realtime: bool, target_fps: u32) -> Self {
        let interval = (realtime && target_fps > 0)
            .then(|| Duration::from_millis(1000 / u64::from(target_fps)));
        Self {
            interval,
            next_due: None,
        }
    }

    /// Sleep until the next frame is due. Blocks at most one frame interval.
    fn wait(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + interval);
    }
}
