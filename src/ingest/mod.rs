//! Frame sources.
//!
//! This module provides the sources the monitor can read from:
//! - Cameras: V4L2 devices by index or path (feature: ingest-v4l2)
//! - Files: still images or image directories (always), videos (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` sources for tests and demos
//!
//! Every source implements [`FrameSource`]. Opening a source that cannot be
//! used fails at construction with [`LookoutError::SourceUnavailable`]; the
//! caller decides whether to abort.
//!
//! Camera sources capture on a background thread and hand out only the most
//! recent frame. File sources hand out frames in order and report
//! [`ReadResult::Exhausted`] once the file ends.

pub mod camera;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub(crate) mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod v4l2;

use std::sync::{Arc, Mutex, MutexGuard};

pub use camera::{CameraConfig, CameraSource};
pub use file::{FileConfig, FileSource};

use crate::error::{LookoutError, Result};
use crate::frame::ReadResult;

/// Prefix selecting the synthetic generator instead of a real device or file.
pub const STUB_SCHEME: &str = "stub://";

/// A camera or file feeding the pipeline.
pub trait FrameSource: Send {
    /// Begin capture. Calling it again after a successful start is a no-op.
    fn start(&mut self) -> Result<()>;

    /// Next available frame. Never blocks waiting for a frame that may not come.
    fn read(&mut self) -> Result<ReadResult>;

    /// False once the source can produce no further frames.
    fn more(&self) -> bool {
        true
    }

    /// Release the device or file. Safe to call repeatedly or never.
    fn stop(&mut self);

    /// Human-readable name used in logs.
    fn describe(&self) -> String;

    fn stats(&self) -> SourceStats;
}

/// Counters reported by every source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_missed: u64,
}

/// Where frames come from.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceConfig {
    Camera(CameraConfig),
    File(FileConfig),
}

impl SourceConfig {
    /// Parse `camera:<index|path|stub://..>`, `file:<path>` or a bare path.
    ///
    /// A bare integer is treated as a camera index.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(LookoutError::Config("source must not be empty".into()));
        }
        if let Some(device) = spec.strip_prefix("camera:") {
            return Ok(Self::Camera(CameraConfig {
                device: device.trim().to_string(),
                ..CameraConfig::default()
            }));
        }
        if let Some(path) = spec.strip_prefix("file:") {
            return Ok(Self::File(FileConfig {
                path: path.trim().to_string(),
                ..FileConfig::default()
            }));
        }
        if spec.parse::<u32>().is_ok() {
            return Ok(Self::Camera(CameraConfig {
                device: spec.to_string(),
                ..CameraConfig::default()
            }));
        }
        Ok(Self::File(FileConfig {
            path: spec.to_string(),
            ..FileConfig::default()
        }))
    }

    pub fn describe(&self) -> String {
        match self {
            SourceConfig::Camera(cfg) => format!("camera:{}", cfg.device),
            SourceConfig::File(cfg) => format!("file:{}", cfg.path),
        }
    }
}

/// Open (but do not start) the configured source.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    match config {
        SourceConfig::Camera(cfg) => Ok(Box::new(CameraSource::new(cfg.clone())?)),
        SourceConfig::File(cfg) => Ok(Box::new(FileSource::new(cfg.clone())?)),
    }
}

/// Source shared between stream connections.
pub type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

pub(crate) fn lock_source(source: &SharedSource) -> Result<MutexGuard<'_, Box<dyn FrameSource>>> {
    source
        .lock()
        .map_err(|_| LookoutError::Poisoned("frame source"))
}

/// Owns the process-lifetime source and stops it when dropped.
///
/// Holding the guard on the daemon's stack releases the camera or file on
/// every exit path, including errors that unwind out of `main`.
pub struct SourceGuard {
    source: SharedSource,
}

impl SourceGuard {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
        }
    }

    pub fn shared(&self) -> SharedSource {
        self.source.clone()
    }

    pub fn start(&self) -> Result<()> {
        lock_source(&self.source)?.start()
    }

    pub fn stats(&self) -> Result<SourceStats> {
        Ok(lock_source(&self.source)?.stats())
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        // A poisoned lock still holds a source that needs releasing.
        let mut guard = match self.source.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        log::info!("releasing frame source {}", guard.describe());
        guard.stop();
    }
}
