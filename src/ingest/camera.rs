//! Live camera source.
//!
//! `CameraSource` captures on a dedicated thread and keeps only the most
//! recent frame. `read` takes that frame if one arrived since the previous
//! read and reports `Empty` otherwise, so a slow consumer skips frames
//! instead of falling behind.
//!
//! Devices are selected by index (`0` -> `/dev/video0`), by path, or with a
//! `stub://` name for the synthetic generator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::synthetic::SyntheticScene;
use super::{FrameSource, SourceStats, STUB_SCHEME};
use crate::error::{LookoutError, Result};
use crate::frame::{Frame, ReadResult};

const START_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a camera source.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraConfig {
    /// Device index (`"0"`), device path (`"/dev/video2"`) or `stub://name`.
    pub device: String,
    /// Preferred capture width.
    pub width: u32,
    /// Preferred capture height.
    pub height: u32,
    /// Target frame rate. The capture thread never runs faster than this.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "0".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

impl CameraConfig {
    pub fn is_synthetic(&self) -> bool {
        self.device.starts_with(STUB_SCHEME)
    }

    /// Device node for an index or path.
    pub fn device_path(&self) -> String {
        match self.device.parse::<u32>() {
            Ok(index) => format!("/dev/video{index}"),
            Err(_) => self.device.clone(),
        }
    }

    pub(crate) fn frame_interval(&self) -> Duration {
        if self.target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(1000 / u64::from(self.target_fps))
        }
    }
}

// ----------------------------------------------------------------------------
// Latest-frame slot shared with the capture thread
// ----------------------------------------------------------------------------

#[derive(Default)]
struct LatestFrame {
    frame: Option<Frame>,
    error: Option<String>,
    captured: u64,
}

/// Handle the capture thread publishes into.
#[derive(Clone)]
pub(crate) struct FrameSink {
    latest: Arc<Mutex<LatestFrame>>,
    stop: Arc<AtomicBool>,
}

impl FrameSink {
    fn new() -> Self {
        Self {
            latest: Arc::new(Mutex::new(LatestFrame::default())),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the held frame. An unread frame is dropped.
    pub(crate) fn publish(&self, frame: Frame) {
        if let Ok(mut latest) = self.latest.lock() {
            latest.frame = Some(frame);
            latest.captured += 1;
        }
    }

    /// Record a fatal capture error. Subsequent reads fail with it.
    #[cfg(feature = "ingest-v4l2")]
    pub(crate) fn fail(&self, message: String) {
        log::error!("camera capture stopped: {}", message);
        if let Ok(mut latest) = self.latest.lock() {
            latest.error = Some(message);
        }
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// CameraSource
// ----------------------------------------------------------------------------

/// Live camera frame source.
pub struct CameraSource {
    config: CameraConfig,
    sink: FrameSink,
    capture: Option<JoinHandle<()>>,
    frames_missed: u64,
}

impl CameraSource {
    /// Open the camera. Fails with `SourceUnavailable` when the device cannot be used.
    pub fn new(config: CameraConfig) -> Result<Self> {
        if !config.is_synthetic() {
            #[cfg(feature = "ingest-v4l2")]
            super::v4l2::probe(&config)?;
            #[cfg(not(feature = "ingest-v4l2"))]
            return Err(LookoutError::unavailable(
                config.device_path(),
                "camera capture requires the ingest-v4l2 feature",
            ));
        }
        Ok(Self {
            config,
            sink: FrameSink::new(),
            capture: None,
            frames_missed: 0,
        })
    }

    fn spawn_capture(&self) -> Result<JoinHandle<()>> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let sink = self.sink.clone();
        let config = self.config.clone();
        let join = std::thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || {
                if config.is_synthetic() {
                    let _ = ready_tx.send(Ok(()));
                    run_synthetic(&config, &sink);
                } else {
                    run_device(&config, &sink, ready_tx);
                }
            })
            .map_err(|e| LookoutError::unavailable(self.config.device_path(), e))?;

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => Ok(join),
            Ok(Err(err)) => {
                let _ = join.join();
                Err(err)
            }
            Err(_) => {
                self.sink.stop.store(true, Ordering::SeqCst);
                Err(LookoutError::unavailable(
                    self.config.device_path(),
                    "camera did not start in time",
                ))
            }
        }
    }
}

impl FrameSource for CameraSource {
    fn start(&mut self) -> Result<()> {
        if self.capture.is_some() {
            return Ok(());
        }
        self.sink.stop.store(false, Ordering::SeqCst);
        let join = self.spawn_capture()?;
        self.capture = Some(join);
        log::info!(
            "CameraSource: started {} ({}x{} @ {} fps)",
            self.describe(),
            self.config.width,
            self.config.height,
            self.config.target_fps
        );
        Ok(())
    }

    fn read(&mut self) -> Result<ReadResult> {
        if self.capture.is_none() {
            return Err(LookoutError::SourceRead("camera not started".into()));
        }
        let mut latest = self
            .sink
            .latest
            .lock()
            .map_err(|_| LookoutError::Poisoned("camera frame slot"))?;
        if let Some(err) = &latest.error {
            return Err(LookoutError::SourceRead(err.clone()));
        }
        match latest.frame.take() {
            Some(frame) => Ok(ReadResult::Frame(frame)),
            None => {
                self.frames_missed += 1;
                Ok(ReadResult::Empty)
            }
        }
    }

    fn stop(&mut self) {
        self.sink.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.capture.take() {
            if join.join().is_err() {
                log::warn!("camera capture thread panicked");
            }
            log::info!("CameraSource: stopped {}", self.describe());
        }
    }

    fn describe(&self) -> String {
        if self.config.is_synthetic() {
            format!("{} (synthetic)", self.config.device)
        } else {
            self.config.device_path()
        }
    }

    fn stats(&self) -> SourceStats {
        let frames_captured = self
            .sink
            .latest
            .lock()
            .map(|latest| latest.captured)
            .unwrap_or_default();
        SourceStats {
            frames_captured,
            frames_missed: self.frames_missed,
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_synthetic(config: &CameraConfig, sink: &FrameSink) {
    let mut scene = SyntheticScene::new(config.width, config.height);
    let interval = config.frame_interval().max(Duration::from_millis(1));
    while !sink.should_stop() {
        sink.publish(scene.next_frame());
        std::thread::sleep(interval);
    }
}

#[cfg(feature = "ingest-v4l2")]
fn run_device(config: &CameraConfig, sink: &FrameSink, ready: mpsc::SyncSender<Result<()>>) {
    super::v4l2::run_capture(config, sink, ready);
}

#[cfg(not(feature = "ingest-v4l2"))]
fn run_device(config: &CameraConfig, _sink: &FrameSink, ready: mpsc::SyncSender<Result<()>>) {
    let _ = ready.send(Err(LookoutError::unavailable(
        config.device_path(),
        "camera capture requires the ingest-v4l2 feature",
    )));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://front".to_string(),
            width: 64,
            height: 48,
            target_fps: 100,
        }
    }

    fn wait_for_frame(source: &mut CameraSource) -> Frame {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let ReadResult::Frame(frame) = source.read().unwrap() {
                return frame;
            }
            assert!(Instant::now() < deadline, "no frame captured");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn device_index_maps_to_node() {
        let cfg = CameraConfig {
            device: "3".into(),
            ..CameraConfig::default()
        };
        assert_eq!(cfg.device_path(), "/dev/video3");
    }

    #[test]
    fn synthetic_camera_produces_frames() {
        let mut source = CameraSource::new(stub_config()).unwrap();
        source.start().unwrap();
        source.start().unwrap();

        let frame = wait_for_frame(&mut source);
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 48);
        assert!(source.more());
        assert!(source.stats().frames_captured >= 1);

        source.stop();
        source.stop();
    }

    #[cfg(feature = "ingest-v4l2")]
    #[test]
    fn capture_failure_surfaces_on_read() {
        let mut source = CameraSource::new(stub_config()).unwrap();
        source.start().unwrap();
        source.sink.fail("device unplugged".to_string());

        match source.read() {
            Err(LookoutError::SourceRead(message)) => assert_eq!(message, "device unplugged"),
            other => panic!("expected read failure, got {other:?}"),
        }
        source.stop();
    }

    #[test]
    fn read_before_start_fails() {
        let mut source = CameraSource::new(stub_config()).unwrap();
        assert!(source.read().is_err());
    }

    #[test]
    fn latest_frame_is_taken_once() {
        let mut source = CameraSource::new(CameraConfig {
            target_fps: 1,
            ..stub_config()
        })
        .unwrap();
        source.start().unwrap();
        let first = wait_for_frame(&mut source);
        assert_eq!(first.sequence, 1);
        // The next frame is a second away; the slot is empty until then.
        assert!(matches!(source.read().unwrap(), ReadResult::Empty));
        assert!(source.stats().frames_missed >= 1);
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn real_device_requires_feature() {
        let err = CameraSource::new(CameraConfig::default())
            .err()
            .expect("device should be unavailable");
        assert!(matches!(err, LookoutError::SourceUnavailable { .. }));
    }
}
