//! Capture -> detect -> annotate -> log.
//!
//! `Monitor` holds the process-lifetime pieces (source, detector, log, start
//! time). Every stream connection gets its own `Pipeline` over the same
//! monitor; one `step` is one full iteration.

use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::annotate::{Annotator, DEFAULT_JPEG_QUALITY};
use crate::detect::{lock_detector, Prediction, SharedDetector, DEFAULT_CONFIDENCE};
use crate::error::{LookoutError, Result};
use crate::frame::{Frame, ReadResult, DEFAULT_TARGET_HEIGHT, DEFAULT_TARGET_WIDTH};
use crate::ingest::{lock_source, SharedSource};
use crate::observation::{Observation, ObservationLog};

/// When frames are scaled to the published size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizePolicy {
    /// Resize first; the detector always sees the published size.
    #[default]
    BeforeDetection,
    /// Detect on the native frame, then resize and rescale the boxes.
    AfterDetection,
}

impl std::str::FromStr for ResizePolicy {
    type Err = LookoutError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "before_detection" | "before" => Ok(Self::BeforeDetection),
            "after_detection" | "after" => Ok(Self::AfterDetection),
            other => Err(LookoutError::Config(format!("unknown resize policy '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub target_width: u32,
    pub target_height: u32,
    pub confidence: f32,
    pub resize_policy: ResizePolicy,
    pub jpeg_quality: u8,
    /// Pause after an empty read before polling the source again.
    pub idle_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_width: DEFAULT_TARGET_WIDTH,
            target_height: DEFAULT_TARGET_HEIGHT,
            confidence: DEFAULT_CONFIDENCE,
            resize_policy: ResizePolicy::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            idle_backoff: Duration::from_millis(10),
        }
    }
}

// ----------------------------------------------------------------------------
// Monitor: shared process state
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct Monitor {
    source: SharedSource,
    detector: SharedDetector,
    log: Arc<ObservationLog>,
    config: PipelineConfig,
    started_at: Instant,
}

impl Monitor {
    pub fn new(
        source: SharedSource,
        detector: SharedDetector,
        log: Arc<ObservationLog>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            detector,
            log,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn log(&self) -> &Arc<ObservationLog> {
        &self.log
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Time since the monitor was created. Observation timestamps count from here.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Fresh pipeline for one consumer.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.clone())
    }
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

/// Output of one processed frame.
#[derive(Clone, Debug)]
pub struct Annotated {
    pub jpeg: Vec<u8>,
    pub observation: Observation,
    /// False when the log already held this observation.
    pub inserted: bool,
}

/// Outcome of one `Pipeline::step`.
#[derive(Debug)]
pub enum Step {
    Published(Annotated),
    /// The source had no frame this cycle.
    Idle,
    /// A frame was read but dropped (encode failure).
    Skipped(LookoutError),
    Exhausted,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_read: u64,
    pub frames_published: u64,
    pub frames_skipped: u64,
}

pub struct Pipeline {
    monitor: Monitor,
    annotator: Annotator,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(monitor: Monitor) -> Self {
        let annotator = Annotator::new(monitor.config.jpeg_quality);
        Self {
            monitor,
            annotator,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn idle_backoff(&self) -> Duration {
        self.monitor.config.idle_backoff
    }

    /// Read one frame and process it.
    ///
    /// Detector and source failures are returned as errors; an encode failure
    /// only skips this frame.
    pub fn step(&mut self) -> Result<Step> {
        let read = lock_source(&self.monitor.source)?.read()?;
        let frame = match read {
            ReadResult::Frame(frame) => frame,
            ReadResult::Empty => {
                log::debug!("no new frame from source");
                return Ok(Step::Idle);
            }
            ReadResult::Exhausted => return Ok(Step::Exhausted),
        };
        self.stats.frames_read += 1;
        match self.process(frame) {
            Ok(annotated) => {
                self.stats.frames_published += 1;
                Ok(Step::Published(annotated))
            }
            Err(err) if err.is_frame_local() => {
                self.stats.frames_skipped += 1;
                log::warn!("skipping frame: {}", err);
                Ok(Step::Skipped(err))
            }
            Err(err) => Err(err),
        }
    }

    /// Process a frame with the current elapsed time.
    pub fn process(&mut self, frame: Frame) -> Result<Annotated> {
        let elapsed = self.monitor.elapsed();
        self.process_at(frame, elapsed)
    }

    /// Resize, detect, draw, encode, then log the observation.
    ///
    /// Nothing is logged when encoding fails.
    pub fn process_at(&mut self, mut frame: Frame, elapsed: Duration) -> Result<Annotated> {
        let cfg = &self.monitor.config;
        let target = (cfg.target_width, cfg.target_height);

        let (mut image, predictions) = match cfg.resize_policy {
            ResizePolicy::BeforeDetection => {
                frame.resize_to(target.0, target.1);
                let predictions = self.detect(&frame)?;
                (frame.into_image(), predictions)
            }
            ResizePolicy::AfterDetection => {
                let native = (frame.width(), frame.height());
                let predictions = self
                    .detect(&frame)?
                    .into_iter()
                    .map(|p| Prediction {
                        bbox: p.bbox.scale(native, target),
                        ..p
                    })
                    .collect();
                frame.resize_to(target.0, target.1);
                (frame.into_image(), predictions)
            }
        };

        {
            let detector = lock_detector(&self.monitor.detector)?;
            self.annotator.draw(&mut image, &predictions, detector.palette());
        }
        let jpeg = self.annotator.encode(&image)?;

        let observation = Observation::from_predictions(elapsed, &predictions);
        let inserted = self.monitor.log.append(observation.clone())?;
        if inserted {
            log::debug!(
                "observation t={} labels=[{}]",
                observation.timestamp,
                observation.labels
            );
        }
        Ok(Annotated {
            jpeg,
            observation,
            inserted,
        })
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Prediction>> {
        let mut detector = lock_detector(&self.monitor.detector)?;
        detector.detect(frame, self.monitor.config.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{self, ColorKeyBackend, Detector};
    use crate::ingest::{FileConfig, FileSource, FrameSource, SourceGuard};
    use crate::testing::{gray_frame, FixedDetector, ScriptedSource};

    fn monitor_with(source: Box<dyn FrameSource>, detector: Box<dyn Detector>) -> Monitor {
        let guard = SourceGuard::new(source);
        Monitor::new(
            guard.shared(),
            detect::share(detector),
            Arc::new(ObservationLog::new()),
            PipelineConfig::default(),
        )
    }

    #[test]
    fn process_builds_observation_and_jpeg() -> Result<()> {
        let monitor = monitor_with(
            Box::new(ScriptedSource::new(vec![])),
            Box::new(FixedDetector::new(vec!["person", "dog"])),
        );
        let mut pipeline = monitor.pipeline();

        let out = pipeline.process_at(gray_frame(1), Duration::from_millis(3_400))?;
        assert_eq!(out.observation, Observation::new("3", "person, dog"));
        assert!(out.inserted);
        assert_eq!(&out.jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(monitor.log().snapshot()?, vec![out.observation]);
        Ok(())
    }

    #[test]
    fn resize_before_detection_feeds_target_size() -> Result<()> {
        let detector = FixedDetector::new(vec![]);
        let seen = detector.seen.clone();
        let monitor = monitor_with(Box::new(ScriptedSource::new(vec![])), Box::new(detector));
        monitor.pipeline().process_at(gray_frame(1), Duration::ZERO)?;
        assert_eq!(seen.lock().unwrap().as_slice(), &[(800, 300)]);
        Ok(())
    }

    #[test]
    fn resize_after_detection_feeds_native_size() -> Result<()> {
        let detector = FixedDetector::new(vec!["person"]);
        let seen = detector.seen.clone();
        let guard = SourceGuard::new(Box::new(ScriptedSource::new(vec![])));
        let monitor = Monitor::new(
            guard.shared(),
            detect::share(Box::new(detector)),
            Arc::new(ObservationLog::new()),
            PipelineConfig {
                resize_policy: ResizePolicy::AfterDetection,
                ..PipelineConfig::default()
            },
        );
        let out = monitor.pipeline().process_at(gray_frame(1), Duration::ZERO)?;
        assert_eq!(seen.lock().unwrap().as_slice(), &[(320, 240)]);
        let decoded = image::load_from_memory(&out.jpeg).expect("decode jpeg");
        assert_eq!((decoded.width(), decoded.height()), (800, 300));
        Ok(())
    }

    #[test]
    fn absent_frames_log_nothing() -> Result<()> {
        let monitor = monitor_with(
            Box::new(ScriptedSource::new(vec![
                ReadResult::Empty,
                ReadResult::Frame(gray_frame(1)),
                ReadResult::Empty,
            ])),
            Box::new(FixedDetector::new(vec!["person"])),
        );
        let mut pipeline = monitor.pipeline();

        assert!(matches!(pipeline.step()?, Step::Idle));
        assert!(matches!(pipeline.step()?, Step::Published(_)));
        assert!(matches!(pipeline.step()?, Step::Idle));
        assert!(matches!(pipeline.step()?, Step::Exhausted));

        assert_eq!(pipeline.stats().frames_read, 1);
        assert!(monitor.log().len()? as u64 <= pipeline.stats().frames_read);
        Ok(())
    }

    #[test]
    fn encode_failure_skips_the_frame_without_logging() -> Result<()> {
        let guard = SourceGuard::new(Box::new(ScriptedSource::new(vec![
            ReadResult::Frame(gray_frame(1)),
            ReadResult::Frame(gray_frame(2)),
        ])));
        let monitor = Monitor::new(
            guard.shared(),
            detect::share(Box::new(FixedDetector::new(vec!["person"]))),
            Arc::new(ObservationLog::new()),
            PipelineConfig {
                target_width: 0,
                target_height: 0,
                ..PipelineConfig::default()
            },
        );
        let mut pipeline = monitor.pipeline();

        assert!(matches!(pipeline.step()?, Step::Skipped(LookoutError::Encode(_))));
        assert!(matches!(pipeline.step()?, Step::Skipped(LookoutError::Encode(_))));
        assert!(matches!(pipeline.step()?, Step::Exhausted));

        let stats = pipeline.stats();
        assert_eq!(stats.frames_read, 2);
        assert_eq!(stats.frames_skipped, 2);
        assert_eq!(stats.frames_published, 0);
        assert!(monitor.log().is_empty()?);
        Ok(())
    }

    #[test]
    fn three_frames_in_one_second_collapse_to_one_row() -> Result<()> {
        let monitor = monitor_with(
            Box::new(ScriptedSource::new(vec![])),
            Box::new(FixedDetector::new(vec!["person"])),
        );
        let mut pipeline = monitor.pipeline();
        for (seq, ms) in [(1, 2_600), (2, 2_800), (3, 3_200)] {
            pipeline.process_at(gray_frame(seq), Duration::from_millis(ms))?;
        }
        assert_eq!(monitor.log().snapshot()?, vec![Observation::new("3", "person")]);
        Ok(())
    }

    #[test]
    fn synthetic_file_through_color_key_detector() -> Result<()> {
        let source = FileSource::new(FileConfig {
            path: "stub://clip".into(),
            play_realtime: false,
            frame_limit: 3,
            ..FileConfig::default()
        })?;
        let guard = SourceGuard::new(Box::new(source));
        guard.start()?;
        let monitor = Monitor::new(
            guard.shared(),
            detect::share(Box::new(ColorKeyBackend::new())),
            Arc::new(ObservationLog::new()),
            PipelineConfig::default(),
        );
        let mut pipeline = monitor.pipeline();
        let mut published = 0;
        loop {
            match pipeline.step()? {
                Step::Published(out) => {
                    assert_eq!(out.observation.labels, "person");
                    published += 1;
                }
                Step::Exhausted => break,
                other => panic!("unexpected step {other:?}"),
            }
        }
        assert_eq!(published, 3);
        Ok(())
    }

    #[test]
    fn resize_policy_parses() {
        assert_eq!(
            "after-detection".parse::<ResizePolicy>().unwrap(),
            ResizePolicy::AfterDetection
        );
        assert_eq!("before".parse::<ResizePolicy>().unwrap(), ResizePolicy::BeforeDetection);
        assert!("sideways".parse::<ResizePolicy>().is_err());
    }
}
