use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotate::DEFAULT_JPEG_QUALITY;
use crate::dashboard::{DashboardView, DEFAULT_PAGE_SIZE, DEFAULT_POLL_INTERVAL};
use crate::detect::{DetectorSettings, DEFAULT_CONFIDENCE};
use crate::frame::{DEFAULT_TARGET_HEIGHT, DEFAULT_TARGET_WIDTH};
use crate::ingest::{CameraConfig, FileConfig, SourceConfig};
use crate::pipeline::{PipelineConfig, ResizePolicy};
use crate::server::{ServerConfig, DEFAULT_ADDR};

pub const CONFIG_ENV: &str = "LOOKOUT_CONFIG";

const DEFAULT_SOURCE: &str = "camera:0";
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_IDLE_BACKOFF_MS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct LookoutConfigFile {
    http: Option<HttpConfigFile>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    dashboard: Option<DashboardConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    addr: Option<String>,
    events_enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    spec: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    play_realtime: Option<bool>,
    frame_limit: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    engine: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    target_width: Option<u32>,
    target_height: Option<u32>,
    resize_policy: Option<ResizePolicy>,
    jpeg_quality: Option<u8>,
    idle_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DashboardConfigFile {
    poll_interval_ms: Option<u64>,
    page_size: Option<usize>,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct LookoutConfig {
    pub http_addr: String,
    pub events_enabled: bool,
    pub source: SourceSettings,
    pub detector: DetectorChoice,
    pub pipeline: PipelineConfig,
    pub dashboard: DashboardView,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    /// `camera:<index>`, `file:<path>` or a bare path.
    pub spec: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub play_realtime: bool,
    pub frame_limit: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorChoice {
    pub engine: String,
    pub settings: DetectorSettings,
}

impl Default for LookoutConfig {
    fn default() -> Self {
        // An empty file section resolves every field to its default.
        Self::from_file(LookoutConfigFile::default())
    }
}

impl LookoutConfig {
    /// Read the file named by `LOOKOUT_CONFIG` (if set), apply environment
    /// overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LookoutConfigFile) -> Self {
        let http = file.http.unwrap_or_default();
        let source = file.source.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let pipeline = file.pipeline.unwrap_or_default();
        let dashboard = file.dashboard.unwrap_or_default();

        let camera_defaults = CameraConfig::default();
        let file_defaults = FileConfig::default();
        Self {
            http_addr: http.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            events_enabled: http.events_enabled.unwrap_or(true),
            source: SourceSettings {
                spec: source.spec.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
                width: source.width.unwrap_or(camera_defaults.width),
                height: source.height.unwrap_or(camera_defaults.height),
                target_fps: source.target_fps.unwrap_or(camera_defaults.target_fps),
                play_realtime: source.play_realtime.unwrap_or(file_defaults.play_realtime),
                frame_limit: source.frame_limit.unwrap_or(file_defaults.frame_limit),
            },
            detector: DetectorChoice {
                engine: detector
                    .engine
                    .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
                settings: DetectorSettings {
                    model_path: detector.model_path,
                    labels_path: detector.labels_path,
                    input_width: detector.input_width.unwrap_or(0),
                    input_height: detector.input_height.unwrap_or(0),
                },
            },
            pipeline: PipelineConfig {
                target_width: pipeline.target_width.unwrap_or(DEFAULT_TARGET_WIDTH),
                target_height: pipeline.target_height.unwrap_or(DEFAULT_TARGET_HEIGHT),
                confidence: detector.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                resize_policy: pipeline.resize_policy.unwrap_or_default(),
                jpeg_quality: pipeline.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                idle_backoff: Duration::from_millis(
                    pipeline.idle_backoff_ms.unwrap_or(DEFAULT_IDLE_BACKOFF_MS),
                ),
            },
            dashboard: DashboardView {
                poll_interval: dashboard
                    .poll_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
                page_size: dashboard.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("LOOKOUT_HTTP_ADDR") {
            self.http_addr = addr;
        }
        if let Some(spec) = non_empty_env("LOOKOUT_SOURCE") {
            self.source.spec = spec;
        }
        if let Some(engine) = non_empty_env("LOOKOUT_DETECTOR") {
            self.detector.engine = engine;
        }
        if let Some(path) = non_empty_env("LOOKOUT_MODEL_PATH") {
            self.detector.settings.model_path = Some(PathBuf::from(path));
        }
        if let Some(confidence) = non_empty_env("LOOKOUT_CONFIDENCE") {
            self.pipeline.confidence = confidence
                .parse()
                .map_err(|_| anyhow!("LOOKOUT_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Some(enabled) = non_empty_env("LOOKOUT_EVENTS_ENABLED") {
            self.events_enabled = parse_bool(&enabled)
                .ok_or_else(|| anyhow!("LOOKOUT_EVENTS_ENABLED must be true or false"))?;
        }
        Ok(())
    }

    /// Check ranges and that the address and source spec parse.
    pub fn validate(&self) -> Result<()> {
        self.http_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid http addr '{}'", self.http_addr))?;
        SourceConfig::parse(&self.source.spec)?;
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.detector.engine.trim().is_empty() {
            return Err(anyhow!("detector engine must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.pipeline.confidence) {
            return Err(anyhow!(
                "confidence must be between 0 and 1, got {}",
                self.pipeline.confidence
            ));
        }
        if self.pipeline.target_width == 0 || self.pipeline.target_height == 0 {
            return Err(anyhow!("target frame size must be non-zero"));
        }
        if !(1..=100).contains(&self.pipeline.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        if self.dashboard.poll_interval.is_zero() {
            return Err(anyhow!("dashboard poll interval must be greater than zero"));
        }
        if self.dashboard.page_size == 0 {
            return Err(anyhow!("dashboard page size must be greater than zero"));
        }
        Ok(())
    }

    /// Source configuration with the capture settings applied.
    pub fn source_config(&self) -> Result<SourceConfig> {
        let source = match SourceConfig::parse(&self.source.spec)? {
            SourceConfig::Camera(camera) => SourceConfig::Camera(CameraConfig {
                width: self.source.width,
                height: self.source.height,
                target_fps: self.source.target_fps,
                ..camera
            }),
            SourceConfig::File(file) => SourceConfig::File(FileConfig {
                play_realtime: self.source.play_realtime,
                target_fps: self.source.target_fps,
                frame_limit: self.source.frame_limit,
                ..file
            }),
        };
        Ok(source)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            addr: self.http_addr.clone(),
            events_enabled: self.events_enabled,
            dashboard: self.dashboard.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<LookoutConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
