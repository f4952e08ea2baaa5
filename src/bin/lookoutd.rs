//! lookoutd - live detection dashboard daemon
//!
//! This daemon:
//! 1. Opens the configured camera or video file
//! 2. Loads the selected detector
//! 3. Serves the annotated MJPEG feed and the observation dashboard
//! 4. Releases the source on shutdown (Ctrl-C)

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use lookout::config::{LookoutConfig, CONFIG_ENV};
use lookout::detect::{self, DetectorRegistry};
use lookout::ingest::{self, SourceGuard};
use lookout::observation::ObservationLog;
use lookout::pipeline::{Monitor, ResizePolicy};
use lookout::server::Server;
use lookout::ui::{Console, ConsoleMode};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Serve a live object-detection feed with an observation dashboard"
)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Frame source: camera:<index>, file:<path> or a bare path.
    #[arg(long)]
    source: Option<String>,

    /// Listen address for the dashboard.
    #[arg(long)]
    addr: Option<String>,

    /// Detector engine name.
    #[arg(long)]
    detector: Option<String>,

    /// Model file for engines that load one.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Labels file for the model's class ids.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Minimum prediction confidence (0..1).
    #[arg(long)]
    confidence: Option<f32>,

    /// Resize frames before or after detection.
    #[arg(long, value_name = "before|after")]
    resize: Option<String>,

    /// Play video files as fast as they decode.
    #[arg(long)]
    no_realtime: bool,

    /// Answer 404 on POST /event.
    #[arg(long)]
    disable_events: bool,

    /// List detector engines and exit.
    #[arg(long)]
    list_detectors: bool,

    #[arg(long, value_enum, default_value_t = ConsoleMode::Auto, value_name = "MODE")]
    ui: ConsoleMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let console = Console::stderr(args.ui);
    let registry = DetectorRegistry::with_builtin();

    if args.list_detectors {
        for name in registry.list() {
            println!("{name}");
        }
        return Ok(());
    }

    let cfg = {
        let _stage = console.stage("Load configuration");
        if let Some(path) = &args.config {
            std::env::set_var(CONFIG_ENV, path);
        }
        let mut cfg = LookoutConfig::load()?;
        apply_args(&mut cfg, &args)?;
        cfg.validate()?;
        cfg
    };

    let source_cfg = cfg.source_config()?;
    let guard = {
        let stage = console.stage(&format!("Open {}", source_cfg.describe()));
        match ingest::open_source(&source_cfg).and_then(|source| {
            let guard = SourceGuard::new(source);
            guard.start()?;
            Ok(guard)
        }) {
            Ok(guard) => guard,
            Err(err) => {
                stage.fail(&err);
                return Err(err).context("frame source unavailable");
            }
        }
    };

    let detector = {
        let stage = console.stage(&format!("Load detector '{}'", cfg.detector.engine));
        match registry.load(&cfg.detector.engine, &cfg.detector.settings) {
            Ok(detector) => detector,
            Err(err) => {
                stage.fail(&err);
                return Err(err).context("detector unavailable");
            }
        }
    };

    let log = Arc::new(ObservationLog::new());
    let monitor = Monitor::new(
        guard.shared(),
        detect::share(detector),
        log.clone(),
        cfg.pipeline.clone(),
    );

    let server = {
        let _stage = console.stage("Start dashboard server");
        Server::new(cfg.server_config(), monitor).spawn()?
    };
    log::info!(
        "lookoutd running: source={} detector={} dashboard=http://{}/",
        source_cfg.describe(),
        cfg.detector.engine,
        server.addr
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    let outcome = loop {
        match rx.recv_timeout(HEALTH_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received, stopping dashboard server...");
                break Ok(());
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if server.is_finished() {
                    break Err(anyhow!("dashboard server stopped unexpectedly"));
                }
                match (guard.stats(), log.len()) {
                    (Ok(stats), Ok(observations)) => log::info!(
                        "health: frames_captured={} frames_missed={} observations={}",
                        stats.frames_captured,
                        stats.frames_missed,
                        observations
                    ),
                    (Err(err), _) | (_, Err(err)) => log::warn!("health check failed: {}", err),
                }
            }
        }
    };

    server.stop()?;
    drop(guard);
    outcome
}

/// Command-line flags win over the file and environment.
fn apply_args(cfg: &mut LookoutConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        cfg.source.spec = source.clone();
    }
    if let Some(addr) = &args.addr {
        cfg.http_addr = addr.clone();
    }
    if let Some(engine) = &args.detector {
        cfg.detector.engine = engine.clone();
    }
    if let Some(model) = &args.model {
        cfg.detector.settings.model_path = Some(model.clone());
    }
    if let Some(labels) = &args.labels {
        cfg.detector.settings.labels_path = Some(labels.clone());
    }
    if let Some(confidence) = args.confidence {
        cfg.pipeline.confidence = confidence;
    }
    if let Some(resize) = &args.resize {
        cfg.pipeline.resize_policy = resize.parse::<ResizePolicy>()?;
    }
    if args.no_realtime {
        cfg.source.play_realtime = false;
    }
    if args.disable_events {
        cfg.events_enabled = false;
    }
    Ok(())
}
