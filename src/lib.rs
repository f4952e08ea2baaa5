//! lookout: live object detection behind a browser dashboard.
//!
//! Frames come from a camera or a video file, pass through a detector, get
//! annotated and are published as a multipart MJPEG stream. Every processed
//! frame adds a `(timestamp, labels)` observation to an in-memory log, which
//! the dashboard page polls and renders as a table.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames and the three-way read result
//! - `ingest`: camera, file and synthetic frame sources
//! - `detect`: detector trait, backends and the engine registry
//! - `annotate`: box drawing and JPEG encoding
//! - `observation`: the deduplicating observation log
//! - `pipeline`: shared monitor state and one capture-to-log iteration
//! - `stream`: multipart framing of the annotated feed
//! - `dashboard`: the HTML page and the polled table view
//! - `server`: HTTP routes
//! - `config`: file and environment configuration for the daemon
//! - `ui`: startup console stages

pub mod annotate;
pub mod config;
pub mod dashboard;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod observation;
pub mod pipeline;
pub mod server;
pub mod stream;
pub mod ui;

#[cfg(test)]
mod testing;

pub use error::{LookoutError, Result};
pub use frame::{Frame, ReadResult};
pub use ingest::{FrameSource, SourceConfig, SourceGuard};
pub use observation::{Observation, ObservationLog};
pub use pipeline::{Monitor, Pipeline, PipelineConfig, ResizePolicy};
