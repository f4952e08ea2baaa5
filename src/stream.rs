//! Multipart JPEG stream.
//!
//! `MultipartStream` turns a pipeline into a lazy sequence of
//! `multipart/x-mixed-replace` parts. Each `next()` runs pipeline iterations
//! until one frame is published, so the producer only works when the
//! consumer asks for more.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::LookoutError;
use crate::pipeline::{Pipeline, Step};

/// Boundary name used between parts.
pub const BOUNDARY: &str = "frame";

/// Response content type for the video feed.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n\r\n";

/// Frame one JPEG as a multipart part.
pub fn frame_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
    part.extend_from_slice(PART_HEADER);
    part.extend_from_slice(jpeg);
    part.extend_from_slice(PART_TRAILER);
    part
}

/// Endless stream of multipart parts.
///
/// Ends when the source is exhausted. A source or detector error is yielded
/// once, after which the stream is finished.
pub struct MultipartStream {
    pipeline: Pipeline,
    stop: Option<Arc<AtomicBool>>,
    finished: bool,
}

impl MultipartStream {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            stop: None,
            finished: false,
        }
    }

    /// End the stream once `stop` is set, checked before each iteration.
    pub fn until(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl Iterator for MultipartStream {
    type Item = Result<Vec<u8>, LookoutError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if self.stop_requested() {
                self.finished = true;
                return None;
            }
            match self.pipeline.step() {
                Ok(Step::Published(annotated)) => return Some(Ok(frame_part(&annotated.jpeg))),
                Ok(Step::Idle) => {
                    let backoff = self.pipeline.idle_backoff();
                    if !backoff.is_zero() {
                        std::thread::sleep(backoff);
                    }
                }
                Ok(Step::Skipped(_)) => continue,
                Ok(Step::Exhausted) => {
                    self.finished = true;
                    return None;
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

impl std::iter::FusedIterator for MultipartStream {}
