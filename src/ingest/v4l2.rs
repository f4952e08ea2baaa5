//! V4L2 capture backend for `CameraSource`.
//!
//! The device and its mmap stream live on the capture thread's stack, so the
//! stream can borrow the device without a self-referencing struct.

use std::sync::mpsc::SyncSender;
use std::time::Instant;

use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;

use super::camera::{CameraConfig, FrameSink};
use super::normalize::{normalize_to_frame, PixelFormat};
use crate::error::{LookoutError, Result};

const BUFFER_COUNT: u32 = 4;

/// Check that the device node exists and answers a capability query.
pub(crate) fn probe(config: &CameraConfig) -> Result<()> {
    let path = config.device_path();
    let device =
        v4l::Device::with_path(&path).map_err(|e| LookoutError::unavailable(&path, e))?;
    let caps = device
        .query_caps()
        .map_err(|e| LookoutError::unavailable(&path, e))?;
    log::debug!("V4l2: {} is {} ({})", path, caps.card, caps.driver);
    Ok(())
}

/// Capture loop. Reports readiness on `ready` once the stream is running.
pub(crate) fn run_capture(config: &CameraConfig, sink: &FrameSink, ready: SyncSender<Result<()>>) {
    let path = config.device_path();
    let (mut device, format) = match open_device(config) {
        Ok(opened) => opened,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    let mut stream = match MmapStream::with_buffers(&mut device, Type::VideoCapture, BUFFER_COUNT)
    {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(LookoutError::unavailable(&path, err)));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let interval = config.frame_interval();
    let mut sequence = 0u64;
    let mut last_publish: Option<Instant> = None;
    while !sink.should_stop() {
        let (buf, _meta) = match stream.next() {
            Ok(next) => next,
            Err(err) => {
                sink.fail(format!("capture v4l2 frame from {path}: {err}"));
                return;
            }
        };
        // Decimate to the target rate; the driver may run faster.
        if last_publish.is_some_and(|at| at.elapsed() < interval) {
            continue;
        }
        sequence += 1;
        match normalize_to_frame(buf, format.width, format.height, format.pixel, sequence) {
            Ok(frame) => {
                sink.publish(frame);
                last_publish = Some(Instant::now());
            }
            Err(err) => log::warn!("V4l2: dropping undecodable frame {}: {}", sequence, err),
        }
    }
}

struct ActiveFormat {
    width: u32,
    height: u32,
    pixel: PixelFormat,
}

fn open_device(config: &CameraConfig) -> Result<(v4l::Device, ActiveFormat)> {
    let path = config.device_path();
    let device =
        v4l::Device::with_path(&path).map_err(|e| LookoutError::unavailable(&path, e))?;
    let mut format = device
        .format()
        .map_err(|e| LookoutError::unavailable(&path, e))?;
    format.width = config.width;
    format.height = config.height;
    format.fourcc = v4l::FourCC::new(b"MJPG");

    let format = match device.set_format(&format) {
        Ok(format) => format,
        Err(err) => {
            log::warn!("V4l2: failed to set format on {}: {}", path, err);
            device
                .format()
                .map_err(|e| LookoutError::unavailable(&path, e))?
        }
    };

    if config.target_fps > 0 {
        let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
        if let Err(err) = device.set_params(&params) {
            log::warn!("V4l2: failed to set fps on {}: {}", path, err);
        }
    }

    let pixel = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
        LookoutError::unavailable(
            &path,
            format!("unsupported pixel format {}", format.fourcc),
        )
    })?;
    log::info!(
        "V4l2: opened {} ({}x{} {})",
        path,
        format.width,
        format.height,
        format.fourcc
    );
    Ok((
        device,
        ActiveFormat {
            width: format.width,
            height: format.height,
            pixel,
        },
    ))
}
