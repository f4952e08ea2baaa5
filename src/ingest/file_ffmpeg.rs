//! Video file decoding with FFmpeg.
//!
//! Frames are decoded in file order and scaled to RGB24. At end of input the
//! decoder is flushed so trailing frames are not lost.

use ffmpeg_next as ffmpeg;

use crate::error::{LookoutError, Result};
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: &str) -> Result<Self> {
        let unavailable = |e: &dyn std::fmt::Display| LookoutError::unavailable(path, e);
        ffmpeg::init().map_err(|e| unavailable(&e))?;
        let input = ffmpeg::format::input(path).map_err(|e| unavailable(&e))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| LookoutError::unavailable(path, "file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| unavailable(&e))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| unavailable(&e))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| unavailable(&e))?;

        log::info!(
            "FileSource: opened {} ({}x{}, ffmpeg)",
            path,
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            eof_sent: false,
        })
    }

    /// Decode the next frame, or `None` at end of file.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut next_packet = None;
            for (stream, packet) in self.input.packets() {
                if stream.index() == self.stream_index {
                    next_packet = Some(packet);
                    break;
                }
            }
            match next_packet {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .map_err(|e| self.read_error("send packet to decoder", e))?,
                None => {
                    self.decoder
                        .send_eof()
                        .map_err(|e| self.read_error("flush decoder", e))?;
                    self.eof_sent = true;
                }
            }
        }
    }

    fn receive(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .map_err(|e| self.read_error("scale frame to RGB", e))?;
        self.frame_count += 1;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        Frame::from_rgb(pixels, width, height, self.frame_count).map(Some)
    }

    fn read_error(&self, what: &str, err: ffmpeg::Error) -> LookoutError {
        LookoutError::SourceRead(format!("{} ({}): {}", what, self.path, err))
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data[..row_bytes * height as usize].to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).ok_or_else(|| {
            LookoutError::SourceRead("ffmpeg frame row is out of bounds".into())
        })?);
    }

    Ok((pixels, width, height))
}
