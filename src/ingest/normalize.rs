use crate::error::{LookoutError, Result};
use crate::frame::Frame;

/// Pixel layouts a camera may hand us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_frame(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    sequence: u64,
) -> Result<Frame> {
    match format {
        PixelFormat::Rgb24 => Frame::from_rgb(pixels.to_vec(), width, height, sequence),
        PixelFormat::Yuyv => {
            Frame::from_rgb(yuyv_to_rgb(pixels, width, height)?, width, height, sequence)
        }
        PixelFormat::Mjpeg => {
            let image = image::load_from_memory_with_format(pixels, image::ImageFormat::Jpeg)
                .map_err(|e| LookoutError::SourceRead(format!("decode mjpeg frame: {e}")))?;
            Ok(Frame::new(image.into_rgb8(), sequence))
        }
    }
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| LookoutError::SourceRead("YUYV frame dimensions overflow".into()))?;
    let expected = pixel_count * 2;
    if pixels.len() != expected {
        return Err(LookoutError::SourceRead(format!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        )));
    }

    let mut rgb = Vec::with_capacity(pixel_count * 3);
    // Each 4-byte group Y0 U Y1 V covers two pixels.
    for chunk in pixels.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_neutral_chroma_is_gray() -> Result<()> {
        let yuyv = [128u8, 128, 128, 128, 128, 128, 128, 128];
        let frame = normalize_to_frame(&yuyv, 2, 2, PixelFormat::Yuyv, 1)?;
        assert!(frame.image().pixels().all(|p| p.0 == [128, 128, 128]));
        Ok(())
    }

    #[test]
    fn rgb_pass_through_validates_length() {
        assert!(normalize_to_frame(&[1u8; 9], 1, 3, PixelFormat::Rgb24, 1).is_ok());
        assert!(normalize_to_frame(&[1u8; 8], 1, 3, PixelFormat::Rgb24, 1).is_err());
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"NV12"), None);
    }
}
