//! Drawing predictions onto frames and encoding them for transport.

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::detect::{BoundingBox, ColorPalette, Prediction};
use crate::error::{LookoutError, Result};

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

const BOX_THICKNESS: u32 = 2;
const TAB_HEIGHT: u32 = 10;
const TAB_WIDTH_PER_CHAR: u32 = 6;

/// Draws prediction boxes and JPEG-encodes the result.
#[derive(Clone, Debug)]
pub struct Annotator {
    jpeg_quality: u8,
}

impl Annotator {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Draw every prediction in its palette colour: an outline plus a filled
    /// tab sized to the label, above the box when there is room.
    pub fn draw(&self, image: &mut RgbImage, predictions: &[Prediction], palette: &ColorPalette) {
        for prediction in predictions {
            let color = palette.color_for(&prediction.label);
            let bbox = prediction.bbox.clamp(image.width(), image.height());
            draw_outline(image, &bbox, color, BOX_THICKNESS);
            draw_tab(image, &bbox, color, prediction.label.chars().count() as u32);
        }
    }

    pub fn encode(&self, image: &RgbImage) -> Result<Vec<u8>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(LookoutError::Encode(format!(
                "cannot encode {}x{} frame",
                image.width(),
                image.height()
            )));
        }
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality)
            .encode_image(image)
            .map_err(|e| LookoutError::Encode(e.to_string()))?;
        Ok(buf)
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

fn fill_rect(image: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    let x1 = x1.min(image.width());
    let y1 = y1.min(image.height());
    for y in y0..y1 {
        for x in x0..x1 {
            image.put_pixel(x, y, color);
        }
    }
}

fn draw_outline(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    if bbox.width() == 0 || bbox.height() == 0 {
        return;
    }
    let t = thickness.min(bbox.width()).min(bbox.height());
    let (x0, y0, x1, y1) = (bbox.start_x, bbox.start_y, bbox.end_x, bbox.end_y);
    fill_rect(image, x0, y0, x1, y0 + t, color);
    fill_rect(image, x0, y1 - t, x1, y1, color);
    fill_rect(image, x0, y0, x0 + t, y1, color);
    fill_rect(image, x1 - t, y0, x1, y1, color);
}

fn draw_tab(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, label_chars: u32) {
    if bbox.width() == 0 || bbox.height() == 0 {
        return;
    }
    let width = (label_chars.max(1) * TAB_WIDTH_PER_CHAR).min(bbox.width());
    let (y0, y1) = if bbox.start_y >= TAB_HEIGHT {
        (bbox.start_y - TAB_HEIGHT, bbox.start_y)
    } else {
        (bbox.start_y, (bbox.start_y + TAB_HEIGHT).min(bbox.end_y))
    };
    fill_rect(image, bbox.start_x, y0, bbox.start_x + width, y1, color);
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREY: Rgb<u8> = Rgb([50, 50, 50]);

    fn person_at(bbox: BoundingBox) -> Vec<Prediction> {
        vec![Prediction::new("person", 0.9, bbox)]
    }

    #[test]
    fn draw_outlines_box_in_palette_color() {
        let palette = ColorPalette::for_labels(&["person"]);
        let color = palette.color_for("person");
        let mut image = RgbImage::from_pixel(100, 100, GREY);

        Annotator::default().draw(&mut image, &person_at(BoundingBox::new(20, 30, 60, 80)), &palette);

        assert_eq!(*image.get_pixel(20, 50), color);
        assert_eq!(*image.get_pixel(59, 50), color);
        assert_eq!(*image.get_pixel(40, 79), color);
        // Interior stays untouched.
        assert_eq!(*image.get_pixel(40, 55), GREY);
        // Label tab sits above the box.
        assert_eq!(*image.get_pixel(21, 25), color);
    }

    #[test]
    fn boxes_outside_the_frame_are_clamped() {
        let palette = ColorPalette::for_labels(&["person"]);
        let mut image = RgbImage::from_pixel(10, 10, GREY);
        Annotator::default().draw(&mut image, &person_at(BoundingBox::new(5, 0, 50, 50)), &palette);
        assert_eq!(*image.get_pixel(9, 5), palette.color_for("person"));
    }

    #[test]
    fn encode_produces_jpeg() -> Result<()> {
        let bytes = Annotator::default().encode(&RgbImage::from_pixel(16, 16, GREY))?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
        Ok(())
    }

    #[test]
    fn encode_rejects_empty_frame() {
        let err = Annotator::default()
            .encode(&RgbImage::new(0, 0))
            .expect_err("empty frame");
        assert!(err.is_frame_local());
    }
}
