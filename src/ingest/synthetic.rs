use image::{Rgb, RgbImage};

use crate::frame::Frame;

/// Colour of the synthetic "person" marker. Matches the stub detector's key table.
pub(crate) const MARKER_PRIMARY: Rgb<u8> = Rgb([255, 0, 0]);
/// Colour of the synthetic "dog" marker.
pub(crate) const MARKER_SECONDARY: Rgb<u8> = Rgb([0, 0, 255]);

const MIN_SIDE: u32 = 16;

/// Generates a grey gradient with a red square sweeping across it.
///
/// Every other block of 100 frames a smaller blue square is added, so a
/// detector keyed on those colours sees the label set change over time.
/// Background pixels are always neutral grey and never match a marker.
pub(crate) struct SyntheticScene {
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticScene {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(MIN_SIDE),
            height: height.max(MIN_SIDE),
            frame_count: 0,
        }
    }

    pub(crate) fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn next_frame(&mut self) -> Frame {
        self.frame_count += 1;
        let n = self.frame_count;
        let (w, h) = (self.width, self.height);

        let mut image = RgbImage::from_fn(w, h, |x, _| {
            let v = 40 + (u64::from(x) * 160 / u64::from(w)) as u8;
            Rgb([v, v, v])
        });

        let side = (h / 4).max(4).min(w / 2);
        let span = u64::from(w - side).max(1);
        let x0 = ((n * 8) % span) as u32;
        let y0 = (h - side) / 2;
        fill_square(&mut image, x0, y0, side, MARKER_PRIMARY);

        if (n / 100) % 2 == 1 {
            let small = (side / 2).max(2);
            let x1 = w - small - (x0 % (w - small));
            fill_square(&mut image, x1, 1, small, MARKER_SECONDARY);
        }

        Frame::new(image, n)
    }
}

fn fill_square(image: &mut RgbImage, x0: u32, y0: u32, side: u32, color: Rgb<u8>) {
    let x_end = (x0 + side).min(image.width());
    let y_end = (y0 + side).min(image.height());
    for y in y0..y_end {
        for x in x0..x_end {
            image.put_pixel(x, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_has_primary_marker() {
        let mut scene = SyntheticScene::new(64, 48);
        let frame = scene.next_frame();
        assert_eq!(frame.sequence, 1);
        assert!(frame.image().pixels().any(|p| *p == MARKER_PRIMARY));
        assert!(!frame.image().pixels().any(|p| *p == MARKER_SECONDARY));
    }

    #[test]
    fn secondary_marker_appears_in_second_block() {
        let mut scene = SyntheticScene::new(64, 48);
        let mut frame = scene.next_frame();
        while frame.sequence < 100 {
            frame = scene.next_frame();
        }
        assert!(frame.image().pixels().any(|p| *p == MARKER_SECONDARY));
        assert_eq!(scene.frame_count(), 100);
    }

    #[test]
    fn tiny_dimensions_are_clamped() {
        let mut scene = SyntheticScene::new(1, 1);
        let frame = scene.next_frame();
        assert_eq!(frame.width(), MIN_SIDE);
    }
}
