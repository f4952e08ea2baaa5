use image::Rgb;

/// Drawn for labels the palette does not know.
pub const FALLBACK_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Fixed label -> draw colour mapping supplied by a detector.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColorPalette {
    entries: Vec<(String, Rgb<u8>)>,
}

impl ColorPalette {
    /// Assign each label a distinct, stable colour.
    ///
    /// Hues are spread with the golden ratio so neighbouring class ids get
    /// clearly different colours.
    pub fn for_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let entries = labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let hue = (i as f32 * 0.618_034).fract();
                (label.as_ref().to_string(), hsv_to_rgb(hue, 0.85, 0.95))
            })
            .collect();
        Self { entries }
    }

    pub fn with_color(mut self, label: impl Into<String>, color: Rgb<u8>) -> Self {
        let label = label.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = color,
            None => self.entries.push((label, color)),
        }
        self
    }

    pub fn get(&self, label: &str) -> Option<Rgb<u8>> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, color)| *color)
    }

    pub fn color_for(&self, label: &str) -> Rgb<u8> {
        self.get(label).unwrap_or(FALLBACK_COLOR)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);
    let (r, g, b) = match sector as u32 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let to_u8 = |c: f32| (c * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb([to_u8(r), to_u8(g), to_u8(b)])
}
