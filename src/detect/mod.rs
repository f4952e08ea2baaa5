mod backend;
mod backends;
mod palette;
mod prediction;
mod registry;

pub use backend::{share, Detector, DetectorSettings, SharedDetector, DEFAULT_CONFIDENCE};
pub(crate) use backend::lock_detector;
pub use backends::{ColorKeyBackend, MotionBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use palette::{ColorPalette, FALLBACK_COLOR};
pub use prediction::{BoundingBox, Prediction};
pub use registry::DetectorRegistry;
