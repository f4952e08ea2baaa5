pub mod color_key;
pub mod motion;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use color_key::ColorKeyBackend;
pub use motion::MotionBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
