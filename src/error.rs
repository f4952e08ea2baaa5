use thiserror::Error;

/// Errors raised by the capture and detection pipeline.
///
/// A transient frame miss is not an error; sources report it as
/// [`ReadResult::Empty`](crate::frame::ReadResult::Empty).
#[derive(Debug, Error)]
pub enum LookoutError {
    /// The camera or file could not be opened. Fatal at construction.
    #[error("frame source {source_desc} unavailable: {reason}")]
    SourceUnavailable { source_desc: String, reason: String },

    /// The source failed after it was opened.
    #[error("frame source read failed: {0}")]
    SourceRead(String),

    /// The annotated frame could not be encoded. Only this frame is dropped.
    #[error("frame encoding failed: {0}")]
    Encode(String),

    /// The detector backend failed. Ends the current stream.
    #[error("detector failure: {0}")]
    Detector(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

impl LookoutError {
    pub fn unavailable(source_desc: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_desc: source_desc.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the error only affects the current frame.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::Encode(_))
    }
}

pub type Result<T, E = LookoutError> = std::result::Result<T, E>;
