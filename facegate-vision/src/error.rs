use thiserror::Error;

/// Recoverable failures of a detection, extraction or capture attempt.
///
/// None of these are fatal: callers retry the capture session or fall back to
/// password-only flows.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("failed to decode image: {0}")]
    DecodeError(String),

    #[error("no face detected")]
    NoFaceDetected,

    #[error("face too small: {size}px is below the {minimum}px floor")]
    FaceTooSmall { size: u32, minimum: u32 },

    #[error("face region is empty")]
    EmptyRegion,

    #[error("no face captured")]
    NoFaceCaptured,

    #[error("only {captured} of {required} face frames captured")]
    IncompleteCapture { captured: usize, required: usize },

    #[error("capture cancelled")]
    Cancelled,
}

pub type VisionResult<T> = Result<T, VisionError>;
