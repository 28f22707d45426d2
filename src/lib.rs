pub mod accounts;
pub mod config;
pub mod identity;
pub mod matcher;
pub mod scanner;
pub mod storage;

// Re-export vision types for convenience
pub use facegate_vision::{
    capture, detector, extract, region, video, CaptureMode, RegionDetector, Signature,
    VisionError,
};
