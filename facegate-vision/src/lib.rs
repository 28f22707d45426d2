pub mod capture;
pub mod cascade;
pub mod detector;
pub mod error;
pub mod extract;
mod opencv_xml;
pub mod region;
pub mod signature;
pub mod video;

// Re-export commonly used types
pub use capture::{CancelToken, CaptureMode, CaptureSession, FrameSource, ImageFiles};
pub use detector::RegionDetector;
pub use error::VisionError;
pub use extract::{RawPixelExtractor, SignatureExtractor};
pub use region::FaceRegion;
pub use signature::{aggregate, ContentHash, Signature, SIGNATURE_LEN};
pub use video::Camera;
