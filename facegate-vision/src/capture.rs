//! Multi-frame capture sessions that reduce to one representative signature.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbImage;

use crate::detector::RegionDetector;
use crate::error::{VisionError, VisionResult};
use crate::extract::SignatureExtractor;
use crate::signature::{aggregate, Signature};

/// Something that yields frames; `Ok(None)` means the source is exhausted.
pub trait FrameSource {
    fn next_frame(&mut self) -> VisionResult<Option<RgbImage>>;
}

/// Frames decoded from image files, in the given order.
pub struct ImageFiles {
    paths: VecDeque<PathBuf>,
}

impl ImageFiles {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }
}

impl FrameSource for ImageFiles {
    fn next_frame(&mut self) -> VisionResult<Option<RgbImage>> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let img = image::open(&path)
            .map_err(|e| VisionError::DecodeError(format!("{}: {e}", path.display())))?;
        Ok(Some(img.to_rgb8()))
    }
}

/// Shared flag a user-facing "quit" gesture sets to abort a session.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Enroll,
    Verify,
}

impl CaptureMode {
    pub fn required_frames(self) -> usize {
        match self {
            CaptureMode::Enroll => 5,
            CaptureMode::Verify => 3,
        }
    }
}

pub struct CaptureSession<'a> {
    detector: &'a RegionDetector,
    extractor: &'a dyn SignatureExtractor,
    mode: CaptureMode,
    max_attempts: usize,
    cancel: CancelToken,
}

impl<'a> CaptureSession<'a> {
    pub fn new(
        detector: &'a RegionDetector,
        extractor: &'a dyn SignatureExtractor,
        mode: CaptureMode,
    ) -> Self {
        Self {
            detector,
            extractor,
            mode,
            max_attempts: 60,
            cancel: CancelToken::new(),
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Pull frames until enough faces were captured, then average them.
    ///
    /// Frames without a usable face are skipped. A session that runs out of
    /// frames or attempts first never averages a partial set: it fails with
    /// `NoFaceCaptured`, or `IncompleteCapture` when some faces were seen.
    pub fn run(&self, source: &mut dyn FrameSource) -> VisionResult<Signature> {
        let required = self.mode.required_frames();
        let mut collected: Vec<Signature> = Vec::with_capacity(required);

        for attempt in 1..=self.max_attempts {
            if self.cancel.is_cancelled() {
                log::info!("capture cancelled after {} frame(s)", attempt - 1);
                return Err(VisionError::Cancelled);
            }
            let Some(frame) = source.next_frame()? else {
                log::debug!("frame source exhausted");
                break;
            };

            match self
                .detector
                .detect(&frame)
                .and_then(|region| self.extractor.extract(&frame, &region))
            {
                Ok(sig) => {
                    collected.push(sig);
                    log::info!("Frames: {}/{}", collected.len(), required);
                    if collected.len() >= required {
                        break;
                    }
                }
                Err(
                    e @ (VisionError::NoFaceDetected
                    | VisionError::FaceTooSmall { .. }
                    | VisionError::EmptyRegion),
                ) => {
                    log::warn!("Frame {attempt}: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        match collected.len() {
            0 => Err(VisionError::NoFaceCaptured),
            captured if captured < required => {
                Err(VisionError::IncompleteCapture { captured, required })
            }
            _ => Ok(aggregate(&collected)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::{CascadeModel, DetectParams};
    use crate::extract::RawPixelExtractor;
    use crate::region::FaceRegion;
    use image::{GrayImage, Rgb};

    /// Reports a face wherever the frame's top-left pixel is white.
    struct Marker;

    impl CascadeModel for Marker {
        fn name(&self) -> &str {
            "marker"
        }

        fn detect_multi_scale(&self, gray: &GrayImage, _params: &DetectParams) -> Vec<FaceRegion> {
            if gray.get_pixel(0, 0)[0] > 200 {
                vec![FaceRegion::new(20, 20, 60, 60)]
            } else {
                Vec::new()
            }
        }
    }

    struct Frames(VecDeque<RgbImage>);

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> VisionResult<Option<RgbImage>> {
            Ok(self.0.pop_front())
        }
    }

    fn frame(face: bool, shade: u8) -> RgbImage {
        let mut img = RgbImage::from_pixel(100, 100, Rgb([shade, shade, shade]));
        img.put_pixel(0, 0, if face { Rgb([255; 3]) } else { Rgb([0; 3]) });
        if face {
            // keep some contrast so equalization maps the marker to white
            img.put_pixel(1, 0, Rgb([0; 3]));
        }
        img
    }

    fn detector() -> RegionDetector {
        RegionDetector::new(vec![Box::new(Marker)])
    }

    #[test]
    fn required_frames_per_mode() {
        assert_eq!(CaptureMode::Enroll.required_frames(), 5);
        assert_eq!(CaptureMode::Verify.required_frames(), 3);
    }

    #[test]
    fn verify_stops_after_three_faces() {
        let detector = detector();
        let mut source = Frames(
            [frame(true, 10), frame(false, 10), frame(true, 20), frame(true, 30), frame(true, 40)]
                .into_iter()
                .collect(),
        );
        let session = CaptureSession::new(&detector, &RawPixelExtractor, CaptureMode::Verify);
        let sig = session.run(&mut source).unwrap();
        assert_eq!(source.0.len(), 1);
        // mean of shades 10, 20, 30 in the face interior
        let centre = sig.values()[(50 * 100 + 50) * 3];
        assert!((centre - 20.0).abs() < 1e-3, "{centre}");
    }

    #[test]
    fn no_faces_is_no_face_captured() {
        let detector = detector();
        let mut source = Frames((0..4).map(|_| frame(false, 50)).collect());
        let session = CaptureSession::new(&detector, &RawPixelExtractor, CaptureMode::Enroll);
        assert!(matches!(
            session.run(&mut source),
            Err(VisionError::NoFaceCaptured)
        ));
    }

    #[test]
    fn attempt_budget_is_honoured() {
        let detector = detector();
        let mut source = Frames((0..10).map(|_| frame(false, 50)).collect());
        let session =
            CaptureSession::new(&detector, &RawPixelExtractor, CaptureMode::Enroll).max_attempts(4);
        assert!(session.run(&mut source).is_err());
        assert_eq!(source.0.len(), 6);
    }

    #[test]
    fn cancellation_aborts() {
        let detector = detector();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut source = Frames((0..5).map(|_| frame(true, 50)).collect());
        let session = CaptureSession::new(&detector, &RawPixelExtractor, CaptureMode::Enroll)
            .cancel_token(cancel);
        assert!(matches!(session.run(&mut source), Err(VisionError::Cancelled)));
    }

    #[test]
    fn partial_set_is_never_averaged() {
        let detector = detector();
        let mut source = Frames([frame(true, 10)].into_iter().collect());
        let session = CaptureSession::new(&detector, &RawPixelExtractor, CaptureMode::Enroll);
        assert!(matches!(
            session.run(&mut source),
            Err(VisionError::IncompleteCapture {
                captured: 1,
                required: 5
            })
        ));

        let mut source = Frames((0..6).map(|i| frame(i % 2 == 0, 50)).collect());
        let session =
            CaptureSession::new(&detector, &RawPixelExtractor, CaptureMode::Verify).max_attempts(4);
        assert!(matches!(
            session.run(&mut source),
            Err(VisionError::IncompleteCapture {
                captured: 2,
                required: 3
            })
        ));
    }

    /// Cancels the shared token right after handing out frame `after`.
    struct QuitAfter {
        frames: Frames,
        served: usize,
        after: usize,
        cancel: CancelToken,
    }

    impl FrameSource for QuitAfter {
        fn next_frame(&mut self) -> VisionResult<Option<RgbImage>> {
            let frame = self.frames.next_frame();
            self.served += 1;
            if self.served == self.after {
                self.cancel.cancel();
            }
            frame
        }
    }

    #[test]
    fn cancel_mid_session_discards_collected_frames() {
        let detector = detector();
        let cancel = CancelToken::new();
        let mut source = QuitAfter {
            frames: Frames((0..5).map(|_| frame(true, 50)).collect()),
            served: 0,
            after: 2,
            cancel: cancel.clone(),
        };
        let session = CaptureSession::new(&detector, &RawPixelExtractor, CaptureMode::Verify)
            .cancel_token(cancel);
        assert!(matches!(session.run(&mut source), Err(VisionError::Cancelled)));
        // quit arrived with two faces in hand; no third frame was read
        assert_eq!(source.served, 2);
        assert_eq!(source.frames.0.len(), 3);
    }

    #[test]
    fn unreadable_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();
        let mut files = ImageFiles::new([path]);
        assert!(matches!(files.next_frame(), Err(VisionError::DecodeError(_))));
        assert!(files.next_frame().unwrap().is_none());
    }
}
