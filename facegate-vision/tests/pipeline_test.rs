use anyhow::Result;
use facegate_vision::cascade::{HaarCascade, Stage, WeakClassifier, WeightedRect};
use facegate_vision::detector::{DetectorConfig, RegionDetector};
use facegate_vision::{
    CaptureMode, CaptureSession, FrameSource, ImageFiles, RawPixelExtractor, SignatureExtractor,
    VisionError, SIGNATURE_LEN,
};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// A cascade without stages accepts every window it scans.
fn accept_all() -> HaarCascade {
    HaarCascade {
        name: "accept-all".into(),
        window: [20, 20],
        stages: vec![],
    }
}

/// A cascade whose only stage can never be satisfied.
fn reject_all() -> HaarCascade {
    HaarCascade {
        name: "reject-all".into(),
        window: [20, 20],
        stages: vec![Stage {
            threshold: 2.0,
            classifiers: vec![WeakClassifier {
                rects: vec![WeightedRect {
                    x: 0,
                    y: 0,
                    width: 20,
                    height: 20,
                    weight: 1.0,
                }],
                threshold: 0.0,
                left: 1.0,
                right: 1.0,
            }],
        }],
    }
}

fn write_cascade(dir: &Path, name: &str, cascade: &HaarCascade) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec(cascade)?)?;
    Ok(path)
}

fn face_frame(shade: u8) -> RgbImage {
    RgbImage::from_fn(64, 48, |x, y| {
        if (16..48).contains(&x) && (8..40).contains(&y) {
            Rgb([shade, shade / 2, 255 - shade])
        } else {
            Rgb([(x * 4) as u8, (y * 5) as u8, 40])
        }
    })
}

#[test]
fn test_detect_and_extract_from_cascade_files() -> Result<()> {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir()?;
    let paths = vec![
        write_cascade(dir.path(), "frontal_default.json", &reject_all())?,
        write_cascade(dir.path(), "frontal_alt.json", &accept_all())?,
    ];
    let detector = RegionDetector::from_cascade_files(&paths)?;
    assert_eq!(detector.ladder().len(), 18);

    let img = face_frame(200);
    let region = detector.detect(&img)?;
    assert!(region.x + region.width <= 64 && region.y + region.height <= 48);
    assert!(region.width.min(region.height) >= 30);

    let sig = RawPixelExtractor.extract(&img, &region)?;
    assert_eq!(sig.values().len(), SIGNATURE_LEN);
    assert!(sig.values().iter().all(|v| (0.0..=255.0).contains(v)));
    Ok(())
}

#[test]
fn test_no_face_under_any_cascade() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = vec![
        write_cascade(dir.path(), "a.json", &reject_all())?,
        write_cascade(dir.path(), "b.json", &reject_all())?,
    ];
    let detector = RegionDetector::from_cascade_files(&paths)?;
    assert!(matches!(
        detector.detect(&face_frame(120)),
        Err(VisionError::NoFaceDetected)
    ));
    Ok(())
}

#[test]
fn test_missing_cascade_file() {
    let err = RegionDetector::from_cascade_files(&[PathBuf::from("/nonexistent/cascade.json")]);
    assert!(err.is_err());
    assert!(RegionDetector::from_cascade_files(&[]).is_err());
}

#[test]
fn test_capture_session_from_image_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut frames = Vec::new();
    for (i, shade) in [100u8, 150, 200].into_iter().enumerate() {
        let path = dir.path().join(format!("frame{i}.png"));
        face_frame(shade).save(&path)?;
        frames.push(path);
    }

    let detector = RegionDetector::with_ladder(
        vec![Box::new(accept_all())],
        vec![DetectorConfig {
            model: 0,
            scale_factor: 1.1,
            min_neighbors: 3,
        }],
    );
    let session = CaptureSession::new(&detector, &RawPixelExtractor, CaptureMode::Verify);
    let mut source = ImageFiles::new(frames);
    let sig = session.run(&mut source)?;
    assert_eq!(sig.values().len(), SIGNATURE_LEN);
    assert!(source.next_frame()?.is_none());
    Ok(())
}
