use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::capture::FrameSource;
use crate::error::{VisionError, VisionResult};

const RGB3: &[u8; 4] = b"RGB3";
const YUYV: &[u8; 4] = b"YUYV";
const GREY: &[u8; 4] = b"GREY";

/// V4L2 camera delivering RGB frames.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

fn unavailable(device: &str, what: &str, e: impl std::fmt::Display) -> VisionError {
    VisionError::CameraUnavailable(format!("{device}: {what}: {e}"))
}

impl Camera {
    pub fn open(device: &str) -> VisionResult<Self> {
        let dev = Device::with_path(device).map_err(|e| unavailable(device, "open", e))?;
        let mut fmt = dev.format().map_err(|e| unavailable(device, "get format", e))?;

        // RGB if the driver offers it, then YUYV, else whatever is configured
        for wanted in [RGB3, YUYV] {
            if fmt.fourcc == FourCC::new(RGB3) {
                break;
            }
            let desired = Format::new(fmt.width, fmt.height, FourCC::new(wanted));
            fmt = dev.set_format(&desired).unwrap_or(fmt);
        }

        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4)
            .map_err(|e| unavailable(device, "stream", e))?;
        log::info!(
            "camera {device}: {}x{} {}",
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    /// Block until the next frame is available.
    pub fn frame(&mut self) -> VisionResult<RgbImage> {
        let (data, meta) = self
            .stream
            .next()
            .map_err(|e| VisionError::CameraUnavailable(format!("capture frame: {e}")))?;
        log::debug!("frame seq={} len={}", meta.sequence, data.len());

        let pixels = (self.width * self.height) as usize;
        let buf = match &self.fourcc.repr {
            RGB3 => data.get(..pixels * 3).map(<[u8]>::to_vec),
            YUYV => yuyv_to_rgb(data, pixels),
            GREY => data
                .get(..pixels)
                .map(|grey| grey.iter().flat_map(|&y| [y, y, y]).collect()),
            _ => {
                return Err(VisionError::CameraUnavailable(format!(
                    "unsupported pixel format {}",
                    self.fourcc
                )))
            }
        };

        buf.and_then(|b| RgbImage::from_raw(self.width, self.height, b))
            .ok_or_else(|| {
                VisionError::CameraUnavailable(format!(
                    "short {} buffer: {} bytes for {}x{}",
                    self.fourcc,
                    data.len(),
                    self.width,
                    self.height
                ))
            })
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> VisionResult<Option<RgbImage>> {
        self.frame().map(Some)
    }
}

fn yuyv_to_rgb(data: &[u8], pixels: usize) -> Option<Vec<u8>> {
    let data = data.get(..pixels * 2)?;
    let mut out = Vec::with_capacity(pixels * 3);
    for chunk in data.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(to_u8(y + 1.402 * v));
            out.push(to_u8(y - 0.344136 * u - 0.714136 * v));
            out.push(to_u8(y + 1.772 * u));
        }
    }
    Some(out)
}

fn to_u8(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_grey_level_maps_to_grey() {
        let data = [100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&data, 2).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn short_yuyv_buffer() {
        assert!(yuyv_to_rgb(&[1, 2, 3], 2).is_none());
    }
}
