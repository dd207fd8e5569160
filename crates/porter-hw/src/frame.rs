//! Frame intake and still-image handling.
//!
//! Frames arrive as stills written by the external recorder. The engine
//! only ever reads the newest one; a still that has not changed since the
//! previous read is not handed out twice.

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::path::PathBuf;
use std::time::SystemTime;
use thiserror::Error;

const STILL_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to read frame {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(image::ImageError),
    #[error("crop region is empty")]
    EmptyCrop,
}

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    /// True if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
    pub fn is_dark(&self, threshold_pct: f32) -> bool {
        let n = self.pixel_count();
        if n == 0 {
            return true;
        }
        let dark_count = self.image.pixels().filter(|p| luma(p.0) < 32).count();
        (dark_count as f32 / n as f32) > threshold_pct
    }

    /// Crop a region grown by `pad` pixels on each side, clamped to the frame.
    pub fn crop_padded(&self, x: u32, y: u32, width: u32, height: u32, pad: u32) -> Result<RgbImage, FrameError> {
        let left = x.saturating_sub(pad);
        let top = y.saturating_sub(pad);
        let right = x.saturating_add(width).saturating_add(pad).min(self.width());
        let bottom = y.saturating_add(height).saturating_add(pad).min(self.height());

        if right <= left || bottom <= top {
            return Err(FrameError::EmptyCrop);
        }
        Ok(image::imageops::crop_imm(&self.image, left, top, right - left, bottom - top).to_image())
    }
}

/// BT.601 luma of an RGB pixel.
fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

/// JPEG-encode an RGB image.
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, STILL_JPEG_QUALITY)
        .encode_image(image)
        .map_err(FrameError::Encode)?;
    Ok(buf)
}

/// Decode an encoded still (any format `image` understands) to RGB.
pub fn decode_still(bytes: &[u8]) -> Result<RgbImage, FrameError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(FrameError::Decode)
}

/// Anything that can hand the engine its next frame.
pub trait FrameSource: Send {
    /// `Ok(None)` means no new frame is available right now.
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError>;
}

/// Reads the newest still the recorder left at a fixed path.
pub struct SnapshotSource {
    path: PathBuf,
    last_seen: Option<SystemTime>,
    sequence: u64,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_seen: None,
            sequence: 0,
        }
    }
}

impl FrameSource for SnapshotSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(FrameError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if self.last_seen == Some(modified) {
            return Ok(None);
        }

        let bytes = std::fs::read(&self.path).map_err(|source| FrameError::Read {
            path: self.path.clone(),
            source,
        })?;
        let image = decode_still(&bytes)?;

        self.last_seen = Some(modified);
        self.sequence += 1;
        tracing::trace!(seq = self.sequence, width = image.width(), height = image.height(), "frame read");
        Ok(Some(Frame {
            image,
            sequence: self.sequence,
        }))
    }
}
