//! Subject extraction: locate and cut out the single region an embedding is
//! computed from.
//!
//! Query portraits go through [`extract_face`], catalog photos through
//! [`extract_center_square`]. Both return `None` instead of an error when the
//! source cannot be decoded or holds no usable region, so one bad file never
//! aborts a batch. A detector that fails outright is an error, not an absent
//! face.

use std::error::Error;
use std::fmt;
use std::path::Path;

use image::{DynamicImage, GenericImageView, GrayImage};

/// Axis-aligned box reported by a face detector, in source pixel coordinates.
///
/// Detectors may report boxes that overhang the frame; the extractor clips
/// them before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersects the box with a `frame_width` x `frame_height` frame.
    ///
    /// Returns `(x, y, width, height)` of the visible part, or `None` when
    /// nothing of the box lies inside the frame.
    pub fn clip_to(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let left = i64::from(self.x).max(0);
        let top = i64::from(self.y).max(0);
        let right = (i64::from(self.x) + i64::from(self.width)).min(i64::from(frame_width));
        let bottom = (i64::from(self.y) + i64::from(self.height)).min(i64::from(frame_height));
        if right <= left || bottom <= top {
            return None;
        }

        Some((
            u32::try_from(left).ok()?,
            u32::try_from(top).ok()?,
            u32::try_from(right - left).ok()?,
            u32::try_from(bottom - top).ok()?,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    /// The detector model could not be loaded or its worker is gone.
    Unavailable(String),
    Backend(String),
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "face detector unavailable: {message}"),
            Self::Backend(message) => write!(f, "face detector failed: {message}"),
        }
    }
}

impl Error for DetectError {}

/// A face-region detector over grayscale input.
///
/// Implementations must use fixed sensitivity parameters so that the same
/// frame always yields the same boxes in the same order.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>, DetectError>;
}

/// A square-ish region cut out of a source image.
#[derive(Debug, Clone)]
pub struct Crop {
    image: DynamicImage,
}

impl Crop {
    pub fn from_image(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    pub fn width(&self) -> u32 {
        self.image.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.image.dimensions().1
    }
}

/// Decodes an in-memory image, logging and discarding decode failures.
pub fn decode_image(bytes: &[u8]) -> Option<DynamicImage> {
    match image::load_from_memory(bytes) {
        Ok(image) => Some(image),
        Err(error) => {
            tracing::debug!(%error, len = bytes.len(), "failed to decode uploaded image");
            None
        }
    }
}

/// Opens an image file, logging and discarding I/O and decode failures.
pub fn open_image(path: &Path) -> Option<DynamicImage> {
    match image::open(path) {
        Ok(image) => Some(image),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "failed to open image");
            None
        }
    }
}

/// Crops the first face the detector reports.
///
/// The first box wins when several are found; this is a fixed tie-break, not
/// a quality ranking. The crop is the detector's box clipped to the frame,
/// converted to 8-bit RGB. `Ok(None)` means the frame holds no usable face.
pub fn extract_face(
    image: &DynamicImage,
    detector: &dyn FaceDetector,
) -> Result<Option<Crop>, DetectError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Ok(None);
    }

    let gray = image.to_luma8();
    let faces = detector.detect(&gray)?;

    let Some(first) = faces.first() else {
        tracing::debug!(width, height, "no face found");
        return Ok(None);
    };
    let Some((x, y, crop_width, crop_height)) = first.clip_to(width, height) else {
        return Ok(None);
    };
    tracing::debug!(
        faces = faces.len(),
        x,
        y,
        width = crop_width,
        height = crop_height,
        "face selected"
    );

    let face = image.crop_imm(x, y, crop_width, crop_height).to_rgb8();
    Ok(Some(Crop::from_image(DynamicImage::ImageRgb8(face))))
}

/// Decodes `bytes` and crops the first detected face. Undecodable bytes are
/// an absent crop.
pub fn extract_face_from_bytes(
    bytes: &[u8],
    detector: &dyn FaceDetector,
) -> Result<Option<Crop>, DetectError> {
    match decode_image(bytes) {
        Some(image) => extract_face(&image, detector),
        None => Ok(None),
    }
}

/// Crops the centered square of side `min(width, height)`.
///
/// Odd margins put the extra pixel on the right/bottom.
pub fn extract_center_square(image: &DynamicImage) -> Option<Crop> {
    let (width, height) = image.dimensions();
    let side = width.min(height);
    if side == 0 {
        return None;
    }

    let left = (width - side) / 2;
    let top = (height - side) / 2;
    Some(Crop::from_image(image.crop_imm(left, top, side, side)))
}

/// Opens `path` and crops its centered square.
pub fn extract_center_square_from_path(path: &Path) -> Option<Crop> {
    let image = open_image(path)?;
    extract_center_square(&image)
}
