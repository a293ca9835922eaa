//! Frame type: grayscale image plus the id the caller tagged it with.

use crate::detection::BoundingBox;
use image::GrayImage;
use std::path::Path;

/// A grayscale frame pushed into a tracking stream.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Caller-assigned id, echoed back in every callback for this frame.
    pub id: u64,
    pub image: GrayImage,
}

impl Frame {
    pub fn new(id: u64, image: GrayImage) -> Self {
        Self { id, image }
    }

    /// Wrap raw grayscale bytes (`width * height`, row-major).
    pub fn from_gray(id: u64, data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        let actual = data.len();
        let image = GrayImage::from_raw(width, height, data)
            .ok_or(FrameError::InvalidLength { expected, actual })?;
        Ok(Self { id, image })
    }

    /// Build a frame from packed YUYV (4:2:2) by keeping the Y channel.
    pub fn from_yuyv(id: u64, yuyv: &[u8], width: u32, height: u32) -> Result<Self, FrameError> {
        let gray = yuyv_to_grayscale(yuyv, width, height)?;
        Self::from_gray(id, gray, width, height)
    }

    /// Decode an image file and convert it to grayscale.
    pub fn open(id: u64, path: &Path) -> Result<Self, FrameError> {
        let image = image::open(path)?.to_luma8();
        Ok(Self { id, image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Average pixel brightness (0.0 to 255.0).
    pub fn avg_brightness(&self) -> f32 {
        let data = self.image.as_raw();
        if data.is_empty() {
            return 0.0;
        }
        data.iter().map(|&b| b as f32).sum::<f32>() / data.len() as f32
    }

    /// Copy the region under `rect`, grown by `padding` times its size on
    /// each side and clipped to the frame. `None` if nothing is left.
    pub fn crop(&self, rect: &BoundingBox, padding: f32) -> Option<GrayImage> {
        let padded = rect.padded(padding);
        let x0 = padded.x.max(0.0).floor();
        let y0 = padded.y.max(0.0).floor();
        let x1 = (padded.x + padded.width).min(self.width() as f32).ceil();
        let y1 = (padded.y + padded.height).min(self.height() as f32).ceil();
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        let (x, y) = (x0 as u32, y0 as u32);
        let width = (x1 as u32).min(self.width()).saturating_sub(x);
        let height = (y1 as u32).min(self.height()).saturating_sub(y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(image::imageops::crop_imm(&self.image, x, y, width, height).to_image())
    }
}

/// YUYV packs two pixels per 4 bytes: `[Y0, U, Y1, V]`.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let data = (0..width * height).map(|i| (i % 256) as u8).collect();
        Frame::from_gray(1, data, width, height).unwrap()
    }

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let gray = yuyv_to_grayscale(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_from_yuyv_builds_frame() {
        let yuyv: Vec<u8> = (0..16).collect();
        let frame = Frame::from_yuyv(3, &yuyv, 4, 2).unwrap();
        assert_eq!(frame.image.as_raw(), &vec![0, 2, 4, 6, 8, 10, 12, 14]);
        assert_eq!(frame.id, 3);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_from_gray_rejects_short_buffer() {
        let err = Frame::from_gray(0, vec![0; 5], 3, 2).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 6, actual: 5 }));
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame::from_gray(0, vec![100, 200], 2, 1).unwrap();
        assert!((frame.avg_brightness() - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_crop_inside() {
        let frame = gradient(32, 32);
        let rect = BoundingBox::new(4.0, 4.0, 8.0, 10.0);
        let crop = frame.crop(&rect, 0.0).unwrap();
        assert_eq!(crop.dimensions(), (8, 10));
        assert_eq!(crop.get_pixel(0, 0)[0], frame.image.get_pixel(4, 4)[0]);
    }

    #[test]
    fn test_crop_padding_clipped_to_frame() {
        let frame = gradient(32, 32);
        let rect = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let crop = frame.crop(&rect, 0.5).unwrap();
        assert_eq!(crop.dimensions(), (15, 15));
    }

    #[test]
    fn test_crop_outside_is_none() {
        let frame = gradient(16, 16);
        let rect = BoundingBox::new(40.0, 40.0, 5.0, 5.0);
        assert!(frame.crop(&rect, 0.0).is_none());
    }
}
