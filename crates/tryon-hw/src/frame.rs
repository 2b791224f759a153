//! Frame type and image processing: YUYV conversion and dark detection.

use image::RgbImage;
use std::sync::Arc;

/// Share of pixels below [`DARK_LUMA`] at which a frame counts as dark.
pub const DARK_THRESHOLD: f32 = 0.95;
/// Luma below which a pixel counts as dark.
pub const DARK_LUMA: u8 = 32;

/// A captured RGB camera frame.
///
/// The pixels sit behind an `Arc` so detection, rendering and capture can
/// share one frame without copying it.
#[derive(Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Wrap an RGB image, classifying it as dark or not.
    pub fn from_rgb(image: RgbImage, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&image, DARK_THRESHOLD);
        Self {
            image: Arc::new(image),
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = (self.image.width() * self.image.height()) as usize;
        if pixels == 0 {
            return 0.0;
        }
        self.image.pixels().map(|p| luma(p.0) as f32).sum::<f32>() / pixels as f32
    }
}

/// BT.601 luma of an RGB pixel.
pub fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

/// Convert packed YUYV (4:2:2) to RGB with BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U and V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (chunk[1], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(chunk[0], u, v));
        rgb.extend_from_slice(&yuv_to_rgb(chunk[2], u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

/// Wrap a packed RGB24 buffer.
pub fn rgb24_to_image(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    RgbImage::from_raw(width, height, buf[..expected].to_vec()).ok_or(FrameError::InvalidLength {
        expected,
        actual: buf.len(),
    })
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clip = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clip(298 * c + 409 * e),
        clip(298 * c - 100 * d - 208 * e),
        clip(298 * c + 516 * d),
    ]
}

/// Check if a frame is dark: true if more than `threshold_pct` of pixels
/// have luma in the darkest bucket (0–31).
pub fn is_dark_frame(image: &RgbImage, threshold_pct: f32) -> bool {
    let total = (image.width() * image.height()) as usize;
    if total == 0 {
        return true;
    }
    let dark_count = image.pixels().filter(|p| luma(p.0) < DARK_LUMA).count();
    (dark_count as f32 / total as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_image(values: &[u8]) -> RgbImage {
        let data: Vec<u8> = values.iter().flat_map(|&v| [v, v, v]).collect();
        RgbImage::from_raw(values.len() as u32, 1, data).unwrap()
    }

    #[test]
    fn test_yuyv_black_and_white() {
        // 2x1 image: [Y0=16, U=128, Y1=235, V=128]
        let rgb = yuyv_to_rgb(&[16, 128, 235, 128], 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_yuyv_red_dominant() {
        // High V pushes red up and green down.
        let rgb = yuyv_to_rgb(&[82, 90, 82, 240], 2, 1).unwrap();
        let [r, g, b] = rgb.get_pixel(0, 0).0;
        assert!(r > 200 && g < 60 && b < 60, "got {r},{g},{b}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let result = yuyv_to_rgb(&[100, 128], 2, 1);
        assert!(matches!(result, Err(FrameError::InvalidLength { expected: 4, actual: 2 })));
    }

    #[test]
    fn test_rgb24_wraps_buffer() {
        let buf: Vec<u8> = (0..12).collect();
        let img = rgb24_to_image(&buf, 2, 2).unwrap();
        assert_eq!(img.get_pixel(1, 1).0, [9, 10, 11]);
        assert!(rgb24_to_image(&buf[..11], 2, 2).is_err());
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&gray_image(&[0u8; 1000]), DARK_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&gray_image(&[128u8; 1000]), DARK_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&RgbImage::new(0, 0), DARK_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_mostly_dark() {
        // 96% dark, 4% bright → should be dark
        let mut values = vec![10u8; 960];
        values.extend(vec![128u8; 40]);
        assert!(is_dark_frame(&gray_image(&values), DARK_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright → should NOT be dark
        let mut values = vec![10u8; 940];
        values.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray_image(&values), DARK_THRESHOLD));
    }

    #[test]
    fn test_frame_from_rgb() {
        let frame = Frame::from_rgb(gray_image(&[200u8; 10]), 7);
        assert_eq!(frame.sequence, 7);
        assert!(!frame.is_dark);
        assert!((frame.avg_brightness() - 199.0).abs() < 1.5);
    }
}
