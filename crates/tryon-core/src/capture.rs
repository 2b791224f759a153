//! Still-image capture: merge the video frame and the overlay surface into
//! one image that matches what the user saw, then stamp a watermark.

use crate::compositor::source_over;
use crate::types::Presentation;
use image::{ImageFormat, Rgba, RgbImage, RgbaImage};
use std::io::Cursor;
use thiserror::Error;

/// Watermark distance from the left edge, in pixels.
pub const WATERMARK_OFFSET_X: u32 = 12;
/// Watermark baseline distance from the bottom edge, in pixels.
pub const WATERMARK_OFFSET_Y: u32 = 12;
const WATERMARK_SCALE: u32 = 2;
const WATERMARK_ALPHA: f32 = 0.75;

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no frame available to capture")]
    NoFrame,
    #[error("overlay is {overlay:?} but frame is {frame:?}")]
    SizeMismatch {
        frame: (u32, u32),
        overlay: (u32, u32),
    },
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub presentation: Presentation,
    pub watermark: Option<String>,
}

/// Compose the frame and overlay into an output buffer sized to the frame.
///
/// When the preview is mirrored both layers are drawn flipped, so the export
/// has the orientation the user saw.
pub fn compose_capture(
    frame: &RgbImage,
    overlay: &RgbaImage,
    options: &CaptureOptions,
) -> Result<RgbaImage, CaptureError> {
    if frame.dimensions() != overlay.dimensions() {
        return Err(CaptureError::SizeMismatch {
            frame: frame.dimensions(),
            overlay: overlay.dimensions(),
        });
    }

    let (width, height) = frame.dimensions();
    let mirrored = options.presentation.is_mirrored();
    let source_x = |x: u32| if mirrored { width - 1 - x } else { x };

    let mut out = RgbaImage::from_fn(width, height, |x, y| {
        let p = frame.get_pixel(source_x(x), y);
        Rgba([p[0], p[1], p[2], 255])
    });

    for (x, y, dst) in out.enumerate_pixels_mut() {
        let src = overlay.get_pixel(source_x(x), y);
        if src[3] == 0 {
            continue;
        }
        let color = [
            src[0] as f32 / 255.0,
            src[1] as f32 / 255.0,
            src[2] as f32 / 255.0,
        ];
        *dst = source_over(*dst, color, src[3] as f32 / 255.0);
    }

    if let Some(text) = options.watermark.as_deref() {
        stamp_watermark(&mut out, text);
    }

    Ok(out)
}

/// Lossless PNG encoding of a composed capture.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Draw `text` in white at a fixed offset from the bottom-left corner.
pub fn stamp_watermark(image: &mut RgbaImage, text: &str) {
    let (width, height) = image.dimensions();
    let glyph_h = GLYPH_HEIGHT * WATERMARK_SCALE;
    if height < glyph_h + WATERMARK_OFFSET_Y {
        return;
    }
    let top = height - WATERMARK_OFFSET_Y - glyph_h;
    let advance = (GLYPH_WIDTH + 1) * WATERMARK_SCALE;

    for (i, ch) in text.chars().enumerate() {
        let left = WATERMARK_OFFSET_X + i as u32 * advance;
        if left + GLYPH_WIDTH * WATERMARK_SCALE > width {
            break;
        }
        let rows = glyph(ch);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..WATERMARK_SCALE {
                    for dx in 0..WATERMARK_SCALE {
                        let x = left + col * WATERMARK_SCALE + dx;
                        let y = top + row as u32 * WATERMARK_SCALE + dy;
                        let dst = image.get_pixel_mut(x, y);
                        *dst = source_over(*dst, [1.0, 1.0, 1.0], WATERMARK_ALPHA);
                    }
                }
            }
        }
    }
}

/// 5×7 bitmap rows for a character, most significant of the low five bits
/// on the left. Lowercase renders as uppercase; unknown characters are blank.
fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '&' => [0x0C, 0x12, 0x14, 0x08, 0x15, 0x12, 0x0D],
        '@' => [0x0E, 0x11, 0x01, 0x0D, 0x15, 0x15, 0x0E],
        _ => [0x00; 7],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    fn patch_overlay(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if x < width / 3 && y > height / 2 {
                Rgba([200, 30, 90, 140])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    #[test]
    fn test_mirrored_capture_flips_back_to_natural() {
        let frame = gradient_frame(64, 48);
        let overlay = patch_overlay(64, 48);

        let natural = compose_capture(&frame, &overlay, &CaptureOptions {
            presentation: Presentation::Natural,
            watermark: None,
        })
        .unwrap();
        let mirrored = compose_capture(&frame, &overlay, &CaptureOptions {
            presentation: Presentation::Mirrored,
            watermark: None,
        })
        .unwrap();

        assert_ne!(natural, mirrored);
        let unflipped = image::imageops::flip_horizontal(&mirrored);
        assert_eq!(unflipped, natural);
    }

    #[test]
    fn test_capture_matches_frame_size_and_layers() {
        let frame = gradient_frame(32, 24);
        let overlay = RgbaImage::from_fn(32, 24, |x, _| {
            if x == 0 { Rgba([255, 0, 0, 255]) } else { Rgba([0, 0, 0, 0]) }
        });
        let out = compose_capture(&frame, &overlay, &CaptureOptions {
            presentation: Presentation::Natural,
            watermark: None,
        })
        .unwrap();

        assert_eq!(out.dimensions(), (32, 24));
        assert_eq!(*out.get_pixel(0, 3), Rgba([255, 0, 0, 255]));
        let f = frame.get_pixel(5, 3);
        assert_eq!(*out.get_pixel(5, 3), Rgba([f[0], f[1], f[2], 255]));

        // Mirrored: the overlay's column 0 shows up on the right edge.
        let out = compose_capture(&frame, &overlay, &CaptureOptions {
            presentation: Presentation::Mirrored,
            watermark: None,
        })
        .unwrap();
        assert_eq!(*out.get_pixel(31, 3), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let frame = gradient_frame(32, 24);
        let overlay = RgbaImage::new(16, 16);
        let err = compose_capture(&frame, &overlay, &CaptureOptions::default()).unwrap_err();
        assert!(matches!(err, CaptureError::SizeMismatch { .. }));
    }

    #[test]
    fn test_watermark_bottom_left() {
        let mut img = RgbaImage::from_pixel(200, 100, Rgba([0, 0, 0, 255]));
        stamp_watermark(&mut img, "TRY");

        let top = 100 - WATERMARK_OFFSET_Y - GLYPH_HEIGHT * WATERMARK_SCALE;
        // 'T' top bar starts at the left offset.
        let px = img.get_pixel(WATERMARK_OFFSET_X, top);
        assert!(px[0] > 150, "watermark pixel = {px:?}");
        // Top-left area untouched.
        assert_eq!(*img.get_pixel(5, 5), Rgba([0, 0, 0, 255]));
        // Nothing below the baseline offset.
        assert_eq!(*img.get_pixel(WATERMARK_OFFSET_X, 95), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_png_signature() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let bytes = encode_png(&img).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
