//! Accessory placement engine.
//!
//! A hairstyle (or similar) asset is placed relative to the detected face
//! box with fixed empirical multipliers, adjusted by a user transform, and
//! drawn onto the overlay surface.

use crate::compositor::source_over;
use crate::types::{BoundingBox, Presentation, Rgb};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Smallest scale a zoom can reach.
pub const MIN_SCALE: f32 = 0.1;

/// Multipliers mapping the face box to the accessory rectangle.
///
/// The defaults put a wig above and wider than the face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementConstants {
    pub width_scale: f32,
    pub left_offset: f32,
    pub top_offset: f32,
    pub height_scale: f32,
}

impl Default for PlacementConstants {
    fn default() -> Self {
        Self {
            width_scale: 2.2,
            left_offset: 0.6,
            top_offset: 0.5,
            height_scale: 2.5,
        }
    }
}

/// Base accessory rectangle in percent of the container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccessoryPlacement {
    pub left_pct: f32,
    pub top_pct: f32,
    pub width_pct: f32,
    pub height_pct: f32,
}

/// A rectangle in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PixelRect {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

impl AccessoryPlacement {
    /// Compute the base placement from a face box inside a container of
    /// `container_width` × `container_height` pixels.
    pub fn from_face_box(
        face: &BoundingBox,
        container_width: u32,
        container_height: u32,
        constants: &PlacementConstants,
    ) -> Option<Self> {
        if container_width == 0 || container_height == 0 {
            return None;
        }
        let (cw, ch) = (container_width as f32, container_height as f32);
        let face_left = face.x_min / cw * 100.0;
        let face_top = face.y_min / ch * 100.0;
        let face_width = face.width / cw * 100.0;
        let face_height = face.height / ch * 100.0;

        Some(Self {
            left_pct: face_left - face_width * constants.left_offset,
            top_pct: face_top - face_height * constants.top_offset,
            width_pct: face_width * constants.width_scale,
            height_pct: face_height * constants.height_scale,
        })
    }

    pub fn to_pixels(&self, container_width: u32, container_height: u32) -> PixelRect {
        let (cw, ch) = (container_width as f32, container_height as f32);
        PixelRect {
            x: self.left_pct / 100.0 * cw,
            y: self.top_pct / 100.0 * ch,
            width: self.width_pct / 100.0 * cw,
            height: self.height_pct / 100.0 * ch,
        }
    }
}

/// User adjustment applied on top of the base placement.
///
/// Translation is in pixels and rotation in degrees, both as the user sees
/// them in the preview.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayTransform {
    pub translate_x: f32,
    pub translate_y: f32,
    pub scale: f32,
    pub rotate_degrees: f32,
}

impl Default for OverlayTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl OverlayTransform {
    pub const IDENTITY: OverlayTransform = OverlayTransform {
        translate_x: 0.0,
        translate_y: 0.0,
        scale: 1.0,
        rotate_degrees: 0.0,
    };

    pub fn nudge(&mut self, dx: f32, dy: f32) {
        self.translate_x += dx;
        self.translate_y += dy;
    }

    pub fn zoom(&mut self, delta: f32) {
        self.scale = (self.scale + delta).max(MIN_SCALE);
    }

    pub fn rotate(&mut self, degrees: f32) {
        self.rotate_degrees = (self.rotate_degrees + degrees) % 360.0;
    }

    pub fn reset(&mut self) {
        *self = Self::IDENTITY;
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Convert a display-space transform into source-frame space.
    ///
    /// A mirrored preview flips horizontal motion and rotation direction.
    pub fn to_source_space(&self, presentation: Presentation) -> OverlayTransform {
        if presentation.is_mirrored() {
            OverlayTransform {
                translate_x: -self.translate_x,
                rotate_degrees: -self.rotate_degrees,
                ..*self
            }
        } else {
            *self
        }
    }

    /// Map a point of the untransformed rectangle to the surface.
    pub fn apply(&self, rect: &PixelRect, point: (f32, f32)) -> (f32, f32) {
        let (cx, cy) = rect.center();
        let (sin, cos) = self.rotate_degrees.to_radians().sin_cos();
        let (dx, dy) = ((point.0 - cx) * self.scale, (point.1 - cy) * self.scale);
        (
            cx + dx * cos - dy * sin + self.translate_x,
            cy + dx * sin + dy * cos + self.translate_y,
        )
    }

    /// Inverse of [`apply`](Self::apply).
    pub fn invert(&self, rect: &PixelRect, point: (f32, f32)) -> (f32, f32) {
        let (cx, cy) = rect.center();
        let (sin, cos) = self.rotate_degrees.to_radians().sin_cos();
        let scale = self.scale.max(MIN_SCALE);
        let (dx, dy) = (point.0 - self.translate_x - cx, point.1 - self.translate_y - cy);
        (
            cx + (dx * cos + dy * sin) / scale,
            cy + (-dx * sin + dy * cos) / scale,
        )
    }
}

/// Approximate accessory recoloring as a CSS-style filter chain:
/// `hue-rotate`, then `saturate`, then `brightness`.
///
/// There is no per-pixel hair mask, so every opaque pixel of the asset is
/// shifted the same way. This is a tint, not a pixel-accurate recolor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecolorFilter {
    pub hue_rotate_degrees: f32,
    pub saturate: f32,
    pub brightness: f32,
}

impl RecolorFilter {
    pub const NONE: RecolorFilter = RecolorFilter {
        hue_rotate_degrees: 0.0,
        saturate: 1.0,
        brightness: 1.0,
    };

    /// Filter chain derived from a target hex color.
    pub fn for_color(target: Rgb) -> Self {
        Self {
            hue_rotate_degrees: target.hue_degrees(),
            saturate: 0.8,
            brightness: 1.05,
        }
    }

    /// The combined 3×3 color matrix (row-major).
    pub fn matrix(&self) -> [[f32; 3]; 3] {
        let hue = hue_rotate_matrix(self.hue_rotate_degrees);
        let sat = saturate_matrix(self.saturate);
        let mut m = mat_mul(&sat, &hue);
        for row in m.iter_mut() {
            for v in row.iter_mut() {
                *v *= self.brightness;
            }
        }
        m
    }

    /// Apply the chain to every pixel; alpha is left untouched.
    pub fn apply(&self, asset: &RgbaImage) -> RgbaImage {
        let m = self.matrix();
        let mut out = asset.clone();
        for px in out.pixels_mut() {
            if px[3] == 0 {
                continue;
            }
            let rgb = [px[0] as f32, px[1] as f32, px[2] as f32];
            for (c, row) in m.iter().enumerate() {
                let v = row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2];
                px[c] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
        out
    }
}

fn hue_rotate_matrix(degrees: f32) -> [[f32; 3]; 3] {
    let (sin, cos) = degrees.to_radians().sin_cos();
    [
        [
            0.213 + cos * 0.787 - sin * 0.213,
            0.715 - cos * 0.715 - sin * 0.715,
            0.072 - cos * 0.072 + sin * 0.928,
        ],
        [
            0.213 - cos * 0.213 + sin * 0.143,
            0.715 + cos * 0.285 + sin * 0.140,
            0.072 - cos * 0.072 - sin * 0.283,
        ],
        [
            0.213 - cos * 0.213 - sin * 0.787,
            0.715 - cos * 0.715 + sin * 0.715,
            0.072 + cos * 0.928 + sin * 0.072,
        ],
    ]
}

fn saturate_matrix(s: f32) -> [[f32; 3]; 3] {
    [
        [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
    ]
}

fn mat_mul(a: &[[f32; 3]; 3], b: &[[f32; 3]; 3]) -> [[f32; 3]; 3] {
    let mut out = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Draw `asset` stretched over `rect`, transformed, onto `surface`.
///
/// `transform` must already be in source-frame space. Output pixels are
/// inverse-mapped into the asset and sampled bilinearly.
pub fn draw_accessory(
    surface: &mut RgbaImage,
    asset: &RgbaImage,
    rect: &PixelRect,
    transform: &OverlayTransform,
) {
    let (sw, sh) = surface.dimensions();
    let (aw, ah) = asset.dimensions();
    if aw == 0 || ah == 0 || rect.width <= 0.0 || rect.height <= 0.0 {
        return;
    }

    let corners = [
        (rect.x, rect.y),
        (rect.x + rect.width, rect.y),
        (rect.x, rect.y + rect.height),
        (rect.x + rect.width, rect.y + rect.height),
    ]
    .map(|p| transform.apply(rect, p));
    let min_x = corners.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let max_x = corners.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let min_y = corners.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let max_y = corners.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

    let x0 = min_x.floor().max(0.0) as u32;
    let y0 = min_y.floor().max(0.0) as u32;
    let x1 = (max_x.ceil().max(0.0) as u32).min(sw);
    let y1 = (max_y.ceil().max(0.0) as u32).min(sh);

    let u_scale = aw as f32 / rect.width;
    let v_scale = ah as f32 / rect.height;

    for y in y0..y1 {
        for x in x0..x1 {
            let (px, py) = transform.invert(rect, (x as f32 + 0.5, y as f32 + 0.5));
            let u = (px - rect.x) * u_scale - 0.5;
            let v = (py - rect.y) * v_scale - 0.5;
            let Some(sample) = sample_bilinear(asset, u, v) else {
                continue;
            };
            if sample[3] == 0 {
                continue;
            }
            let color = [
                sample[0] as f32 / 255.0,
                sample[1] as f32 / 255.0,
                sample[2] as f32 / 255.0,
            ];
            let dst = surface.get_pixel_mut(x, y);
            *dst = source_over(*dst, color, sample[3] as f32 / 255.0);
        }
    }
}

/// Bilinear RGBA sample; `None` outside the asset.
fn sample_bilinear(img: &RgbaImage, u: f32, v: f32) -> Option<Rgba<u8>> {
    let (w, h) = img.dimensions();
    if u < -0.5 || v < -0.5 || u > w as f32 - 0.5 || v > h as f32 - 0.5 {
        return None;
    }
    let x0 = u.floor();
    let y0 = v.floor();
    let fx = u - x0;
    let fy = v - y0;

    let at = |x: f32, y: f32| -> [f32; 4] {
        let xi = (x.max(0.0) as u32).min(w - 1);
        let yi = (y.max(0.0) as u32).min(h - 1);
        img.get_pixel(xi, yi).0.map(|c| c as f32)
    };
    let tl = at(x0, y0);
    let tr = at(x0 + 1.0, y0);
    let bl = at(x0, y0 + 1.0);
    let br = at(x0 + 1.0, y0 + 1.0);

    let mut out = [0u8; 4];
    for c in 0..4 {
        let val = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
        out[c] = val.round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgba(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_base_placement_multipliers() {
        // 100x100 face at (200, 100) in a 1000x500 container:
        // face box = left 20%, top 20%, width 10%, height 20%
        let face = BoundingBox::new(200.0, 100.0, 100.0, 100.0);
        let p = AccessoryPlacement::from_face_box(&face, 1000, 500, &PlacementConstants::default())
            .unwrap();
        assert!(approx(p.width_pct, 22.0), "width {}", p.width_pct);
        assert!(approx(p.left_pct, 14.0), "left {}", p.left_pct);
        assert!(approx(p.top_pct, 10.0), "top {}", p.top_pct);
        assert!(approx(p.height_pct, 50.0), "height {}", p.height_pct);

        let rect = p.to_pixels(1000, 500);
        assert!(approx(rect.x, 140.0) && approx(rect.y, 50.0));
        assert!(approx(rect.width, 220.0) && approx(rect.height, 250.0));
    }

    #[test]
    fn test_zero_container_has_no_placement() {
        let face = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(AccessoryPlacement::from_face_box(&face, 0, 480, &PlacementConstants::default()).is_none());
    }

    #[test]
    fn test_transform_accumulates_and_resets() {
        let mut t = OverlayTransform::default();
        t.nudge(5.0, -3.0);
        t.nudge(5.0, 1.0);
        t.zoom(0.2);
        t.rotate(15.0);
        t.rotate(-5.0);
        assert!(approx(t.translate_x, 10.0) && approx(t.translate_y, -2.0));
        assert!(approx(t.scale, 1.2));
        assert!(approx(t.rotate_degrees, 10.0));

        t.zoom(-5.0);
        assert!(approx(t.scale, MIN_SCALE));

        t.reset();
        assert!(t.is_identity());
    }

    #[test]
    fn test_apply_invert_roundtrip() {
        let rect = PixelRect { x: 10.0, y: 20.0, width: 100.0, height: 80.0 };
        let t = OverlayTransform {
            translate_x: 7.0,
            translate_y: -4.0,
            scale: 1.3,
            rotate_degrees: 25.0,
        };
        let p = (35.0, 70.0);
        let q = t.apply(&rect, p);
        let back = t.invert(&rect, q);
        assert!(approx(back.0, p.0) && approx(back.1, p.1), "{back:?}");
    }

    #[test]
    fn test_mirrored_transform_flips_horizontal() {
        let t = OverlayTransform {
            translate_x: 12.0,
            translate_y: 3.0,
            scale: 1.1,
            rotate_degrees: 8.0,
        };
        let src = t.to_source_space(Presentation::Mirrored);
        assert_eq!(src.translate_x, -12.0);
        assert_eq!(src.translate_y, 3.0);
        assert_eq!(src.rotate_degrees, -8.0);
        assert_eq!(t.to_source_space(Presentation::Natural), t);
    }

    #[test]
    fn test_recolor_identity_and_gray() {
        let m = RecolorFilter::NONE.matrix();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((m[i][j] - expected).abs() < 1e-3, "m[{i}][{j}] = {}", m[i][j]);
            }
        }

        // Rows of hue-rotate and saturate sum to one, so grays only scale by brightness.
        let asset = RgbaImage::from_pixel(2, 2, Rgba([100, 100, 100, 255]));
        let out = RecolorFilter::for_color(Rgb::new(120, 60, 30)).apply(&asset);
        let px = out.get_pixel(0, 0);
        assert!((px[0] as i32 - 105).abs() <= 1 && (px[1] as i32 - 105).abs() <= 1);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn test_draw_accessory_covers_rect() {
        let mut surface = RgbaImage::new(100, 100);
        let asset = RgbaImage::from_pixel(4, 4, Rgba([10, 200, 30, 255]));
        let rect = PixelRect { x: 20.0, y: 30.0, width: 40.0, height: 20.0 };
        draw_accessory(&mut surface, &asset, &rect, &OverlayTransform::IDENTITY);

        assert_eq!(*surface.get_pixel(40, 40), Rgba([10, 200, 30, 255]));
        assert_eq!(surface.get_pixel(10, 10)[3], 0);
        assert_eq!(surface.get_pixel(70, 40)[3], 0);
    }

    #[test]
    fn test_draw_accessory_translated() {
        let mut surface = RgbaImage::new(100, 100);
        let asset = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let rect = PixelRect { x: 0.0, y: 0.0, width: 20.0, height: 20.0 };
        let t = OverlayTransform { translate_x: 50.0, ..OverlayTransform::IDENTITY };
        draw_accessory(&mut surface, &asset, &rect, &t);

        assert_eq!(surface.get_pixel(5, 5)[3], 0);
        assert_eq!(surface.get_pixel(60, 10)[3], 255);
    }
}
