//! Cosmetic region compositor.
//!
//! Paints makeup layers onto a transparent RGBA render surface. Each region
//! path is rasterized into a coverage mask, softened with a gaussian blur,
//! and then filled with the layer color blended against the live frame, so
//! the surface can later be laid over the frame with plain source-over.

use crate::regions::{build_region_paths, Region, RegionPath};
use crate::types::{LandmarkSet, Rgb};
use image::{GrayImage, Luma, Rgba, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vertical sub-scanlines per pixel row when rasterizing paths.
const SUBSAMPLES: u32 = 4;
/// Mask margin, in blur radii, kept around a path so softening is not clipped.
const BLUR_MARGIN: f32 = 3.0;

/// Pixel-combination rule between a layer color and the frame underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Overlay,
}

impl BlendMode {
    /// Blend one channel; `backdrop` and `source` in [0, 1].
    pub fn blend(self, backdrop: f32, source: f32) -> f32 {
        match self {
            BlendMode::Normal => source,
            BlendMode::Multiply => backdrop * source,
            BlendMode::Overlay => {
                if backdrop <= 0.5 {
                    2.0 * backdrop * source
                } else {
                    1.0 - 2.0 * (1.0 - backdrop) * (1.0 - source)
                }
            }
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Overlay => "overlay",
        })
    }
}

impl FromStr for BlendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(BlendMode::Normal),
            "multiply" => Ok(BlendMode::Multiply),
            "overlay" => Ok(BlendMode::Overlay),
            other => Err(format!("unknown blend mode: {other}")),
        }
    }
}

/// User-selected makeup for one region. `color: None` is the natural look.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MakeupLayer {
    pub region: Region,
    pub color: Option<Rgb>,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub soften_radius: f32,
}

impl MakeupLayer {
    pub fn new(region: Region, color: Rgb) -> Self {
        Self {
            region,
            color: Some(color),
            opacity: 0.6,
            blend_mode: BlendMode::Multiply,
            soften_radius: 1.5,
        }
    }

    /// Same layer without a color: the region paints nothing.
    pub fn natural(region: Region) -> Self {
        Self {
            color: None,
            ..Self::new(region, Rgb::new(0, 0, 0))
        }
    }

    fn is_visible(&self) -> bool {
        self.color.is_some() && self.opacity > 0.0
    }
}

/// A fully transparent render surface.
pub fn new_surface(width: u32, height: u32) -> RgbaImage {
    RgbaImage::new(width, height)
}

/// Paint every visible layer for the given face onto `surface`.
///
/// `frame` supplies the backdrop for multiply and overlay blending and must
/// match the surface size; a mismatched frame falls back to normal blending.
pub fn paint_layers(
    surface: &mut RgbaImage,
    frame: &RgbImage,
    face: &LandmarkSet,
    layers: &[MakeupLayer],
) {
    let backdrop = (frame.dimensions() == surface.dimensions()).then_some(frame);

    for layer in layers.iter().filter(|l| l.is_visible()) {
        // Upper and lower paths of one region are painted in topology order.
        for path in build_region_paths(face, layer.region) {
            paint_path(surface, backdrop, &path, layer);
        }
    }
}

/// Rasterize, soften and fill one path.
pub fn paint_path(
    surface: &mut RgbaImage,
    backdrop: Option<&RgbImage>,
    path: &RegionPath,
    layer: &MakeupLayer,
) {
    let Some(color) = layer.color else {
        return;
    };
    let Some((min_x, min_y, max_x, max_y)) = path.bounds() else {
        return;
    };

    let (width, height) = surface.dimensions();
    let margin = (layer.soften_radius.max(0.0) * BLUR_MARGIN).ceil() + 1.0;
    let x0 = (min_x - margin).floor().max(0.0) as u32;
    let y0 = (min_y - margin).floor().max(0.0) as u32;
    let x1 = ((max_x + margin).ceil().max(0.0) as u32).min(width);
    let y1 = ((max_y + margin).ceil().max(0.0) as u32).min(height);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let mut mask = fill_mask(path.points(), x0, y0, x1 - x0, y1 - y0);
    if layer.soften_radius > 0.0 {
        mask = image::imageops::blur(&mask, layer.soften_radius);
    }

    let source = color.to_unit();
    let opacity = layer.opacity.clamp(0.0, 1.0);
    let mode = if backdrop.is_some() {
        layer.blend_mode
    } else {
        BlendMode::Normal
    };

    for (mx, my, coverage) in mask.enumerate_pixels() {
        if coverage[0] == 0 {
            continue;
        }
        let (x, y) = (x0 + mx, y0 + my);
        let alpha = opacity * coverage[0] as f32 / 255.0;

        let under = backdrop.map(|f| f.get_pixel(x, y).0).unwrap_or([0, 0, 0]);
        let mut blended = [0.0f32; 3];
        for c in 0..3 {
            blended[c] = mode.blend(under[c] as f32 / 255.0, source[c]).clamp(0.0, 1.0);
        }

        let dst = surface.get_pixel_mut(x, y);
        *dst = source_over(*dst, blended, alpha);
    }
}

/// Scanline fill of a closed polygon (even-odd) into a `w` × `h` mask whose
/// origin sits at (`ox`, `oy`) in surface coordinates.
pub fn fill_mask(points: &[(f32, f32)], ox: u32, oy: u32, w: u32, h: u32) -> GrayImage {
    let mut coverage = vec![0u32; (w * h) as usize];
    let n = points.len();
    let mut crossings: Vec<f32> = Vec::with_capacity(n);

    for row in 0..h {
        for sub in 0..SUBSAMPLES {
            let sy = (oy + row) as f32 + (sub as f32 + 0.5) / SUBSAMPLES as f32;

            crossings.clear();
            for i in 0..n {
                let (ax, ay) = points[i];
                let (bx, by) = points[(i + 1) % n];
                // Half-open rule so shared vertices count once.
                if (ay <= sy && by > sy) || (by <= sy && ay > sy) {
                    let t = (sy - ay) / (by - ay);
                    crossings.push(ax + t * (bx - ax));
                }
            }
            crossings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            for span in crossings.chunks_exact(2) {
                // Pixel centers inside [span0, span1).
                let start = (span[0] - ox as f32 - 0.5).ceil().max(0.0) as u32;
                let end = ((span[1] - ox as f32 - 0.5).ceil().max(0.0) as u32).min(w);
                for x in start..end {
                    coverage[(row * w + x) as usize] += 1;
                }
            }
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let hits = coverage[(y * w + x) as usize];
        Luma([(hits * 255 / SUBSAMPLES) as u8])
    })
}

/// Non-premultiplied source-over of an RGB color with coverage `alpha`.
pub fn source_over(dst: Rgba<u8>, src: [f32; 3], alpha: f32) -> Rgba<u8> {
    let alpha = alpha.clamp(0.0, 1.0);
    let dst_alpha = dst[3] as f32 / 255.0;
    let out_alpha = alpha + dst_alpha * (1.0 - alpha);
    if out_alpha <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let dc = dst[c] as f32 / 255.0;
        let value = (src[c] * alpha + dc * dst_alpha * (1.0 - alpha)) / out_alpha;
        out[c] = (value * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}
