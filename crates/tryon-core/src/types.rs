use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One face-mesh landmark in source-frame pixel coordinates.
///
/// `id` indexes the fixed face-mesh topology; its meaning is stable for a
/// given model version.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub z: Option<f32>,
}

impl LandmarkPoint {
    pub fn new(id: u32, x: f32, y: f32) -> Self {
        Self { id, x, y, z: None }
    }

    /// Planar distance to another landmark.
    pub fn distance(&self, other: &LandmarkPoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned face rectangle in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, width: f32, height: f32) -> Self {
        Self {
            x_min,
            y_min,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x_min + self.width / 2.0, self.y_min + self.height / 2.0)
    }

    pub fn x_max(&self) -> f32 {
        self.x_min + self.width
    }

    pub fn y_max(&self) -> f32 {
        self.y_min + self.height
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LandmarkError {
    #[error("duplicate landmark id {0}")]
    DuplicateId(u32),
}

/// The landmarks of one detected face, produced by a single detection call.
///
/// Immutable once built; a newer detection supersedes it rather than
/// mutating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: Vec<LandmarkPoint>,
    confidence: f32,
    bounding_box: BoundingBox,
}

impl LandmarkSet {
    /// Build a landmark set. Ids must be unique; confidence is clamped to [0, 1].
    pub fn new(
        points: Vec<LandmarkPoint>,
        confidence: f32,
        bounding_box: BoundingBox,
    ) -> Result<Self, LandmarkError> {
        let mut seen: Vec<u32> = points.iter().map(|p| p.id).collect();
        seen.sort_unstable();
        if let Some(pair) = seen.windows(2).find(|w| w[0] == w[1]) {
            return Err(LandmarkError::DuplicateId(pair[0]));
        }

        Ok(Self {
            points,
            confidence: confidence.clamp(0.0, 1.0),
            bounding_box,
        })
    }

    pub fn points(&self) -> &[LandmarkPoint] {
        &self.points
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Look up a landmark by topology id.
    ///
    /// Mesh output is stored in id order, so the direct index is tried first.
    pub fn get(&self, id: u32) -> Option<&LandmarkPoint> {
        match self.points.get(id as usize) {
            Some(p) if p.id == id => Some(p),
            _ => self.points.iter().find(|p| p.id == id),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ColorError {
    #[error("invalid hex color {0:?} (expected #rrggbb)")]
    InvalidHex(String),
}

/// 8-bit sRGB color, serialized as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn from_hex(hex: &str) -> Result<Self, ColorError> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ColorError::InvalidHex(hex.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| ColorError::InvalidHex(hex.to_string()))
        };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Channels scaled to [0, 1].
    pub fn to_unit(&self) -> [f32; 3] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        ]
    }

    /// HSL hue in degrees [0, 360). Grays report 0.
    pub fn hue_degrees(&self) -> f32 {
        let [r, g, b] = self.to_unit();
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;
        if delta <= f32::EPSILON {
            return 0.0;
        }
        let hue = if max == r {
            60.0 * (((g - b) / delta) % 6.0)
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        if hue < 0.0 {
            hue + 360.0
        } else {
            hue
        }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Rgb {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for Rgb {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_hex()
    }
}

/// How the live preview is presented to the user.
///
/// All landmark and overlay geometry lives in source-frame space; this value
/// is the single place where the display flip is decided, and every stage
/// that converts between display and source space reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presentation {
    Natural,
    /// Horizontally flipped "selfie view".
    #[default]
    Mirrored,
}

impl Presentation {
    pub fn is_mirrored(self) -> bool {
        matches!(self, Presentation::Mirrored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_set_rejects_duplicate_ids() {
        let points = vec![LandmarkPoint::new(1, 0.0, 0.0), LandmarkPoint::new(1, 5.0, 5.0)];
        let err = LandmarkSet::new(points, 0.9, BoundingBox::new(0.0, 0.0, 1.0, 1.0)).unwrap_err();
        assert_eq!(err, LandmarkError::DuplicateId(1));
    }

    #[test]
    fn test_landmark_lookup_out_of_order() {
        let points = vec![LandmarkPoint::new(7, 1.0, 2.0), LandmarkPoint::new(0, 3.0, 4.0)];
        let set = LandmarkSet::new(points, 1.5, BoundingBox::new(0.0, 0.0, 1.0, 1.0)).unwrap();
        assert_eq!(set.get(7).map(|p| p.x), Some(1.0));
        assert_eq!(set.get(0).map(|p| p.y), Some(4.0));
        assert!(set.get(3).is_none());
        assert_eq!(set.confidence(), 1.0);
    }

    #[test]
    fn test_rgb_hex_parse() {
        let c = Rgb::from_hex("#C2185B").unwrap();
        assert_eq!(c, Rgb::new(0xc2, 0x18, 0x5b));
        assert_eq!(c.to_hex(), "#c2185b");
        assert!(Rgb::from_hex("#12345").is_err());
        assert!(Rgb::from_hex("zzzzzz").is_err());
    }

    #[test]
    fn test_rgb_hue() {
        assert!((Rgb::new(255, 0, 0).hue_degrees() - 0.0).abs() < 1e-3);
        assert!((Rgb::new(0, 255, 0).hue_degrees() - 120.0).abs() < 1e-3);
        assert!((Rgb::new(0, 0, 255).hue_degrees() - 240.0).abs() < 1e-3);
        assert!((Rgb::new(255, 0, 255).hue_degrees() - 300.0).abs() < 1e-3);
        assert_eq!(Rgb::new(90, 90, 90).hue_degrees(), 0.0);
    }

    #[test]
    fn test_rgb_serde_as_hex() {
        let json = serde_json::to_string(&Rgb::new(1, 2, 3)).unwrap();
        assert_eq!(json, "\"#010203\"");
        let back: Rgb = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Rgb::new(1, 2, 3));
    }
}
