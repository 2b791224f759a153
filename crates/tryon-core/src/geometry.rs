//! Face geometry from landmark positions: a coarse face-shape bucket and a
//! framing assessment that drives on-screen guidance.

use crate::types::LandmarkSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Forehead top (face-mesh id).
pub const FOREHEAD_TOP: u32 = 10;
/// Chin bottom.
pub const CHIN: u32 = 152;
/// Left cheekbone edge (subject's right, image left).
pub const LEFT_CHEEK: u32 = 234;
/// Right cheekbone edge.
pub const RIGHT_CHEEK: u32 = 454;

/// Ratios strictly above this are oblong.
pub const OBLONG_RATIO: f32 = 1.5;
/// Ratios strictly below this are round.
pub const ROUND_RATIO: f32 = 1.15;

pub const MIN_COVERAGE: f32 = 0.3;
pub const MAX_COVERAGE: f32 = 0.9;
pub const MIN_CENTERING: f32 = 0.6;

pub const MSG_TOO_FAR: &str = "Move closer to the camera";
pub const MSG_TOO_CLOSE: &str = "Move back a little from the camera";
pub const MSG_OFF_CENTER: &str = "Center your face in the frame";
pub const MSG_GOOD: &str = "Face is well positioned";
pub const MSG_NO_FACE: &str = "No face detected, look straight at the camera";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceShape {
    Oval,
    Round,
    Oblong,
}

impl fmt::Display for FaceShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FaceShape::Oval => "oval",
            FaceShape::Round => "round",
            FaceShape::Oblong => "oblong",
        })
    }
}

impl FromStr for FaceShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "oval" => Ok(FaceShape::Oval),
            "round" => Ok(FaceShape::Round),
            "oblong" => Ok(FaceShape::Oblong),
            other => Err(format!("unknown face shape: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingStatus {
    Good,
    Warning,
}

/// Derived, frame-scoped geometry for one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceGeometry {
    pub shape: Option<FaceShape>,
    pub centering_score: f32,
    pub coverage_ratio: f32,
    pub status: FramingStatus,
    pub message: String,
}

impl FaceGeometry {
    /// Guidance shown when the detector returned no face.
    pub fn no_face() -> Self {
        Self {
            shape: None,
            centering_score: 0.0,
            coverage_ratio: 0.0,
            status: FramingStatus::Warning,
            message: MSG_NO_FACE.to_string(),
        }
    }
}

/// Bucket a face-length / cheek-width ratio.
///
/// Exactly 1.5 and exactly 1.15 both fall in `Oval`.
pub fn shape_for_ratio(ratio: f32) -> FaceShape {
    if ratio > OBLONG_RATIO {
        FaceShape::Oblong
    } else if ratio < ROUND_RATIO {
        FaceShape::Round
    } else {
        FaceShape::Oval
    }
}

/// Classify the face shape from four fixed landmarks.
///
/// Returns `None` when one of the landmarks is missing or the cheek width
/// is degenerate.
pub fn classify_shape(landmarks: &LandmarkSet) -> Option<FaceShape> {
    let top = landmarks.get(FOREHEAD_TOP)?;
    let chin = landmarks.get(CHIN)?;
    let left = landmarks.get(LEFT_CHEEK)?;
    let right = landmarks.get(RIGHT_CHEEK)?;

    let face_length = top.distance(chin);
    let cheek_width = left.distance(right);
    if cheek_width <= f32::EPSILON {
        return None;
    }

    Some(shape_for_ratio(face_length / cheek_width))
}

/// Score how well the face is framed inside a `frame_width` × `frame_height` frame.
pub fn assess_framing(landmarks: &LandmarkSet, frame_width: u32, frame_height: u32) -> FaceGeometry {
    let bbox = landmarks.bounding_box();
    let (fw, fh) = (frame_width as f32, frame_height as f32);

    let (cx, cy) = bbox.center();
    let offset = ((cx - fw / 2.0).powi(2) + (cy - fh / 2.0).powi(2)).sqrt();
    let half_diagonal = (fw * fw + fh * fh).sqrt() / 2.0;
    let centering_score = if half_diagonal > 0.0 {
        (1.0 - offset / (half_diagonal * 0.5)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let coverage_ratio = if fh > 0.0 { bbox.height / fh } else { 0.0 };

    let (status, message) = if coverage_ratio < MIN_COVERAGE {
        (FramingStatus::Warning, MSG_TOO_FAR)
    } else if coverage_ratio > MAX_COVERAGE {
        (FramingStatus::Warning, MSG_TOO_CLOSE)
    } else if centering_score < MIN_CENTERING {
        (FramingStatus::Warning, MSG_OFF_CENTER)
    } else {
        (FramingStatus::Good, MSG_GOOD)
    };

    FaceGeometry {
        shape: classify_shape(landmarks),
        centering_score,
        coverage_ratio,
        status,
        message: message.to_string(),
    }
}
