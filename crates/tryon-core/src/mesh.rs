//! MediaPipe face-mesh regressor via ONNX Runtime.
//!
//! Runs on a padded square crop around a detected face box and returns the
//! dense 468-point mesh (478 with the attention model's iris refinement)
//! mapped back to source-frame pixels.

use crate::detector::DetectorError;
use crate::types::{BoundingBox, LandmarkPoint};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

pub const MESH_INPUT_SIZE: u32 = 192;
pub const MESH_POINTS: usize = 468;
pub const REFINED_MESH_POINTS: usize = 478;
/// Fraction of the longer box side added around the crop.
const CROP_PADDING: f32 = 0.25;
/// Crops smaller than this are not worth regressing.
const MIN_CROP_SIDE: f32 = 8.0;
/// Face-presence probability below which the mesh is discarded.
const FACE_FLAG_THRESHOLD: f32 = 0.5;

/// Square crop in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub side: u32,
}

pub struct FaceMeshRegressor {
    session: Session,
    points: usize,
    output_count: usize,
}

impl FaceMeshRegressor {
    /// Load a face-mesh model that yields `points` landmarks.
    pub fn load(model_path: &str, points: usize) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_count = session.outputs().len();
        tracing::info!(
            path = model_path,
            points,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face mesh model"
        );

        Ok(Self {
            session,
            points,
            output_count,
        })
    }

    pub fn points(&self) -> usize {
        self.points
    }

    /// Regress the mesh for one face box.
    ///
    /// Returns `Ok(None)` when the crop is degenerate or the model's
    /// face-presence flag says the crop holds no face.
    pub fn regress(
        &mut self,
        frame: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Option<Vec<LandmarkPoint>>, DetectorError> {
        let Some(crop) = square_crop(face, frame.width(), frame.height(), CROP_PADDING) else {
            return Ok(None);
        };

        let input = preprocess(frame, &crop);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut coords: Option<Vec<f32>> = None;
        let mut flag: Option<f32> = None;
        // Output order differs between exports; tell tensors apart by size.
        for idx in 0..self.output_count {
            let (_, data) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("mesh output: {e}")))?;
            if data.len() >= self.points * 3 && coords.is_none() {
                coords = Some(data.to_vec());
            } else if data.len() == 1 {
                flag = Some(data[0]);
            }
        }

        let coords = coords.ok_or_else(|| {
            DetectorError::InferenceFailed(format!(
                "no mesh output with {} landmarks",
                self.points
            ))
        })?;

        if let Some(raw) = flag {
            let presence = face_presence(raw);
            if presence < FACE_FLAG_THRESHOLD {
                tracing::debug!(presence, "face mesh flag below threshold");
                return Ok(None);
            }
        }

        Ok(Some(decode_mesh(&coords, self.points, &crop)))
    }
}

/// Expand the face box by `padding`, square it and clamp it to the frame.
pub fn square_crop(face: &BoundingBox, frame_width: u32, frame_height: u32, padding: f32) -> Option<CropRect> {
    let size = face.width.max(face.height) * (1.0 + padding);
    let (cx, cy) = face.center();

    let mut x = cx - size / 2.0;
    let mut y = cy - size / 2.0;
    let mut side = size;

    if x < 0.0 {
        side += x;
        x = 0.0;
    }
    if y < 0.0 {
        side += y;
        y = 0.0;
    }
    side = side
        .min(frame_width as f32 - x)
        .min(frame_height as f32 - y);

    if !side.is_finite() || side < MIN_CROP_SIDE {
        return None;
    }

    Some(CropRect {
        x: x.round() as u32,
        y: y.round() as u32,
        side: (side.round() as u32)
            .min(frame_width.saturating_sub(x.round() as u32))
            .min(frame_height.saturating_sub(y.round() as u32)),
    })
}

/// Crop, resize to 192×192 and normalize to [-1, 1] NCHW.
fn preprocess(frame: &RgbImage, crop: &CropRect) -> Array4<f32> {
    let region = image::imageops::crop_imm(frame, crop.x, crop.y, crop.side, crop.side).to_image();
    let resized = image::imageops::resize(&region, MESH_INPUT_SIZE, MESH_INPUT_SIZE, FilterType::Triangle);

    let size = MESH_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0 * 2.0 - 1.0;
        }
    }
    tensor
}

/// The flag output is a logit on some exports and a probability on others.
fn face_presence(raw: f32) -> f32 {
    if (0.0..=1.0).contains(&raw) {
        raw
    } else {
        1.0 / (1.0 + (-raw).exp())
    }
}

/// Map raw mesh output (input-pixel units, xyz triplets) to frame pixels.
fn decode_mesh(coords: &[f32], points: usize, crop: &CropRect) -> Vec<LandmarkPoint> {
    let scale = crop.side as f32 / MESH_INPUT_SIZE as f32;
    (0..points)
        .map(|i| {
            let base = i * 3;
            LandmarkPoint {
                id: i as u32,
                x: crop.x as f32 + coords[base] * scale,
                y: crop.y as f32 + coords[base + 1] * scale,
                z: Some(coords[base + 2] * scale),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_crop_pads_and_squares() {
        let face = BoundingBox::new(200.0, 100.0, 80.0, 100.0);
        let crop = square_crop(&face, 640, 480, 0.25).unwrap();
        // side = 100 * 1.25 = 125, centered on (240, 150)
        assert_eq!(crop.side, 125);
        assert_eq!(crop.x, 178);
        assert_eq!(crop.y, 88);
    }

    #[test]
    fn test_square_crop_clamps_to_frame() {
        let face = BoundingBox::new(-20.0, -10.0, 100.0, 100.0);
        let crop = square_crop(&face, 640, 480, 0.25).unwrap();
        assert_eq!((crop.x, crop.y), (0, 0));
        assert!(crop.side <= 640 && crop.side <= 480);

        let edge = BoundingBox::new(600.0, 440.0, 100.0, 100.0);
        let crop = square_crop(&edge, 640, 480, 0.25).unwrap();
        assert!(crop.x + crop.side <= 640);
        assert!(crop.y + crop.side <= 480);
    }

    #[test]
    fn test_square_crop_rejects_tiny_box() {
        let face = BoundingBox::new(10.0, 10.0, 2.0, 2.0);
        assert!(square_crop(&face, 640, 480, 0.25).is_none());
    }

    #[test]
    fn test_decode_mesh_maps_to_frame() {
        let crop = CropRect { x: 100, y: 50, side: 384 };
        let mut coords = vec![0.0f32; MESH_POINTS * 3];
        // Point 1 at the input center.
        coords[3] = 96.0;
        coords[4] = 96.0;
        coords[5] = -4.0;

        let points = decode_mesh(&coords, MESH_POINTS, &crop);
        assert_eq!(points.len(), MESH_POINTS);
        assert_eq!(points[0].id, 0);
        assert!((points[0].x - 100.0).abs() < 1e-4);
        assert!((points[1].x - 292.0).abs() < 1e-4);
        assert!((points[1].y - 242.0).abs() < 1e-4);
        assert_eq!(points[1].z, Some(-8.0));
        assert_eq!(points[MESH_POINTS - 1].id, 467);
    }

    #[test]
    fn test_face_presence_accepts_logit_or_probability() {
        assert!((face_presence(0.8) - 0.8).abs() < 1e-6);
        assert!(face_presence(6.0) > 0.99);
        assert!(face_presence(-6.0) < 0.01);
    }

    #[test]
    fn test_preprocess_normalizes() {
        let frame = RgbImage::from_pixel(300, 300, image::Rgb([255, 0, 255]));
        let crop = CropRect { x: 10, y: 10, side: 200 };
        let tensor = preprocess(&frame, &crop);
        assert_eq!(tensor.shape(), &[1, 3, 192, 192]);
        assert!((tensor[[0, 0, 96, 96]] - 1.0).abs() < 0.01);
        assert!((tensor[[0, 1, 96, 96]] + 1.0).abs() < 0.01);
    }
}
