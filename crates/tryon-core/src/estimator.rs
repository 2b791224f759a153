//! Landmark estimation seam: the traits the session drives, plus the
//! production SCRFD + face-mesh implementation.

use crate::detector::{DetectorError, FaceBoxDetector};
use crate::mesh::{FaceMeshRegressor, MESH_POINTS, REFINED_MESH_POINTS};
use crate::types::LandmarkSet;
use image::RgbImage;
use std::path::PathBuf;

const DETECTOR_MODEL: &str = "det_10g.onnx";
const MESH_MODEL: &str = "face_landmark.onnx";
const REFINED_MESH_MODEL: &str = "face_landmark_with_attention.onnx";
/// Upper bound on faces meshed per frame.
const DEFAULT_MAX_FACES: usize = 1;

/// Produces landmark sets for a frame. An empty vector means "no face".
pub trait LandmarkEstimator: Send + 'static {
    fn estimate(&mut self, frame: &RgbImage) -> Result<Vec<LandmarkSet>, DetectorError>;
}

/// Builds an estimator. Loading is blocking and may take seconds.
pub trait EstimatorLoader: Send + Sync + 'static {
    type Estimator: LandmarkEstimator;

    fn load(&self) -> Result<Self::Estimator, DetectorError>;
}

#[derive(Debug, Clone)]
pub struct EstimatorOptions {
    pub model_dir: PathBuf,
    /// Use the 478-point attention mesh (denser lips, eyes and irises).
    pub refine_landmarks: bool,
    pub max_faces: usize,
}

impl EstimatorOptions {
    pub fn new(model_dir: impl Into<PathBuf>, refine_landmarks: bool) -> Self {
        Self {
            model_dir: model_dir.into(),
            refine_landmarks,
            max_faces: DEFAULT_MAX_FACES,
        }
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL)
    }

    pub fn mesh_model_path(&self) -> PathBuf {
        let name = if self.refine_landmarks {
            REFINED_MESH_MODEL
        } else {
            MESH_MODEL
        };
        self.model_dir.join(name)
    }

    pub fn mesh_points(&self) -> usize {
        if self.refine_landmarks {
            REFINED_MESH_POINTS
        } else {
            MESH_POINTS
        }
    }
}

/// Reject frames no model can consume.
pub fn validate_frame(frame: &RgbImage) -> Result<(), DetectorError> {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return Err(DetectorError::MalformedFrame(format!("empty {w}x{h} frame")));
    }
    let expected = w as usize * h as usize * 3;
    if frame.as_raw().len() < expected {
        return Err(DetectorError::MalformedFrame(format!(
            "{w}x{h} frame carries {} bytes, expected {expected}",
            frame.as_raw().len()
        )));
    }
    Ok(())
}

/// SCRFD face boxes refined by the face-mesh regressor.
pub struct MeshEstimator {
    detector: FaceBoxDetector,
    mesh: FaceMeshRegressor,
    max_faces: usize,
}

impl LandmarkEstimator for MeshEstimator {
    fn estimate(&mut self, frame: &RgbImage) -> Result<Vec<LandmarkSet>, DetectorError> {
        validate_frame(frame)?;

        let boxes = self.detector.detect(frame)?;
        let mut faces = Vec::with_capacity(boxes.len().min(self.max_faces));

        // Detector order is confidence order; consumers take the first face.
        for face in boxes.iter().take(self.max_faces) {
            let Some(points) = self.mesh.regress(frame, &face.bbox)? else {
                continue;
            };
            let set = LandmarkSet::new(points, face.confidence, face.bbox)
                .map_err(|e| DetectorError::InferenceFailed(e.to_string()))?;
            faces.push(set);
        }

        tracing::trace!(boxes = boxes.len(), faces = faces.len(), "estimated landmarks");
        Ok(faces)
    }
}

#[derive(Debug, Clone)]
pub struct MeshEstimatorLoader {
    options: EstimatorOptions,
}

impl MeshEstimatorLoader {
    pub fn new(options: EstimatorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &EstimatorOptions {
        &self.options
    }
}

impl EstimatorLoader for MeshEstimatorLoader {
    type Estimator = MeshEstimator;

    fn load(&self) -> Result<MeshEstimator, DetectorError> {
        let detector_path = self.options.detector_model_path();
        let mesh_path = self.options.mesh_model_path();

        let detector = FaceBoxDetector::load(&detector_path.to_string_lossy())?;
        let mesh = FaceMeshRegressor::load(&mesh_path.to_string_lossy(), self.options.mesh_points())?;

        tracing::info!(
            refine_landmarks = self.options.refine_landmarks,
            points = mesh.points(),
            "landmark estimator ready"
        );

        Ok(MeshEstimator {
            detector,
            mesh,
            max_faces: self.options.max_faces.max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths_follow_refine_flag() {
        let plain = EstimatorOptions::new("/models", false);
        assert_eq!(plain.detector_model_path(), PathBuf::from("/models/det_10g.onnx"));
        assert_eq!(plain.mesh_model_path(), PathBuf::from("/models/face_landmark.onnx"));
        assert_eq!(plain.mesh_points(), 468);

        let refined = EstimatorOptions::new("/models", true);
        assert_eq!(
            refined.mesh_model_path(),
            PathBuf::from("/models/face_landmark_with_attention.onnx")
        );
        assert_eq!(refined.mesh_points(), 478);
    }

    #[test]
    fn test_validate_frame() {
        assert!(validate_frame(&RgbImage::new(4, 4)).is_ok());
        assert!(matches!(
            validate_frame(&RgbImage::new(0, 4)),
            Err(DetectorError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_missing_models_reported() {
        let loader = MeshEstimatorLoader::new(EstimatorOptions::new("/nonexistent/tryon-models", false));
        match loader.load() {
            Err(DetectorError::ModelNotFound(path)) => assert!(path.ends_with("det_10g.onnx")),
            Err(other) => panic!("expected ModelNotFound, got {other}"),
            Ok(_) => panic!("expected ModelNotFound"),
        }
    }
}
