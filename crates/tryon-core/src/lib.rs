//! tryon-core: face landmarks, geometry and cosmetic overlay compositing.
//!
//! Uses SCRFD for face boxes and the MediaPipe face mesh for dense
//! landmarks, both via ONNX Runtime, then paints makeup regions and a
//! hairstyle overlay onto a transparent surface for each frame.

pub mod accessory;
pub mod capture;
pub mod catalog;
pub mod compositor;
pub mod detector;
pub mod estimator;
pub mod geometry;
pub mod lifecycle;
pub mod mesh;
pub mod regions;
pub mod render;
pub mod scheduler;
pub mod types;

pub use accessory::{OverlayTransform, PlacementConstants, RecolorFilter};
pub use compositor::{BlendMode, MakeupLayer};
pub use detector::DetectorError;
pub use estimator::{EstimatorLoader, EstimatorOptions, LandmarkEstimator, MeshEstimatorLoader};
pub use geometry::{FaceGeometry, FaceShape};
pub use lifecycle::{DetectorHandle, DetectorLifecycle};
pub use regions::Region;
pub use types::{BoundingBox, LandmarkPoint, LandmarkSet, Presentation, Rgb};
