use std::path::PathBuf;
use std::time::Duration;
use tryon_core::{EstimatorOptions, Presentation};
use tryon_hw::{CameraConstraints, FacingMode};

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture size and rate.
    pub camera: CameraConstraints,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Use the 478-point attention mesh.
    pub refine_landmarks: bool,
    /// Upper bound on the initial model load.
    pub model_load_timeout: Duration,
    /// Show the preview as a mirror; captures are flipped to match.
    pub mirror_preview: bool,
    /// Where captures are written.
    pub capture_dir: PathBuf,
    /// Text stamped on captures; empty disables the stamp.
    pub watermark: Option<String>,
    /// Root for catalog `image_asset` paths.
    pub asset_dir: PathBuf,
}

impl Config {
    /// Load configuration from `TRYON_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".local/share"))
            .join("tryon");

        let model_dir = std::env::var("TRYON_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let capture_dir = std::env::var("TRYON_CAPTURE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join("Pictures"));

        let asset_dir = std::env::var("TRYON_ASSET_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("assets"));

        let facing_mode = std::env::var("TRYON_FACING_MODE")
            .ok()
            .and_then(|v| match v.parse::<FacingMode>() {
                Ok(mode) => Some(mode),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring TRYON_FACING_MODE");
                    None
                }
            })
            .unwrap_or_default();

        let watermark = std::env::var("TRYON_WATERMARK")
            .unwrap_or_else(|_| "TRYON".to_string());

        Self {
            camera_device: std::env::var("TRYON_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            camera: CameraConstraints {
                width: env_u32("TRYON_CAMERA_WIDTH", 640),
                height: env_u32("TRYON_CAMERA_HEIGHT", 480),
                frame_rate: env_u32("TRYON_CAMERA_FPS", 30),
                facing_mode,
            },
            model_dir,
            refine_landmarks: env_flag("TRYON_REFINE_LANDMARKS", true),
            model_load_timeout: Duration::from_secs(env_u64("TRYON_MODEL_LOAD_TIMEOUT_SECS", 30)),
            // A rear camera is never mirrored unless asked for.
            mirror_preview: env_flag("TRYON_MIRROR_PREVIEW", facing_mode == FacingMode::User),
            capture_dir,
            watermark: (!watermark.trim().is_empty()).then_some(watermark),
            asset_dir,
        }
    }

    pub fn presentation(&self) -> Presentation {
        if self.mirror_preview {
            Presentation::Mirrored
        } else {
            Presentation::Natural
        }
    }

    pub fn estimator_options(&self) -> EstimatorOptions {
        EstimatorOptions::new(self.model_dir.clone(), self.refine_landmarks)
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
