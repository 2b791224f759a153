use crate::engine::{Session, SessionError};
use crate::overlay::OverlayError;
use std::sync::Arc;
use tryon_core::catalog;
use tryon_core::{BlendMode, MakeupLayer, OverlayTransform, Region, Rgb};
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.tryon.Studio1";
pub const OBJECT_PATH: &str = "/org/tryon/Studio1";

/// D-Bus interface for the try-on session daemon.
///
/// Bus name: org.tryon.Studio1
/// Object path: /org/tryon/Studio1
pub struct StudioService {
    session: Arc<Session>,
}

impl StudioService {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

fn session_error(e: SessionError) -> fdo::Error {
    match e {
        SessionError::Overlay(OverlayError::UnknownItem(_) | OverlayError::NotAnAccessory(_))
        | SessionError::NotAShade(_) => fdo::Error::InvalidArgs(e.to_string()),
        _ => fdo::Error::Failed(e.to_string()),
    }
}

fn invalid_args(e: impl std::fmt::Display) -> fdo::Error {
    fdo::Error::InvalidArgs(e.to_string())
}

fn transform_json(result: Result<OverlayTransform, OverlayError>) -> fdo::Result<String> {
    let transform = result.map_err(|e| fdo::Error::Failed(e.to_string()))?;
    serde_json::to_string(&transform).map_err(|e| fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.tryon.Studio1")]
impl StudioService {
    /// Paint a region. An empty `color` selects the natural look.
    async fn set_makeup(
        &self,
        region: &str,
        color: &str,
        opacity: f64,
        blend: &str,
        soften: f64,
    ) -> fdo::Result<()> {
        let region: Region = region.parse().map_err(invalid_args)?;
        let mut layer = if color.is_empty() {
            MakeupLayer::natural(region)
        } else {
            MakeupLayer::new(region, Rgb::from_hex(color).map_err(invalid_args)?)
        };
        layer.opacity = (opacity as f32).clamp(0.0, 1.0);
        if !blend.is_empty() {
            layer.blend_mode = blend.parse::<BlendMode>().map_err(invalid_args)?;
        }
        layer.soften_radius = (soften as f32).max(0.0);

        tracing::info!(%region, color, opacity = layer.opacity, blend = %layer.blend_mode, "set makeup");
        self.session.overlays().set_makeup(layer);
        Ok(())
    }

    /// Apply a catalog shade to its region.
    async fn apply_shade(&self, id: &str, opacity: f64) -> fdo::Result<()> {
        tracing::info!(id, opacity, "apply shade");
        self.session.apply_shade(id, opacity as f32).map_err(session_error)?;
        Ok(())
    }

    async fn clear_makeup(&self, region: &str) -> fdo::Result<bool> {
        let region: Region = region.parse().map_err(invalid_args)?;
        Ok(self.session.overlays().clear_makeup(region))
    }

    async fn select_accessory(&self, id: &str) -> fdo::Result<()> {
        self.session.select_accessory(id).await.map_err(session_error)
    }

    async fn clear_accessory(&self) -> fdo::Result<bool> {
        Ok(self.session.overlays().clear_accessory())
    }

    /// Move the accessory by a pixel offset in preview space. Returns the transform as JSON.
    async fn nudge(&self, dx: f64, dy: f64) -> fdo::Result<String> {
        transform_json(self.session.overlays().nudge(dx as f32, dy as f32))
    }

    async fn zoom(&self, delta: f64) -> fdo::Result<String> {
        transform_json(self.session.overlays().zoom(delta as f32))
    }

    async fn rotate(&self, degrees: f64) -> fdo::Result<String> {
        transform_json(self.session.overlays().rotate(degrees as f32))
    }

    async fn reset_transform(&self) -> fdo::Result<String> {
        transform_json(self.session.overlays().reset_transform())
    }

    async fn set_accessory_color(&self, color: &str) -> fdo::Result<()> {
        let color = Rgb::from_hex(color).map_err(invalid_args)?;
        self.session.overlays().set_accessory_color(color);
        Ok(())
    }

    /// Save the current preview as a PNG and return its path.
    async fn capture(&self) -> fdo::Result<String> {
        let path = self.session.capture().await.map_err(session_error)?;
        Ok(path.display().to_string())
    }

    /// Return session status as JSON.
    async fn status(&self) -> fdo::Result<String> {
        let mut status = serde_json::to_value(self.session.status())
            .map_err(|e| fdo::Error::Failed(e.to_string()))?;
        status["version"] = serde_json::json!(env!("CARGO_PKG_VERSION"));
        Ok(status.to_string())
    }

    /// Catalog items suited to the detected face shape, as JSON.
    async fn recommend(&self) -> fdo::Result<String> {
        let items = self.session.recommend().map_err(session_error)?;
        serde_json::to_string(&items).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// The whole catalog as JSON.
    async fn list_catalog(&self) -> fdo::Result<String> {
        serde_json::to_string(catalog::list_items()).map_err(|e| fdo::Error::Failed(e.to_string()))
    }
}
