//! User overlay selections, published as immutable snapshots.
//!
//! Every mutation builds a new `OverlayState` and swaps it into a `watch`
//! channel, so the frame loop always renders one consistent selection.

use image::RgbaImage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tryon_core::catalog::{CatalogItem, ItemKind};
use tryon_core::render::AccessoryOverlay;
use tryon_core::{MakeupLayer, OverlayTransform, RecolorFilter, Region, Rgb};

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("no accessory selected")]
    NoAccessory,
    #[error("unknown catalog item {0:?}")]
    UnknownItem(String),
    #[error("catalog item {0:?} is not an accessory")]
    NotAnAccessory(String),
    #[error("failed to load asset {path}: {source}")]
    Asset {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, Default)]
pub struct OverlayState {
    makeup: BTreeMap<Region, MakeupLayer>,
    accessory: Option<AccessoryOverlay>,
    /// The selected accessory before recoloring.
    base_asset: Option<Arc<RgbaImage>>,
    accessory_color: Option<Rgb>,
}

impl OverlayState {
    /// Makeup layers in region order.
    pub fn layers(&self) -> Vec<MakeupLayer> {
        self.makeup.values().copied().collect()
    }

    pub fn layer(&self, region: Region) -> Option<&MakeupLayer> {
        self.makeup.get(&region)
    }

    pub fn accessory(&self) -> Option<&AccessoryOverlay> {
        self.accessory.as_ref()
    }

    pub fn accessory_color(&self) -> Option<Rgb> {
        self.accessory_color
    }

    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "makeup": self.makeup.values().map(|l| serde_json::json!({
                "region": l.region.to_string(),
                "color": l.color.map(|c| c.to_hex()),
                "opacity": l.opacity,
                "blend": l.blend_mode.to_string(),
                "soften": l.soften_radius,
            })).collect::<Vec<_>>(),
            "accessory": self.accessory.as_ref().map(|a| serde_json::json!({
                "id": a.id,
                "transform": a.transform,
                "color": self.accessory_color.map(|c| c.to_hex()),
            })),
        })
    }
}

/// Single writer of the overlay snapshot.
pub struct OverlayStore {
    tx: watch::Sender<Arc<OverlayState>>,
    /// Serializes read-modify-write cycles.
    writer: Mutex<()>,
}

impl Default for OverlayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(OverlayState::default()));
        Self {
            tx,
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<OverlayState> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<OverlayState>> {
        self.tx.subscribe()
    }

    /// Apply `f` to a copy of the current state and publish the copy.
    fn update<T>(&self, f: impl FnOnce(&mut OverlayState) -> Result<T, OverlayError>) -> Result<T, OverlayError> {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = (**self.tx.borrow()).clone();
        let out = f(&mut next)?;
        self.tx.send_replace(Arc::new(next));
        Ok(out)
    }

    /// Set one region's makeup. A layer without a color is the natural look.
    pub fn set_makeup(&self, layer: MakeupLayer) {
        let _ = self.update(|s| {
            s.makeup.insert(layer.region, layer);
            Ok(())
        });
    }

    pub fn clear_makeup(&self, region: Region) -> bool {
        self.update(|s| Ok(s.makeup.remove(&region).is_some())).unwrap_or(false)
    }

    /// Select an accessory; the transform starts at identity.
    pub fn select_accessory(&self, id: &str, asset: RgbaImage) {
        let base = Arc::new(asset);
        let _ = self.update(|s| {
            let asset = match s.accessory_color {
                Some(color) => Arc::new(RecolorFilter::for_color(color).apply(&base)),
                None => Arc::clone(&base),
            };
            s.accessory = Some(AccessoryOverlay {
                id: id.to_string(),
                asset,
                transform: OverlayTransform::IDENTITY,
            });
            s.base_asset = Some(base);
            Ok(())
        });
    }

    pub fn clear_accessory(&self) -> bool {
        self.update(|s| {
            s.base_asset = None;
            Ok(s.accessory.take().is_some())
        })
        .unwrap_or(false)
    }

    fn adjust(&self, f: impl FnOnce(&mut OverlayTransform)) -> Result<OverlayTransform, OverlayError> {
        self.update(|s| {
            let accessory = s.accessory.as_mut().ok_or(OverlayError::NoAccessory)?;
            f(&mut accessory.transform);
            Ok(accessory.transform)
        })
    }

    pub fn nudge(&self, dx: f32, dy: f32) -> Result<OverlayTransform, OverlayError> {
        self.adjust(|t| t.nudge(dx, dy))
    }

    pub fn zoom(&self, delta: f32) -> Result<OverlayTransform, OverlayError> {
        self.adjust(|t| t.zoom(delta))
    }

    pub fn rotate(&self, degrees: f32) -> Result<OverlayTransform, OverlayError> {
        self.adjust(|t| t.rotate(degrees))
    }

    pub fn reset_transform(&self) -> Result<OverlayTransform, OverlayError> {
        self.adjust(|t| t.reset())
    }

    /// Tint the accessory toward `color`; the choice persists across selections.
    pub fn set_accessory_color(&self, color: Rgb) {
        let _ = self.update(|s| {
            s.accessory_color = Some(color);
            if let (Some(accessory), Some(base)) = (s.accessory.as_mut(), s.base_asset.as_ref()) {
                accessory.asset = Arc::new(RecolorFilter::for_color(color).apply(base));
            }
            Ok(())
        });
    }
}

/// Resolve a catalog accessory's image under `asset_dir`.
pub fn load_accessory_asset(asset_dir: &Path, item: &CatalogItem) -> Result<RgbaImage, OverlayError> {
    if item.kind != ItemKind::Accessory {
        return Err(OverlayError::NotAnAccessory(item.id.clone()));
    }
    let relative = item
        .image_asset
        .as_deref()
        .ok_or_else(|| OverlayError::NotAnAccessory(item.id.clone()))?;
    let path = asset_dir.join(relative);
    let img = image::open(&path).map_err(|source| OverlayError::Asset {
        path: path.clone(),
        source,
    })?;
    tracing::debug!(path = %path.display(), width = img.width(), height = img.height(), "loaded accessory asset");
    Ok(img.to_rgba8())
}
