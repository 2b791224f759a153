//! Per-frame overlay rendering.
//!
//! Each render starts from a fresh transparent surface sized to the frame,
//! so nothing from a previous frame (or a cleared layer) survives.

use crate::accessory::{draw_accessory, AccessoryPlacement, OverlayTransform, PlacementConstants};
use crate::compositor::{new_surface, paint_layers, MakeupLayer};
use crate::regions::Region;
use crate::types::{LandmarkSet, Presentation};
use image::{RgbImage, RgbaImage};
use std::sync::Arc;

/// The active hairstyle overlay. `asset` is already recolored.
#[derive(Debug, Clone)]
pub struct AccessoryOverlay {
    pub id: String,
    pub asset: Arc<RgbaImage>,
    /// Display-space adjustment, as the user made it.
    pub transform: OverlayTransform,
}

#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    pub placement: PlacementConstants,
    pub presentation: Presentation,
}

impl Renderer {
    pub fn new(presentation: Presentation) -> Self {
        Self {
            placement: PlacementConstants::default(),
            presentation,
        }
    }

    /// Render the overlay surface for `frame`, in source-frame space.
    ///
    /// Without a face the surface stays fully transparent.
    pub fn render(
        &self,
        frame: &RgbImage,
        face: Option<&LandmarkSet>,
        layers: &[MakeupLayer],
        accessory: Option<&AccessoryOverlay>,
    ) -> RgbaImage {
        let (width, height) = frame.dimensions();
        let mut surface = new_surface(width, height);
        let Some(face) = face else {
            return surface;
        };

        let mut ordered = layers.to_vec();
        ordered.sort_by_key(|layer| paint_rank(layer.region));
        paint_layers(&mut surface, frame, face, &ordered);

        if let Some(accessory) = accessory {
            if let Some(placement) =
                AccessoryPlacement::from_face_box(face.bounding_box(), width, height, &self.placement)
            {
                let rect = placement.to_pixels(width, height);
                let transform = accessory.transform.to_source_space(self.presentation);
                draw_accessory(&mut surface, &accessory.asset, &rect, &transform);
            }
        }

        surface
    }
}

fn paint_rank(region: Region) -> usize {
    Region::ALL.iter().position(|r| *r == region).unwrap_or(Region::ALL.len())
}
