//! Hairstyle and cosmetic-shade catalog.
//!
//! Records are embedded at compile time from `contrib/catalog/*.toml` and
//! parsed once. The catalog is read-only at runtime.

use crate::geometry::FaceShape;
use crate::regions::Region;
use crate::types::Rgb;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

const ACCESSORIES_TOML: &str = include_str!("../../../contrib/catalog/accessories.toml");
const SHADES_TOML: &str = include_str!("../../../contrib/catalog/shades.toml");

static CATALOG_DB: OnceLock<Vec<CatalogItem>> = OnceLock::new();

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("bad catalog TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate catalog id {0:?}")]
    DuplicateId(String),
    #[error("catalog item {id:?}: {reason}")]
    Invalid { id: String, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Accessory,
    Shade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    /// Accessory image, relative to the asset directory.
    #[serde(default)]
    pub image_asset: Option<String>,
    #[serde(default)]
    pub color: Option<Rgb>,
    /// Target region for shades.
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default)]
    pub face_shape_affinity: Vec<FaceShape>,
}

impl CatalogItem {
    pub fn suits(&self, shape: FaceShape) -> bool {
        self.face_shape_affinity.contains(&shape)
    }
}

/// Top-level structure of one catalog file.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    item: Vec<CatalogItem>,
}

/// Parse and validate one catalog file.
pub fn parse_catalog(src: &str) -> Result<Vec<CatalogItem>, CatalogError> {
    let file: CatalogFile = toml::from_str(src)?;
    for item in &file.item {
        validate(item)?;
    }
    Ok(file.item)
}

fn validate(item: &CatalogItem) -> Result<(), CatalogError> {
    let invalid = |reason: &'static str| CatalogError::Invalid {
        id: item.id.clone(),
        reason,
    };
    if item.id.trim().is_empty() {
        return Err(invalid("empty id"));
    }
    match item.kind {
        ItemKind::Accessory if item.image_asset.is_none() => Err(invalid("accessory without image_asset")),
        ItemKind::Shade if item.region.is_none() => Err(invalid("shade without region")),
        ItemKind::Shade if item.color.is_none() => Err(invalid("shade without color")),
        _ => Ok(()),
    }
}

/// Merge files into one list, rejecting ids that appear twice.
pub fn build_catalog<'a>(sources: impl IntoIterator<Item = &'a str>) -> Result<Vec<CatalogItem>, CatalogError> {
    let mut db: Vec<CatalogItem> = Vec::new();
    for src in sources {
        for item in parse_catalog(src)? {
            if db.iter().any(|existing| existing.id == item.id) {
                return Err(CatalogError::DuplicateId(item.id));
            }
            db.push(item);
        }
    }
    Ok(db)
}

/// Builds the runtime catalog. A rejected source set yields an empty catalog.
fn load_catalog<'a>(sources: impl IntoIterator<Item = &'a str>) -> Vec<CatalogItem> {
    build_catalog(sources).unwrap_or_else(|e| {
        tracing::error!(error = %e, "embedded catalog rejected");
        Vec::new()
    })
}

fn catalog_db() -> &'static Vec<CatalogItem> {
    CATALOG_DB.get_or_init(|| load_catalog([ACCESSORIES_TOML, SHADES_TOML]))
}

/// Every embedded catalog record.
pub fn list_items() -> &'static [CatalogItem] {
    catalog_db()
}

pub fn lookup(id: &str) -> Option<&'static CatalogItem> {
    catalog_db().iter().find(|item| item.id == id)
}

pub fn accessories() -> impl Iterator<Item = &'static CatalogItem> {
    catalog_db().iter().filter(|item| item.kind == ItemKind::Accessory)
}

pub fn shades(region: Option<Region>) -> impl Iterator<Item = &'static CatalogItem> {
    catalog_db()
        .iter()
        .filter(move |item| item.kind == ItemKind::Shade && (region.is_none() || item.region == region))
}

/// Records whose affinity includes `shape`, accessories first.
pub fn recommended(shape: FaceShape) -> Vec<&'static CatalogItem> {
    let mut items: Vec<_> = catalog_db().iter().filter(|item| item.suits(shape)).collect();
    items.sort_by_key(|item| item.kind != ItemKind::Accessory);
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_catalog_loads() {
        let all = build_catalog([ACCESSORIES_TOML, SHADES_TOML]).unwrap();
        assert_eq!(all.len(), list_items().len());
        assert!(accessories().count() > 0);
        assert!(shades(Some(Region::Lips)).all(|s| s.region == Some(Region::Lips)));
    }

    #[test]
    fn test_lookup() {
        let item = lookup("bob-chestnut").expect("bob-chestnut should be embedded");
        assert_eq!(item.kind, ItemKind::Accessory);
        assert_eq!(item.color, Some(Rgb::new(0x6b, 0x3e, 0x1f)));
        assert!(lookup("no-such-item").is_none());
    }

    #[test]
    fn test_recommended_orders_accessories_first() {
        let picks = recommended(FaceShape::Round);
        assert!(!picks.is_empty());
        assert!(picks.iter().all(|item| item.suits(FaceShape::Round)));
        let first_shade = picks.iter().position(|i| i.kind == ItemKind::Shade).unwrap_or(picks.len());
        assert!(picks[first_shade..].iter().all(|i| i.kind == ItemKind::Shade));
    }

    #[test]
    fn test_shade_requires_region() {
        let src = r##"
            [[item]]
            id = "x"
            name = "X"
            kind = "shade"
            color = "#ffffff"
        "##;
        assert!(matches!(parse_catalog(src), Err(CatalogError::Invalid { .. })));
    }

    #[test]
    fn test_bad_color_rejected() {
        let src = r##"
            [[item]]
            id = "x"
            name = "X"
            kind = "shade"
            region = "lips"
            color = "red"
        "##;
        assert!(matches!(parse_catalog(src), Err(CatalogError::Parse(_))));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let src = r##"
            [[item]]
            id = "dup"
            name = "A"
            kind = "accessory"
            image_asset = "a.png"
        "##;
        assert!(matches!(build_catalog([src, src]), Err(CatalogError::DuplicateId(id)) if id == "dup"));
    }

    #[test]
    fn test_cross_file_duplicate_empties_catalog() {
        let accessories = r##"
            [[item]]
            id = "dup"
            name = "A"
            kind = "accessory"
            image_asset = "a.png"
        "##;
        let shades = r##"
            [[item]]
            id = "dup"
            name = "B"
            kind = "shade"
            region = "lips"
            color = "#b3202a"
        "##;
        assert!(load_catalog([accessories, shades]).is_empty());
        assert_eq!(load_catalog([accessories]).len(), 1);
    }

    #[test]
    fn test_embedded_ids_unique() {
        let items = list_items();
        for (i, item) in items.iter().enumerate() {
            assert!(items[i + 1..].iter().all(|other| other.id != item.id), "duplicate id {}", item.id);
        }
    }
}
