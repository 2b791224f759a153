//! Cosmetic region topology and per-frame region path construction.
//!
//! Each region is one or more ring pairs over face-mesh landmark ids. A path
//! walks the outer ring forward and the inner ring backward, so the polygon
//! closes on itself without the two boundaries crossing.

use crate::types::LandmarkSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Lips,
    Eyes,
    Blush,
    Foundation,
}

impl Region {
    pub const ALL: [Region; 4] = [Region::Foundation, Region::Blush, Region::Eyes, Region::Lips];
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Region::Lips => "lips",
            Region::Eyes => "eyes",
            Region::Blush => "blush",
            Region::Foundation => "foundation",
        })
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lips" => Ok(Region::Lips),
            "eyes" => Ok(Region::Eyes),
            "blush" => Ok(Region::Blush),
            "foundation" => Ok(Region::Foundation),
            other => Err(format!("unknown region: {other}")),
        }
    }
}

/// One fill area: outer boundary ids plus an optional inner boundary.
#[derive(Debug, Clone, Copy)]
pub struct RingPair {
    pub outer: &'static [u32],
    pub inner: &'static [u32],
}

// Lips: corners 61/291 on the outer contour, 78/308 on the inner contour.
const UPPER_LIP_OUTER: &[u32] = &[61, 185, 40, 39, 37, 0, 267, 269, 270, 409, 291];
const UPPER_LIP_INNER: &[u32] = &[78, 191, 80, 81, 82, 13, 312, 311, 310, 415, 308];
const LOWER_LIP_OUTER: &[u32] = &[61, 146, 91, 181, 84, 17, 314, 405, 321, 375, 291];
const LOWER_LIP_INNER: &[u32] = &[78, 95, 88, 178, 87, 14, 317, 402, 318, 324, 308];

// Eyes: upper lid from outer to inner corner, brow underside in the same direction.
const LEFT_UPPER_LID: &[u32] = &[33, 246, 161, 160, 159, 158, 157, 173, 133];
const LEFT_BROW: &[u32] = &[70, 63, 105, 66, 107];
const RIGHT_UPPER_LID: &[u32] = &[263, 466, 388, 387, 386, 385, 384, 398, 362];
const RIGHT_BROW: &[u32] = &[300, 293, 334, 296, 336];

const LEFT_CHEEK: &[u32] = &[116, 117, 118, 101, 36, 205, 187, 123];
const RIGHT_CHEEK: &[u32] = &[345, 346, 347, 330, 266, 425, 411, 352];

const FACE_OVAL: &[u32] = &[
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
    148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109,
];

const LIPS: &[RingPair] = &[
    RingPair {
        outer: UPPER_LIP_OUTER,
        inner: UPPER_LIP_INNER,
    },
    RingPair {
        outer: LOWER_LIP_OUTER,
        inner: LOWER_LIP_INNER,
    },
];

const EYES: &[RingPair] = &[
    RingPair {
        outer: LEFT_UPPER_LID,
        inner: LEFT_BROW,
    },
    RingPair {
        outer: RIGHT_UPPER_LID,
        inner: RIGHT_BROW,
    },
];

const BLUSH: &[RingPair] = &[
    RingPair {
        outer: LEFT_CHEEK,
        inner: &[],
    },
    RingPair {
        outer: RIGHT_CHEEK,
        inner: &[],
    },
];

const FOUNDATION: &[RingPair] = &[RingPair {
    outer: FACE_OVAL,
    inner: &[],
}];

/// Ring pairs for a region, in paint order.
pub fn topology(region: Region) -> &'static [RingPair] {
    match region {
        Region::Lips => LIPS,
        Region::Eyes => EYES,
        Region::Blush => BLUSH,
        Region::Foundation => FOUNDATION,
    }
}

/// A closed polygon for one cosmetic fill area, rebuilt every frame.
///
/// The closing edge from the last point back to the first is implicit.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPath {
    ids: Vec<u32>,
    points: Vec<(f32, f32)>,
}

impl RegionPath {
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    /// A path closes once it has at least three vertices.
    pub fn is_closed(&self) -> bool {
        self.points.len() >= 3
    }

    /// Every edge of the polygon, including the closing edge.
    pub fn edges(&self) -> impl Iterator<Item = ((f32, f32), (f32, f32))> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }

    /// Axis-aligned bounds as (min_x, min_y, max_x, max_y).
    pub fn bounds(&self) -> Option<(f32, f32, f32, f32)> {
        let first = self.points.first()?;
        Some(self.points.iter().fold(
            (first.0, first.1, first.0, first.1),
            |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        ))
    }
}

/// Build one path: the outer ring forward, then the inner ring reversed.
///
/// Returns `None` if any id is absent from the landmark set.
pub fn build_path(landmarks: &LandmarkSet, rings: &RingPair) -> Option<RegionPath> {
    let ids: Vec<u32> = rings
        .outer
        .iter()
        .chain(rings.inner.iter().rev())
        .copied()
        .collect();

    let points = ids
        .iter()
        .map(|&id| landmarks.get(id).map(|p| (p.x, p.y)))
        .collect::<Option<Vec<_>>>()?;

    let path = RegionPath { ids, points };
    path.is_closed().then_some(path)
}

/// All paths for a region, in topology order (upper lip before lower lip).
pub fn build_region_paths(landmarks: &LandmarkSet, region: Region) -> Vec<RegionPath> {
    topology(region)
        .iter()
        .filter_map(|rings| {
            let path = build_path(landmarks, rings);
            if path.is_none() {
                tracing::trace!(%region, "region landmarks missing, skipping path");
            }
            path
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{BoundingBox, LandmarkPoint};
    use std::f32::consts::PI;

    /// Place a ring of ids along a half ellipse, left to right.
    fn arc(ids: &[u32], cx: f32, cy: f32, rx: f32, ry: f32, upper: bool) -> Vec<LandmarkPoint> {
        let n = ids.len() as f32 - 1.0;
        ids.iter()
            .enumerate()
            .map(|(i, &id)| {
                let t = PI - PI * i as f32 / n;
                let dy = ry * t.sin();
                let y = if upper { cy - dy } else { cy + dy };
                LandmarkPoint::new(id, cx + rx * t.cos(), y)
            })
            .collect()
    }

    /// Synthetic mouth with lips around (200, 300); corners are shared ids.
    pub(crate) fn synthetic_mouth() -> LandmarkSet {
        let mut points = arc(UPPER_LIP_OUTER, 200.0, 300.0, 40.0, 18.0, true);
        points.extend(arc(UPPER_LIP_INNER, 200.0, 300.0, 30.0, 5.0, true));
        // Lower rings share the corner ids, so skip their endpoints.
        let lower_outer = arc(LOWER_LIP_OUTER, 200.0, 300.0, 40.0, 20.0, false);
        let lower_inner = arc(LOWER_LIP_INNER, 200.0, 300.0, 30.0, 6.0, false);
        points.extend(lower_outer[1..lower_outer.len() - 1].iter().copied());
        points.extend(lower_inner[1..lower_inner.len() - 1].iter().copied());
        LandmarkSet::new(points, 0.9, BoundingBox::new(120.0, 180.0, 160.0, 200.0)).unwrap()
    }

    fn segments_cross(a: (f32, f32), b: (f32, f32), c: (f32, f32), d: (f32, f32)) -> bool {
        let orient = |p: (f32, f32), q: (f32, f32), r: (f32, f32)| {
            (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
        };
        let d1 = orient(c, d, a);
        let d2 = orient(c, d, b);
        let d3 = orient(a, b, c);
        let d4 = orient(a, b, d);
        ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
            && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    }

    /// Place a closed ring of ids around a full ellipse.
    fn ring(ids: &[u32], cx: f32, cy: f32, rx: f32, ry: f32) -> Vec<LandmarkPoint> {
        let n = ids.len() as f32;
        ids.iter()
            .enumerate()
            .map(|(i, &id)| {
                let t = 2.0 * PI * i as f32 / n;
                LandmarkPoint::new(id, cx + rx * t.cos(), cy + ry * t.sin())
            })
            .collect()
    }

    /// Both eyes: each upper lid sits below its brow.
    fn synthetic_eyes() -> LandmarkSet {
        let mut points = arc(LEFT_UPPER_LID, 160.0, 200.0, 22.0, 8.0, true);
        points.extend(arc(LEFT_BROW, 160.0, 184.0, 24.0, 6.0, true));
        points.extend(arc(RIGHT_UPPER_LID, 240.0, 200.0, 22.0, 8.0, true));
        points.extend(arc(RIGHT_BROW, 240.0, 184.0, 24.0, 6.0, true));
        LandmarkSet::new(points, 0.9, BoundingBox::new(120.0, 150.0, 160.0, 200.0)).unwrap()
    }

    fn synthetic_cheeks() -> LandmarkSet {
        let mut points = ring(LEFT_CHEEK, 150.0, 260.0, 18.0, 12.0);
        points.extend(ring(RIGHT_CHEEK, 250.0, 260.0, 18.0, 12.0));
        LandmarkSet::new(points, 0.9, BoundingBox::new(120.0, 150.0, 160.0, 200.0)).unwrap()
    }

    fn synthetic_face_oval() -> LandmarkSet {
        let points = ring(FACE_OVAL, 200.0, 250.0, 80.0, 100.0);
        LandmarkSet::new(points, 0.9, BoundingBox::new(120.0, 150.0, 160.0, 200.0)).unwrap()
    }

    /// Closed, no repeated id, and no two non-adjacent edges cross.
    fn assert_simple_polygon(path: &RegionPath) {
        assert!(path.is_closed());
        assert_eq!(path.edges().count(), path.points().len());

        let mut ids = path.ids().to_vec();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), path.ids().len(), "duplicate id in path");

        let edges: Vec<_> = path.edges().collect();
        for i in 0..edges.len() {
            for j in (i + 2)..edges.len() {
                if i == 0 && j == edges.len() - 1 {
                    continue; // adjacent through the closing edge
                }
                let (a, b) = edges[i];
                let (c, d) = edges[j];
                assert!(!segments_cross(a, b, c, d), "edges {i} and {j} cross");
            }
        }
    }

    #[test]
    fn test_lip_paths_close_without_crossing() {
        let paths = build_region_paths(&synthetic_mouth(), Region::Lips);
        assert_eq!(paths.len(), 2);
        paths.iter().for_each(assert_simple_polygon);
    }

    #[test]
    fn test_eye_paths_close_without_crossing() {
        let paths = build_region_paths(&synthetic_eyes(), Region::Eyes);
        assert_eq!(paths.len(), 2);
        paths.iter().for_each(assert_simple_polygon);
        assert_eq!(paths[0].ids().len(), LEFT_UPPER_LID.len() + LEFT_BROW.len());
        // Lid ends at the inner corner, then the brow is walked back from its inner end.
        assert_eq!(paths[0].ids()[LEFT_UPPER_LID.len() - 1], 133);
        assert_eq!(paths[0].ids()[LEFT_UPPER_LID.len()], 107);
    }

    #[test]
    fn test_cheek_paths_close_without_crossing() {
        let paths = build_region_paths(&synthetic_cheeks(), Region::Blush);
        assert_eq!(paths.len(), 2);
        paths.iter().for_each(assert_simple_polygon);
        assert_eq!(paths[1].ids(), RIGHT_CHEEK);
    }

    #[test]
    fn test_face_oval_closes_without_crossing() {
        let paths = build_region_paths(&synthetic_face_oval(), Region::Foundation);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].ids().len(), 36);
        assert_simple_polygon(&paths[0]);
    }

    #[test]
    fn test_path_order_is_outer_then_reversed_inner() {
        let set = synthetic_mouth();
        let upper = build_path(&set, &topology(Region::Lips)[0]).unwrap();
        assert_eq!(upper.ids().first(), Some(&61));
        assert_eq!(upper.ids()[UPPER_LIP_OUTER.len() - 1], 291);
        assert_eq!(upper.ids()[UPPER_LIP_OUTER.len()], 308);
        assert_eq!(upper.ids().last(), Some(&78));
    }

    #[test]
    fn test_missing_landmarks_skip_region() {
        let set = synthetic_mouth();
        assert!(build_region_paths(&set, Region::Foundation).is_empty());
        assert!(build_region_paths(&set, Region::Eyes).is_empty());
    }

    #[test]
    fn test_region_parse() {
        assert_eq!("Lips".parse::<Region>(), Ok(Region::Lips));
        assert!("nails".parse::<Region>().is_err());
        assert_eq!(Region::Blush.to_string(), "blush");
    }
}
