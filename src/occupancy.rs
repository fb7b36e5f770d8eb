//! Zone occupancy evaluation.
//!
//! A zone is occupied when at least one vehicle box covers enough of it:
//! the overlap between the (top-left clamped) box and the zone, divided by the
//! clamped box area, must exceed `OCCUPANCY_RATIO_THRESHOLD`.
//!
//! Evaluation is a pure function of the boxes and zones of one request.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::BoundingBox;

/// Minimum fraction of a box that must fall inside a zone to mark it occupied.
pub const OCCUPANCY_RATIO_THRESHOLD: f64 = 0.3;

/// User-defined rectangular parking space in frame pixel coordinates.
///
/// On the wire a zone is a bare `[x1, y1, x2, y2]` array. Anything that is not
/// exactly four finite numbers is rejected at deserialization time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct Zone {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Zone {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Result<Self> {
        Self::try_from([x1, y1, x2, y2])
    }
}

impl TryFrom<[f64; 4]> for Zone {
    type Error = anyhow::Error;

    fn try_from(coords: [f64; 4]) -> Result<Self> {
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(anyhow!("zone coordinates must be finite numbers"));
        }
        let [x1, y1, x2, y2] = coords;
        Ok(Self { x1, y1, x2, y2 })
    }
}

impl From<Zone> for [f64; 4] {
    fn from(zone: Zone) -> Self {
        [zone.x1, zone.y1, zone.x2, zone.y2]
    }
}

/// Occupancy of a single zone for one request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneStatus {
    pub occupied: bool,
}

/// Evaluate every zone against the detected boxes.
///
/// The output has one entry per zone, in zone order. Box order only affects how
/// early the scan for a zone stops, never the result.
pub fn evaluate(boxes: &[BoundingBox], zones: &[Zone]) -> Vec<ZoneStatus> {
    zones
        .iter()
        .map(|zone| ZoneStatus {
            occupied: boxes.iter().any(|bbox| box_occupies(bbox, zone)),
        })
        .collect()
}

/// Number of occupied zones in an evaluation result.
pub fn occupied_count(statuses: &[ZoneStatus]) -> usize {
    statuses.iter().filter(|s| s.occupied).count()
}

/// Fraction of the clamped box that lies inside the zone.
///
/// Returns `None` when the overlap is degenerate (shared edge or disjoint) or
/// when the clamped box has no positive area.
pub fn overlap_ratio(bbox: &BoundingBox, zone: &Zone) -> Option<f64> {
    // Only the top-left corner is clamped to the frame.
    let cx1 = f64::from(bbox.x1.max(0));
    let cy1 = f64::from(bbox.y1.max(0));
    let bx2 = f64::from(bbox.x2);
    let by2 = f64::from(bbox.y2);

    let ox1 = cx1.max(zone.x1);
    let oy1 = cy1.max(zone.y1);
    let ox2 = bx2.min(zone.x2);
    let oy2 = by2.min(zone.y2);
    if !(ox1 < ox2 && oy1 < oy2) {
        return None;
    }

    let box_area = (bx2 - cx1) * (by2 - cy1);
    if box_area <= 0.0 {
        return None;
    }
    let overlap_area = (ox2 - ox1) * (oy2 - oy1);
    Some(overlap_area / box_area)
}

fn box_occupies(bbox: &BoundingBox, zone: &Zone) -> bool {
    overlap_ratio(bbox, zone).is_some_and(|ratio| ratio > OCCUPANCY_RATIO_THRESHOLD)
}
