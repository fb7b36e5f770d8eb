use serde::{Deserialize, Serialize};

/// Raw detector output in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl Detection {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Vehicle box handed to the occupancy evaluator.
///
/// Coordinates are whole pixels, truncated toward zero from the detector
/// output. Serialized with the `conf` / `class` keys the browser client reads.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    #[serde(rename = "conf")]
    pub confidence: f32,
    #[serde(rename = "class")]
    pub class_id: u32,
}

impl From<&Detection> for BoundingBox {
    fn from(det: &Detection) -> Self {
        Self {
            x1: det.x1 as i32,
            y1: det.y1 as i32,
            x2: det.x2 as i32,
            y2: det.y2 as i32,
            confidence: det.confidence,
            class_id: det.class_id,
        }
    }
}
