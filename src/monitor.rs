//! Per-request pipeline: frame -> vehicle boxes -> zone statuses.

use anyhow::Result;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::detect::{BoundingBox, VehicleDetector};
use crate::frame::Frame;
use crate::occupancy::{evaluate, occupied_count, Zone, ZoneStatus};

/// Occupancy of every requested zone for one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OccupancyReport {
    pub detections: Vec<BoundingBox>,
    #[serde(rename = "parkingStatus")]
    pub parking_status: Vec<ZoneStatus>,
    /// Seconds since the Unix epoch when the report was produced.
    pub timestamp: f64,
}

impl OccupancyReport {
    pub fn occupied(&self) -> usize {
        occupied_count(&self.parking_status)
    }

    pub fn free(&self) -> usize {
        self.parking_status.len() - self.occupied()
    }
}

/// Detect vehicles in `frame` and evaluate every zone.
///
/// A detector failure aborts the whole request; no statuses are produced.
pub fn assess_frame(
    detector: &VehicleDetector,
    frame: &Frame,
    zones: &[Zone],
) -> Result<OccupancyReport> {
    let detections = detector.detect(frame)?;
    let parking_status = evaluate(&detections, zones);
    let report = OccupancyReport {
        detections,
        parking_status,
        timestamp: unix_timestamp(),
    };
    log::info!(
        "assessed {}x{} frame: boxes={} zones={} occupied={}",
        frame.width,
        frame.height,
        report.detections.len(),
        zones.len(),
        report.occupied()
    );
    Ok(report)
}

fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, StubBackend, COCO_CAR};
    use std::sync::Arc;

    #[test]
    fn report_has_one_status_per_zone() -> Result<()> {
        let backend = StubBackend::with_detections(vec![Detection {
            x1: 10.0,
            y1: 10.0,
            x2: 50.0,
            y2: 50.0,
            confidence: 0.9,
            class_id: COCO_CAR,
        }]);
        let detector = VehicleDetector::new(Arc::new(backend));
        let frame = Frame::from_rgb(vec![0u8; 64 * 64 * 3], 64, 64)?;
        let zones = vec![
            Zone::new(30.0, 30.0, 70.0, 70.0)?,
            Zone::new(20.0, 20.0, 45.0, 45.0)?,
            Zone::new(0.0, 0.0, 5.0, 5.0)?,
        ];

        let report = assess_frame(&detector, &frame, &zones)?;
        let occupied: Vec<bool> = report.parking_status.iter().map(|s| s.occupied).collect();
        assert_eq!(occupied, vec![false, true, false]);
        assert_eq!((report.occupied(), report.free()), (1, 2));
        assert_eq!(report.detections.len(), 1);
        assert!(report.timestamp > 0.0);

        let value = serde_json::to_value(&report)?;
        assert_eq!(value["parkingStatus"][1]["occupied"], true);
        assert_eq!(value["detections"][0]["class"], 2);
        Ok(())
    }

    #[test]
    fn no_zones_gives_empty_status() -> Result<()> {
        let detector = VehicleDetector::new(Arc::new(StubBackend::new()));
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2)?;
        let report = assess_frame(&detector, &frame, &[])?;
        assert!(report.parking_status.is_empty());
        Ok(())
    }
}
