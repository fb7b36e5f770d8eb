use std::sync::Arc;

use anyhow::{Context, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::BoundingBox;
use crate::frame::Frame;

/// COCO class ids of the vehicles that can occupy a parking space.
pub const COCO_CAR: u32 = 2;
pub const COCO_BUS: u32 = 5;
pub const COCO_TRUCK: u32 = 7;

pub const DEFAULT_VEHICLE_CLASSES: [u32; 3] = [COCO_CAR, COCO_BUS, COCO_TRUCK];

/// Default minimum confidence. Detections must be strictly above it.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;

/// Vehicle detection adapter over a detector backend.
///
/// Keeps only vehicle classes with confidence above the threshold. A backend
/// error is returned unchanged; there is no retry and no partial result.
#[derive(Clone)]
pub struct VehicleDetector {
    backend: Arc<dyn DetectorBackend>,
    classes: Vec<u32>,
    confidence_threshold: f32,
}

impl VehicleDetector {
    pub fn new(backend: Arc<dyn DetectorBackend>) -> Self {
        Self {
            backend,
            classes: DEFAULT_VEHICLE_CLASSES.to_vec(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_classes(mut self, classes: Vec<u32>) -> Self {
        self.classes = classes;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn detect(&self, frame: &Frame) -> Result<Vec<BoundingBox>> {
        let detections = self
            .backend
            .detect(frame)
            .with_context(|| format!("{} detector failed", self.backend.name()))?;
        Ok(detections
            .iter()
            .filter(|det| {
                self.classes.contains(&det.class_id) && det.confidence > self.confidence_threshold
            })
            .map(BoundingBox::from)
            .collect())
    }
}

impl std::fmt::Debug for VehicleDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VehicleDetector")
            .field("backend", &self.backend.name())
            .field("classes", &self.classes)
            .field("confidence_threshold", &self.confidence_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::Detection;
    use crate::detect::StubBackend;
    use anyhow::anyhow;

    fn det(class_id: u32, confidence: f32) -> Detection {
        Detection {
            x1: 10.4,
            y1: 20.6,
            x2: 50.0,
            y2: 80.9,
            confidence,
            class_id,
        }
    }

    fn frame() -> Frame {
        Frame::from_rgb(vec![0u8; 12], 2, 2).unwrap()
    }

    #[test]
    fn keeps_only_confident_vehicles() -> Result<()> {
        let backend = StubBackend::with_detections(vec![
            det(COCO_CAR, 0.9),
            det(0, 0.99),         // person
            det(COCO_BUS, 0.41),
            det(COCO_TRUCK, 0.4), // at threshold
            det(3, 0.8),          // motorcycle
            det(COCO_TRUCK, 0.75),
        ]);
        let detector = VehicleDetector::new(Arc::new(backend));

        let boxes = detector.detect(&frame())?;
        let classes: Vec<u32> = boxes.iter().map(|b| b.class_id).collect();
        assert_eq!(classes, vec![COCO_CAR, COCO_BUS, COCO_TRUCK]);
        assert_eq!((boxes[0].x1, boxes[0].y1, boxes[0].x2, boxes[0].y2), (10, 20, 50, 80));
        Ok(())
    }

    #[test]
    fn threshold_and_classes_are_configurable() -> Result<()> {
        let backend = StubBackend::with_detections(vec![det(COCO_CAR, 0.5), det(3, 0.5)]);
        let detector = VehicleDetector::new(Arc::new(backend))
            .with_threshold(0.6)
            .with_classes(vec![COCO_CAR, 3]);
        assert!(detector.detect(&frame())?.is_empty());

        let detector = detector.with_threshold(0.2);
        assert_eq!(detector.detect(&frame())?.len(), 2);
        Ok(())
    }

    struct BrokenBackend;

    impl DetectorBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
            Err(anyhow!("inference crashed"))
        }
    }

    #[test]
    fn backend_errors_propagate() {
        let detector = VehicleDetector::new(Arc::new(BrokenBackend));
        let err = detector.detect(&frame()).unwrap_err();
        assert!(format!("{err:#}").contains("inference crashed"));
        assert_eq!(detector.backend_name(), "broken");
    }
}
