use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Stub backend returning a fixed set of detections for every frame.
///
/// Used when no model is configured and in tests. Detections that extend past
/// the frame are returned as-is.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    detections: Vec<Detection>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.detections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_replays_scripted_detections() -> Result<()> {
        let det = Detection {
            x1: 1.0,
            y1: 2.0,
            x2: 30.0,
            y2: 40.0,
            confidence: 0.8,
            class_id: 7,
        };
        let backend = StubBackend::with_detections(vec![det]);
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2)?;

        assert_eq!(backend.detect(&frame)?, vec![det]);
        assert_eq!(backend.detect(&frame)?, vec![det]);
        assert!(StubBackend::new().detect(&frame)?.is_empty());
        Ok(())
    }
}
