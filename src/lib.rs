//! Parking zone occupancy.
//!
//! Takes a camera frame and a set of user-drawn rectangular zones (one per
//! parking space), runs a vehicle detector over the frame and reports which
//! zones are occupied.
//!
//! # Module Structure
//!
//! - `frame`: base64 / data URL decoding into RGB frames
//! - `detect`: detector backends (stub, tract ONNX) and the vehicle filter
//! - `occupancy`: box/zone overlap rule and per-zone evaluation
//! - `monitor`: frame -> boxes -> statuses pipeline
//! - `storage`: saved zone layouts
//! - `config`, `api`: service configuration and HTTP endpoint

use anyhow::{anyhow, Result};
use std::sync::Arc;

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod monitor;
pub mod occupancy;
pub mod storage;

pub use config::{BackendKind, DetectorSettings, ServiceConfig};
pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectorBackend, StubBackend, VehicleDetector,
};
pub use frame::{Frame, FrameLimits};
pub use monitor::{assess_frame, OccupancyReport};
pub use occupancy::{evaluate, Zone, ZoneStatus, OCCUPANCY_RATIO_THRESHOLD};
pub use storage::CoordinateStore;

/// Build the vehicle detector described by `settings`.
///
/// The stub backend is always registered; the tract backend is loaded only
/// when selected, since loading the model is expensive.
pub fn build_detector(settings: &DetectorSettings) -> Result<VehicleDetector> {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());

    let selected = match settings.backend {
        BackendKind::Stub => {
            log::warn!(
                "stub detector backend selected: no vehicles will be detected and every zone reports free"
            );
            "stub"
        }
        BackendKind::Tract => {
            register_tract(&mut registry, settings)?;
            "tract"
        }
    };
    registry.set_default(selected)?;

    let backend: Arc<dyn DetectorBackend> = registry
        .default_backend()
        .ok_or_else(|| anyhow!("no detector backend registered"))?;
    backend.warm_up()?;
    log::info!(
        "detector backend '{}' ready (available: {})",
        backend.name(),
        registry.list().join(", ")
    );

    Ok(VehicleDetector::new(backend)
        .with_threshold(settings.confidence_threshold)
        .with_classes(settings.vehicle_classes.clone()))
}

#[cfg(feature = "backend-tract")]
fn register_tract(registry: &mut BackendRegistry, settings: &DetectorSettings) -> Result<()> {
    let backend = detect::TractBackend::new(&settings.model_path, settings.input_size)?;
    registry.register(backend);
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
fn register_tract(_registry: &mut BackendRegistry, settings: &DetectorSettings) -> Result<()> {
    Err(anyhow!(
        "tract backend requested for {} but this build lacks the 'backend-tract' feature",
        settings.model_path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn settings(backend: BackendKind) -> DetectorSettings {
        DetectorSettings {
            backend,
            model_path: PathBuf::from("missing-model.onnx"),
            input_size: 640,
            confidence_threshold: 0.4,
            vehicle_classes: vec![2, 5, 7],
        }
    }

    #[test]
    fn stub_detector_builds() -> Result<()> {
        let detector = build_detector(&settings(BackendKind::Stub))?;
        assert_eq!(detector.backend_name(), "stub");
        Ok(())
    }

    #[test]
    fn tract_without_model_fails() {
        // Either the feature is off or the model file does not exist.
        assert!(build_detector(&settings(BackendKind::Tract)).is_err());
    }
}
