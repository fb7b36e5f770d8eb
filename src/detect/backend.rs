use anyhow::Result;

use crate::frame::Frame;
use crate::detect::result::Detection;

/// Object detector oracle.
///
/// A backend maps a frame to raw candidate detections of every class it knows.
/// Filtering down to vehicles happens in `VehicleDetector`, not here.
///
/// Backends are shared between concurrent requests, so `detect` takes `&self`
/// and a loaded model must be treated as read-only.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
