mod backend;
mod backends;
mod registry;
mod result;
mod vehicle;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::BackendRegistry;
pub use result::{BoundingBox, Detection};
pub use vehicle::{
    VehicleDetector, COCO_BUS, COCO_CAR, COCO_TRUCK, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_VEHICLE_CLASSES,
};
