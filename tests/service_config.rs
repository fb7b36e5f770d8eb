use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::Builder;

use parking_occupancy::config::{BackendKind, ServiceConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PARKING_CONFIG",
        "PARKING_API_ADDR",
        "PARKING_COORDINATE_DIR",
        "PARKING_BACKEND",
        "PARKING_MODEL_PATH",
        "PARKING_CONFIDENCE_THRESHOLD",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "api": { "addr": "0.0.0.0:8080", "max_body_bytes": 1048576 },
        "detector": {
            "backend": "tract",
            "model_path": "models/yolov8n.onnx",
            "input_size": 320,
            "confidence_threshold": 0.5,
            "vehicle_classes": [2, 7]
        },
        "storage": { "coordinate_dir": "/var/lib/parking/zones" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("PARKING_CONFIG", file.path());
    std::env::set_var("PARKING_BACKEND", "stub");
    std::env::set_var("PARKING_CONFIDENCE_THRESHOLD", "0.55");

    let cfg = ServiceConfig::load().expect("load config");

    assert_eq!(cfg.api_addr, "0.0.0.0:8080");
    assert_eq!(cfg.max_body_bytes, 1_048_576);
    assert_eq!(cfg.detector.backend, BackendKind::Stub);
    assert_eq!(cfg.detector.model_path, PathBuf::from("models/yolov8n.onnx"));
    assert_eq!(cfg.detector.input_size, 320);
    assert_eq!(cfg.detector.confidence_threshold, 0.55);
    assert_eq!(cfg.detector.vehicle_classes, vec![2, 7]);
    assert_eq!(cfg.coordinate_dir, PathBuf::from("/var/lib/parking/zones"));

    clear_env();
}

#[test]
fn loads_toml_config_from_explicit_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        [api]
        addr = "127.0.0.1:5050"

        [storage]
        coordinate_dir = "zones"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("PARKING_COORDINATE_DIR", "override-zones");

    let cfg = ServiceConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.api_addr, "127.0.0.1:5050");
    assert_eq!(cfg.coordinate_dir, PathBuf::from("override-zones"));
    assert_eq!(cfg.detector.backend, BackendKind::Tract);
    assert_eq!(cfg.detector.model_path, PathBuf::from("yolov8n.onnx"));
    assert_eq!(cfg.detector.confidence_threshold, 0.4);

    clear_env();
}

#[test]
fn rejects_bad_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PARKING_CONFIDENCE_THRESHOLD", "high");
    assert!(ServiceConfig::load().is_err());
    clear_env();

    std::env::set_var("PARKING_BACKEND", "darknet");
    assert!(ServiceConfig::load().is_err());
    clear_env();

    std::env::set_var("PARKING_CONFIDENCE_THRESHOLD", "1.5");
    assert!(ServiceConfig::load().is_err());
    clear_env();
}

#[test]
fn empty_env_values_are_ignored() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for key in [
        "PARKING_API_ADDR",
        "PARKING_COORDINATE_DIR",
        "PARKING_BACKEND",
        "PARKING_MODEL_PATH",
        "PARKING_CONFIDENCE_THRESHOLD",
    ] {
        std::env::set_var(key, "  ");
    }
    let cfg = ServiceConfig::load().expect("blank overrides fall back to defaults");
    assert_eq!(cfg.api_addr, "127.0.0.1:5000");
    assert_eq!(cfg.detector.backend, BackendKind::Tract);
    assert_eq!(cfg.detector.confidence_threshold, 0.4);

    clear_env();
}
