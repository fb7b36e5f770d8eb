//! parking_api - parking zone occupancy service
//!
//! This daemon:
//! 1. Loads the service configuration (file + env)
//! 2. Loads the detector backend once
//! 3. Serves `/detect` and `/save-coordinates` until Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use parking_occupancy::{
    api::{ApiConfig, ApiServer},
    build_detector, CoordinateStore, ServiceConfig,
};

#[derive(Parser, Debug)]
#[command(name = "parking_api", about = "Serve parking zone occupancy detection")]
struct Args {
    /// Config file (TOML or JSON); defaults to $PARKING_CONFIG
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServiceConfig::load_from(Some(path))?,
        None => ServiceConfig::load()?,
    };
    if let Some(addr) = args.addr {
        config.api_addr = addr;
    }

    let detector = build_detector(&config.detector)?;
    let store = CoordinateStore::open(&config.coordinate_dir)?;
    log::info!("zone layouts stored in {}", store.dir().display());

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_body_bytes: config.max_body_bytes,
        request_timeout: config.request_timeout,
        max_connections: config.max_connections,
        frame_limits: config.frame_limits,
        ..ApiConfig::default()
    };
    let api_handle = ApiServer::new(api_config, detector, store).spawn()?;
    log::info!("parking api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("parking_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
