//! detect_frame - one-shot occupancy check for a single image
//!
//! Runs the configured detector over an image file and prints the occupancy
//! report as JSON on stdout.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use parking_occupancy::{
    assess_frame, build_detector, CoordinateStore, Frame, ServiceConfig, Zone,
};

#[derive(Parser, Debug)]
#[command(
    name = "detect_frame",
    about = "Report which parking zones are occupied in an image"
)]
struct Args {
    /// Image file (JPEG, PNG or WebP)
    #[arg(long, value_name = "PATH")]
    image: PathBuf,

    /// Saved layout name in the coordinate directory
    #[arg(long, value_name = "NAME", conflicts_with = "zones")]
    layout: Option<String>,

    /// JSON file containing a list of [x1, y1, x2, y2] zones
    #[arg(long, value_name = "PATH", conflicts_with = "layout")]
    zones: Option<PathBuf>,

    /// Config file (TOML or JSON); defaults to $PARKING_CONFIG
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Pretty-print the report
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ServiceConfig::load_from(Some(path))?,
        None => ServiceConfig::load()?,
    };

    let zones = load_zones(&args, &config)?;
    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let frame = Frame::decode_with_limits(&bytes, &config.frame_limits)?;

    let detector = build_detector(&config.detector)?;
    let report = assess_frame(&detector, &frame, &zones)?;

    let out = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{out}");
    Ok(())
}

fn load_zones(args: &Args, config: &ServiceConfig) -> Result<Vec<Zone>> {
    if let Some(path) = &args.zones {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        return serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid zones file {}: {}", path.display(), e));
    }
    if let Some(name) = &args.layout {
        return CoordinateStore::open(&config.coordinate_dir)?.load(name);
    }
    Err(anyhow!("either --layout or --zones is required"))
}
