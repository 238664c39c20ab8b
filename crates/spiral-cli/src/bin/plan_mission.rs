//! Plan a spiral survey mission and print it as JSON.
//!
//! Terrain comes from the Open-Meteo elevation API (see `ELEVATION_*`
//! variables); planner limits come from `SPIRAL_*` variables or `--config`.

use anyhow::Context;
use clap::Parser;
use spiral_cli::{load_planner_config, summary_line};
use spiral_core::{GeoPoint, MissionPlanner, MissionRequest, TracingObserver};
use spiral_terrain::{ElevationConfig, OpenMeteoElevation};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Generate a multi-battery spiral flight path with terrain safety waypoints
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Survey center latitude in degrees
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// Survey center longitude in degrees
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Number of batteries (one pie slice each)
    #[arg(long, default_value_t = 1)]
    batteries: u32,

    /// Usable flight minutes per battery
    #[arg(long, default_value_t = 20.0)]
    minutes: f64,

    /// Altitude at the center, feet above home
    #[arg(long, default_value_t = 100.0)]
    min_height: f64,

    /// Altitude at the hold radius, feet above home
    #[arg(long, default_value_t = 300.0)]
    max_height: f64,

    /// Fail instead of flagging segments whose terrain could not be checked
    #[arg(long)]
    strict_terrain: bool,

    /// Planner configuration JSON, applied before SPIRAL_* variables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the mission here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spiral=info".parse()?)
                .add_directive("plan_mission=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = load_planner_config(args.config.as_deref())?;
    if args.strict_terrain {
        config.terrain.strict = true;
    }
    let elevation = OpenMeteoElevation::new(ElevationConfig::from_env())?;
    tracing::info!(
        provider = %elevation.config().provider_url,
        max_points = elevation.config().max_points_per_request,
        "elevation provider ready"
    );

    let request = MissionRequest {
        center: GeoPoint::new(args.lat, args.lon),
        batteries: args.batteries,
        battery_minutes: args.minutes,
        min_height_ft: args.min_height,
        max_height_ft: args.max_height,
    };
    let observer = TracingObserver;
    let mission = MissionPlanner::new(&config, &elevation, &observer)
        .plan(&request)
        .context("mission planning failed")?;

    let json = serde_json::to_string_pretty(&mission)?;
    match &args.output {
        Some(path) => fs::write(path, json + "\n")
            .with_context(|| format!("writing mission to {}", path.display()))?,
        None => println!("{json}"),
    }
    eprintln!("{}", summary_line(&mission));

    Ok(())
}
