//! Planner configuration from an optional JSON file and the environment.

use anyhow::{Context, Result};
use spiral_core::PlannerConfig;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Load the planner configuration: defaults, then the JSON file when given,
/// then `SPIRAL_*` environment variables.
pub fn load_planner_config(path: Option<&Path>) -> Result<PlannerConfig> {
    let base = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading planner config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing planner config {}", path.display()))?
        }
        None => PlannerConfig::default(),
    };
    let config = planner_config_from_lookup(base, |key| env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Apply `SPIRAL_*` overrides from `lookup` on top of `base`. Unparsable
/// values are ignored.
pub fn planner_config_from_lookup<F>(base: PlannerConfig, lookup: F) -> PlannerConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = base;
    override_with(&lookup, "SPIRAL_MAX_TOTAL_WAYPOINTS", &mut config.max_total_waypoints);
    override_with(
        &lookup,
        "SPIRAL_RESERVED_SAFETY_WAYPOINTS",
        &mut config.reserved_safety_waypoints,
    );
    override_with(
        &lookup,
        "SPIRAL_MIDPOINTS_PER_SEGMENT",
        &mut config.midpoints_per_segment,
    );
    override_with(&lookup, "SPIRAL_CRUISE_SPEED_MPS", &mut config.cruise_speed_mps);
    override_with(&lookup, "SPIRAL_HOLD_RATIO", &mut config.hold_ratio);
    override_with(&lookup, "SPIRAL_MIN_START_RADIUS_FT", &mut config.min_start_radius_ft);
    override_with(&lookup, "SPIRAL_MIN_BOUNCE_SPACING_FT", &mut config.min_bounce_spacing_ft);
    override_with(&lookup, "SPIRAL_MAX_BOUNCES", &mut config.max_bounces);
    override_with(&lookup, "SPIRAL_MAX_ALTITUDE_FT", &mut config.max_altitude_ft);
    if let Some(ms) = parsed(&lookup, "SPIRAL_TIME_BUDGET_MS") {
        config.time_budget_ms = Some(ms).filter(|&ms: &u64| ms > 0);
    }

    let terrain = &mut config.terrain;
    override_with(&lookup, "SPIRAL_SAFE_DISTANCE_FT", &mut terrain.safe_distance_ft);
    override_with(&lookup, "SPIRAL_ANOMALY_THRESHOLD_FT", &mut terrain.anomaly_threshold_ft);
    override_with(&lookup, "SPIRAL_CRITICAL_THRESHOLD_FT", &mut terrain.critical_threshold_ft);
    override_with(&lookup, "SPIRAL_SAFETY_BUFFER_FT", &mut terrain.safety_buffer_ft);
    override_with(&lookup, "SPIRAL_SAMPLE_SPACING_FT", &mut terrain.sample_spacing_ft);
    override_with(
        &lookup,
        "SPIRAL_MAX_SAMPLES_PER_SEGMENT",
        &mut terrain.max_samples_per_segment,
    );
    if let Some(strict) = lookup("SPIRAL_STRICT_TERRAIN").and_then(|v| parse_flag(&v)) {
        terrain.strict = strict;
    }
    config
}

fn override_with<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(value) = parsed(lookup, key) {
        *slot = value;
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
