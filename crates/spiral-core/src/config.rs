//! Tunable planner limits and terrain safety thresholds.

use crate::error::{PlanError, PlanResult};
use serde::{Deserialize, Serialize};

/// Configuration for path generation and the waypoint budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Hard ceiling on waypoints across the whole mission
    pub max_total_waypoints: usize,
    /// Part of the ceiling held back for safety waypoints
    pub reserved_safety_waypoints: usize,
    /// Interpolated waypoints between consecutive control points
    pub midpoints_per_segment: usize,
    /// Assumed cruise speed used to turn path length into flight time
    pub cruise_speed_mps: f64,
    /// rHold / r0
    pub hold_ratio: f64,
    /// Smallest r0 the optimizer will produce
    pub min_start_radius_ft: f64,
    /// Smallest radial gap between consecutive bounces
    pub min_bounce_spacing_ft: f64,
    /// Upper bound of the bounce-count search
    pub max_bounces: u32,
    /// Regulatory ceiling for the height envelope (FAA Part 107 ~400ft)
    pub max_altitude_ft: f64,
    /// Wall-clock budget for a whole mission, milliseconds
    pub time_budget_ms: Option<u64>,
    pub terrain: TerrainSafetyConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_total_waypoints: 99,
            reserved_safety_waypoints: 15,
            midpoints_per_segment: 2,
            cruise_speed_mps: 8.0,
            hold_ratio: 4.0,
            min_start_radius_ft: 30.0,
            min_bounce_spacing_ft: 15.0,
            max_bounces: 64,
            max_altitude_ft: 400.0,
            time_budget_ms: None,
            terrain: TerrainSafetyConfig::default(),
        }
    }
}

impl PlannerConfig {
    /// Waypoints available to path generation after the safety reserve.
    pub fn planning_budget(&self) -> usize {
        self.max_total_waypoints
            .saturating_sub(self.reserved_safety_waypoints)
    }

    pub fn validate(&self) -> PlanResult<()> {
        if self.reserved_safety_waypoints >= self.max_total_waypoints {
            return Err(PlanError::InvalidConfig(format!(
                "reserved safety waypoints ({}) must be below the total ceiling ({})",
                self.reserved_safety_waypoints, self.max_total_waypoints
            )));
        }
        if !(self.cruise_speed_mps.is_finite() && self.cruise_speed_mps > 0.0) {
            return Err(PlanError::InvalidConfig(
                "cruise speed must be positive".to_string(),
            ));
        }
        if !(self.hold_ratio.is_finite() && self.hold_ratio > 1.0) {
            return Err(PlanError::InvalidConfig(format!(
                "hold ratio must exceed 1.0, got {}",
                self.hold_ratio
            )));
        }
        if !(self.min_start_radius_ft > 0.0) || self.min_bounce_spacing_ft < 0.0 {
            return Err(PlanError::InvalidConfig(
                "radius floors must be positive".to_string(),
            ));
        }
        if self.max_bounces < 1 {
            return Err(PlanError::InvalidConfig(
                "max_bounces must be at least 1".to_string(),
            ));
        }
        if !(self.max_altitude_ft > 0.0) {
            return Err(PlanError::InvalidConfig(
                "altitude ceiling must be positive".to_string(),
            ));
        }
        self.terrain.validate()
    }
}

/// Thresholds for terrain anomaly detection between waypoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainSafetyConfig {
    /// Segments at or below this ground distance get no interior samples
    pub safe_distance_ft: f64,
    /// Terrain rise above the straight-line profile flagged as an anomaly
    pub anomaly_threshold_ft: f64,
    /// Terrain rise flagged as critical
    pub critical_threshold_ft: f64,
    /// Clearance kept above hazardous terrain
    pub safety_buffer_ft: f64,
    /// Distance between interior samples
    pub sample_spacing_ft: f64,
    pub max_samples_per_segment: usize,
    /// Fail the mission instead of flagging unverified segments
    pub strict: bool,
}

impl Default for TerrainSafetyConfig {
    fn default() -> Self {
        Self {
            safe_distance_ft: 200.0,
            anomaly_threshold_ft: 15.0,
            critical_threshold_ft: 50.0,
            safety_buffer_ft: 100.0,
            sample_spacing_ft: 50.0,
            max_samples_per_segment: 64,
            strict: false,
        }
    }
}

impl TerrainSafetyConfig {
    pub fn validate(&self) -> PlanResult<()> {
        if !(self.safe_distance_ft >= 0.0) {
            return Err(PlanError::InvalidConfig(
                "safe distance must not be negative".to_string(),
            ));
        }
        if !(self.anomaly_threshold_ft >= 0.0) {
            return Err(PlanError::InvalidConfig(
                "anomaly threshold must not be negative".to_string(),
            ));
        }
        if self.critical_threshold_ft < self.anomaly_threshold_ft {
            return Err(PlanError::InvalidConfig(format!(
                "critical threshold ({}ft) is below the anomaly threshold ({}ft)",
                self.critical_threshold_ft, self.anomaly_threshold_ft
            )));
        }
        if !(self.safety_buffer_ft >= 0.0) {
            return Err(PlanError::InvalidConfig(
                "safety buffer must not be negative".to_string(),
            ));
        }
        if !(self.sample_spacing_ft > 0.0) || self.max_samples_per_segment == 0 {
            return Err(PlanError::InvalidConfig(
                "terrain sampling density must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
