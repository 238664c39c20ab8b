//! Bounce-count search that fits a spiral to one battery.
//!
//! Waypoint count grows strictly with the bounce count `N`, and so does the
//! slice length for fixed radii. Once radii are scaled so the slice length
//! matches the battery target, a larger `N` therefore means a smaller `r0`
//! and tighter radial gaps. Every feasibility condition holds for a prefix
//! `1..=N*`, which makes a binary search over `[1, max_bounces]` exact. It
//! evaluates at most `ceil(log2(max_bounces)) + 1` candidates and always
//! terminates.

use crate::config::PlannerConfig;
use crate::error::{PlanError, PlanResult};
use crate::models::SpiralParameters;
use crate::observer::{PlanEvent, PlanObserver};
use crate::path_builder::{slice_length_ft, slice_waypoint_count};
use crate::spatial::{meters_to_feet, validate_coordinate};
use serde::Serialize;

/// Parameters chosen for a battery and what they are expected to yield.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OptimizedSpiral {
    pub parameters: SpiralParameters,
    pub estimated_waypoints: usize,
    pub estimated_length_ft: f64,
    pub estimated_minutes: f64,
    /// Candidates evaluated by the search
    pub evaluations: u32,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    parameters: SpiralParameters,
    waypoints: usize,
}

impl Candidate {
    /// Radii grow by a constant ratio per bounce, so the first gap is the narrowest.
    fn narrowest_gap_ft(&self) -> f64 {
        let p = &self.parameters;
        let step = (p.r_hold_ft / p.r0_ft).powf(1.0 / p.bounces as f64);
        p.r0_ft * (step - 1.0)
    }
}

pub struct BatteryOptimizer<'a> {
    config: &'a PlannerConfig,
    observer: &'a dyn PlanObserver,
}

impl<'a> BatteryOptimizer<'a> {
    pub fn new(config: &'a PlannerConfig, observer: &'a dyn PlanObserver) -> Self {
        Self { config, observer }
    }

    /// Flight time in minutes for a horizontal path length.
    pub fn minutes_for_length(&self, length_ft: f64) -> f64 {
        length_ft / meters_to_feet(self.config.cruise_speed_mps) / 60.0
    }

    /// Pick the largest bounce count whose slice fits the per-battery share
    /// of the waypoint budget, with radii scaled so one slice takes
    /// `target_battery_minutes` at cruise speed.
    pub fn optimize_spiral_for_battery(
        &self,
        target_battery_minutes: f64,
        num_batteries: u32,
        center_lat: f64,
        center_lon: f64,
    ) -> PlanResult<OptimizedSpiral> {
        validate_coordinate(center_lat, center_lon)?;
        if num_batteries == 0 {
            return Err(PlanError::InvalidRequest(
                "at least one battery is required".to_string(),
            ));
        }
        if !(target_battery_minutes.is_finite() && target_battery_minutes > 0.0) {
            return Err(PlanError::InvalidRequest(format!(
                "battery duration must be positive, got {target_battery_minutes} minutes"
            )));
        }

        let midpoints = self.config.midpoints_per_segment;
        let per_slice = self.config.planning_budget() / num_batteries as usize;
        let minimum = slice_waypoint_count(1, midpoints);
        if minimum > per_slice {
            return Err(PlanError::BudgetExceeded {
                required: minimum,
                available: per_slice,
            });
        }

        let target_ft =
            meters_to_feet(target_battery_minutes * 60.0 * self.config.cruise_speed_mps);
        let evaluate = |bounces: u32| -> PlanResult<Candidate> {
            let unit = SpiralParameters {
                slices: num_batteries,
                bounces,
                r0_ft: 1.0,
                r_hold_ft: self.config.hold_ratio,
            };
            let scale = target_ft / slice_length_ft(&unit, midpoints)?;
            Ok(Candidate {
                parameters: SpiralParameters {
                    r0_ft: scale,
                    r_hold_ft: scale * self.config.hold_ratio,
                    ..unit
                },
                waypoints: slice_waypoint_count(bounces, midpoints),
            })
        };
        let feasible = |candidate: &Candidate| {
            candidate.waypoints <= per_slice
                && candidate.parameters.r0_ft >= self.config.min_start_radius_ft
                && candidate.narrowest_gap_ft() >= self.config.min_bounce_spacing_ft
        };

        let mut best = evaluate(1)?;
        let mut evaluations = 1u32;
        if !feasible(&best) {
            return Err(PlanError::InvalidRequest(format!(
                "{target_battery_minutes} minutes per battery is too short for a {:.0}ft start radius",
                self.config.min_start_radius_ft
            )));
        }

        let (mut lo, mut hi) = (1u32, self.config.max_bounces.max(1));
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            let candidate = evaluate(mid)?;
            evaluations += 1;
            if feasible(&candidate) {
                lo = mid;
                best = candidate;
            } else {
                hi = mid - 1;
            }
        }

        let parameters = best.parameters;
        if let Err(err) = parameters.validate() {
            let detail = err.to_string();
            self.observer
                .on_event(&PlanEvent::InvalidParameters { detail: &detail });
            return Err(err);
        }

        let estimated_length_ft = slice_length_ft(&parameters, midpoints)?;
        let result = OptimizedSpiral {
            parameters,
            estimated_waypoints: best.waypoints,
            estimated_length_ft,
            estimated_minutes: self.minutes_for_length(estimated_length_ft),
            evaluations,
        };
        self.observer.on_event(&PlanEvent::ParametersSelected {
            parameters: &result.parameters,
            estimated_waypoints: result.estimated_waypoints,
            estimated_minutes: result.estimated_minutes,
            evaluations,
        });
        Ok(result)
    }
}
