//! End-to-end mission generation.

use crate::battery::BatteryOptimizer;
use crate::config::PlannerConfig;
use crate::elevation::ElevationSource;
use crate::error::{PlanError, PlanResult};
use crate::models::{FlightSlice, Mission, MissionRequest, Waypoint};
use crate::observer::{PlanEvent, PlanObserver};
use crate::path_builder::{path_length_ft, PathBuilder};
use crate::terrain_safety::{
    insert_safety_waypoints, raise_waypoints, select_within_budget, AltitudeLift, SafetyInsertion,
    TerrainSafetyAnalyzer, UnverifiedSegment,
};
use chrono::Utc;
use std::time::{Duration, Instant};

/// Runs optimizer, path builder and terrain analysis for one request.
///
/// Holds no state between calls; each [`plan`](MissionPlanner::plan)
/// produces a complete mission or an error, never a partial path.
pub struct MissionPlanner<'a> {
    config: &'a PlannerConfig,
    elevation: &'a dyn ElevationSource,
    observer: &'a dyn PlanObserver,
}

impl<'a> MissionPlanner<'a> {
    pub fn new(
        config: &'a PlannerConfig,
        elevation: &'a dyn ElevationSource,
        observer: &'a dyn PlanObserver,
    ) -> Self {
        Self {
            config,
            elevation,
            observer,
        }
    }

    pub fn plan(&self, request: &MissionRequest) -> PlanResult<Mission> {
        let started = Instant::now();
        let config = self.config;
        config.validate()?;
        request.center.validate()?;
        let heights = request.heights();
        heights.validate(config.max_altitude_ft)?;

        let optimizer = BatteryOptimizer::new(config, self.observer);
        let optimized = optimizer.optimize_spiral_for_battery(
            request.battery_minutes,
            request.batteries,
            request.center.latitude,
            request.center.longitude,
        )?;
        let parameters = optimized.parameters;
        self.check_deadline(started)?;

        let builder = PathBuilder::new(request.center, heights, config.midpoints_per_segment)?;
        let per_slice = config.planning_budget() / request.batteries as usize;
        let mut paths: Vec<Vec<Waypoint>> = Vec::with_capacity(request.batteries as usize);
        for index in 0..parameters.slices {
            let waypoints = builder.build_slice(index, &parameters)?;
            if waypoints.len() > per_slice {
                let detail = format!(
                    "slice {} has {} waypoints, share is {}",
                    index,
                    waypoints.len(),
                    per_slice
                );
                self.observer
                    .on_event(&PlanEvent::InvalidParameters { detail: &detail });
                return Err(PlanError::InvalidSpiralParameters(detail));
            }
            self.observer.on_event(&PlanEvent::SliceBuilt {
                slice: index,
                waypoints: waypoints.len(),
                length_ft: path_length_ft(&waypoints),
            });
            paths.push(waypoints);
        }
        self.check_deadline(started)?;

        let analyzer = TerrainSafetyAnalyzer::new(self.elevation, &config.terrain, self.observer);
        let mut candidates: Vec<SafetyInsertion> = Vec::new();
        let mut lifts: Vec<Vec<AltitudeLift>> = Vec::with_capacity(paths.len());
        let mut unverified: Vec<UnverifiedSegment> = Vec::new();
        for (index, waypoints) in (0u32..).zip(&paths) {
            let scan = analyzer.scan(index, waypoints)?;
            candidates.extend(scan.candidates);
            lifts.push(scan.lifts);
            unverified.extend(scan.unverified);
            self.check_deadline(started)?;
        }

        if config.terrain.strict && !unverified.is_empty() {
            let detail = unverified
                .first()
                .map(|segment| segment.detail.clone())
                .unwrap_or_default();
            return Err(PlanError::TerrainDataUnavailable {
                segments: unverified.len(),
                detail,
            });
        }

        let planned_total: usize = paths.iter().map(Vec::len).sum();
        let pool = config
            .reserved_safety_waypoints
            .min(config.max_total_waypoints.saturating_sub(planned_total));
        let (kept, dropped) = select_within_budget(candidates, pool);

        let mut warnings: Vec<_> = unverified.iter().map(UnverifiedSegment::to_warning).collect();
        warnings.extend(analyzer.report_dropped(&dropped));

        let slices = (0u32..)
            .zip(paths.iter().zip(&lifts))
            .map(|(index, (planned, lifts))| {
                let insertions: Vec<SafetyInsertion> = kept
                    .iter()
                    .filter(|insertion| insertion.slice == index)
                    .cloned()
                    .collect();
                let raised = raise_waypoints(planned, lifts);
                let waypoints = insert_safety_waypoints(&raised, &insertions);
                let length_ft = path_length_ft(&waypoints);
                FlightSlice {
                    index,
                    parameters,
                    length_ft,
                    estimated_minutes: optimizer.minutes_for_length(length_ft),
                    safety_waypoints: insertions.len(),
                    raised_waypoints: lifts.len(),
                    unverified_segments: unverified
                        .iter()
                        .filter(|segment| segment.slice == index)
                        .count(),
                    waypoints,
                }
            })
            .collect::<Vec<_>>();
        self.check_deadline(started)?;

        let mission = Mission {
            center: request.center,
            heights,
            slices,
            warnings,
            generated_at: Utc::now(),
        };
        tracing::info!(
            slices = mission.slices.len(),
            waypoints = mission.total_waypoints(),
            warnings = mission.warnings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "mission planned"
        );
        Ok(mission)
    }

    fn check_deadline(&self, started: Instant) -> PlanResult<()> {
        match self.config.time_budget_ms {
            Some(budget_ms) if started.elapsed() > Duration::from_millis(budget_ms) => {
                Err(PlanError::DeadlineExceeded { budget_ms })
            }
            _ => Ok(()),
        }
    }
}
