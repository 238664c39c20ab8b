//! Structured planning events.
//!
//! Planner components report through a [`PlanObserver`] passed by
//! reference instead of logging to global state directly. The
//! [`TracingObserver`] forwards everything to `tracing`.

use crate::models::{HazardSeverity, SpiralParameters};

/// Something worth recording while a mission is generated.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanEvent<'a> {
    ParametersSelected {
        parameters: &'a SpiralParameters,
        estimated_waypoints: usize,
        estimated_minutes: f64,
        evaluations: u32,
    },
    SliceBuilt {
        slice: u32,
        waypoints: usize,
        length_ft: f64,
    },
    HazardDetected {
        slice: u32,
        severity: HazardSeverity,
        deviation_ft: f64,
        latitude: f64,
        longitude: f64,
    },
    /// An existing waypoint climbed to keep its terrain clearance.
    WaypointRaised {
        slice: u32,
        index: usize,
        from_ft: f64,
        to_ft: f64,
    },
    SegmentUnverified {
        slice: u32,
        start_index: usize,
        end_index: usize,
        detail: &'a str,
    },
    SafetyWaypointsDropped {
        slice: u32,
        severity: HazardSeverity,
        count: usize,
    },
    /// Should be unreachable when the optimizer is correct.
    InvalidParameters { detail: &'a str },
}

pub trait PlanObserver {
    fn on_event(&self, event: &PlanEvent<'_>);
}

/// Observer that delegates to the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PlanObserver for TracingObserver {
    fn on_event(&self, event: &PlanEvent<'_>) {
        match event {
            PlanEvent::ParametersSelected {
                parameters,
                estimated_waypoints,
                estimated_minutes,
                evaluations,
            } => tracing::info!(
                slices = parameters.slices,
                bounces = parameters.bounces,
                r0_ft = parameters.r0_ft,
                r_hold_ft = parameters.r_hold_ft,
                estimated_waypoints,
                estimated_minutes,
                evaluations,
                "spiral parameters selected"
            ),
            PlanEvent::SliceBuilt {
                slice,
                waypoints,
                length_ft,
            } => tracing::debug!(slice, waypoints, length_ft, "slice built"),
            PlanEvent::HazardDetected {
                slice,
                severity,
                deviation_ft,
                latitude,
                longitude,
            } => tracing::info!(
                slice,
                severity = %severity,
                deviation_ft,
                latitude,
                longitude,
                "terrain hazard detected"
            ),
            PlanEvent::WaypointRaised {
                slice,
                index,
                from_ft,
                to_ft,
            } => tracing::info!(slice, index, from_ft, to_ft, "waypoint raised over terrain"),
            PlanEvent::SegmentUnverified {
                slice,
                start_index,
                end_index,
                detail,
            } => tracing::warn!(
                slice,
                start_index,
                end_index,
                detail,
                "terrain unverified between waypoints"
            ),
            PlanEvent::SafetyWaypointsDropped {
                slice,
                severity,
                count,
            } => tracing::warn!(
                slice,
                severity = %severity,
                count,
                "safety waypoint reserve exhausted; hazards left unmitigated"
            ),
            PlanEvent::InvalidParameters { detail } => {
                tracing::error!(detail, "optimizer produced invalid spiral parameters")
            }
        }
    }
}

/// Observer that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PlanObserver for NoopObserver {
    fn on_event(&self, _event: &PlanEvent<'_>) {}
}
