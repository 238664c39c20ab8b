//! Spiral path construction for a single battery slice.
//!
//! Each slice owns a pie wedge of width `2π / slices`. The outbound leg
//! starts at the mission center and bounces between the wedge edges while
//! the radius grows geometrically from `r0`; the hold leg reaches `rHold`;
//! the inbound leg revisits the same radii in reverse with bounces mirrored
//! across the wedge bisector, so inbound arms cross the outbound ones.

use crate::error::{PlanError, PlanResult};
use crate::models::{GeoPoint, HeightBounds, SpiralParameters, Waypoint, WaypointPhase};
use crate::spatial::{sample_spiral, LocalFrame, PlanarPoint, PolarPoint};
use std::f64::consts::PI;

/// Exact number of waypoints [`PathBuilder::build_slice`] emits.
///
/// ```text
/// 1                      slice start
/// + N * (m + 1)          outbound bounces and their midpoints
/// + m + 1                hold midpoints and hold end
/// + m                    first inbound segment midpoints
/// + N                    inbound bounces
/// + (N - 1) * m          remaining inbound segments
/// ```
pub fn slice_waypoint_count(bounces: u32, midpoints_per_segment: usize) -> usize {
    let n = bounces as usize;
    let m = midpoints_per_segment;
    1 + n * (m + 1) + m + 1 + m + n + n.saturating_sub(1) * m
}

/// Horizontal length of a slice flown with `params`, including the
/// return-to-home leg. Independent of the slice index.
pub fn slice_length_ft(params: &SpiralParameters, midpoints_per_segment: usize) -> PlanResult<f64> {
    params.validate()?;
    let points: Vec<PlanarPoint> = trace_slice(0, params, midpoints_per_segment)
        .into_iter()
        .map(|(polar, _)| polar.to_planar())
        .collect();
    Ok(planar_length_with_return(&points))
}

/// Horizontal length of built waypoints plus the leg back to the first one.
pub fn path_length_ft(waypoints: &[Waypoint]) -> f64 {
    let points: Vec<PlanarPoint> = waypoints.iter().map(Waypoint::local).collect();
    planar_length_with_return(&points)
}

fn planar_length_with_return(points: &[PlanarPoint]) -> f64 {
    let legs: f64 = points
        .windows(2)
        .map(|pair| pair[0].distance_to(&pair[1]))
        .sum();
    let home_leg = match (points.first(), points.last()) {
        (Some(home), Some(last)) => last.distance_to(home),
        _ => 0.0,
    };
    legs + home_leg
}

/// Polar control points and midpoints of one slice, in flight order.
fn trace_slice(
    slice_index: u32,
    params: &SpiralParameters,
    midpoints: usize,
) -> Vec<(PolarPoint, WaypointPhase)> {
    let n = params.bounces;
    let wedge = 2.0 * PI / params.slices as f64;
    let base = slice_index as f64 * wedge;
    let growth = params.r_hold_ft / params.r0_ft;

    // Odd bounces sit on the far edge, even ones on the near edge.
    let edge = |k: u32| if k % 2 == 1 { base + wedge } else { base };
    let radius = |k: u32| params.r0_ft * growth.powf((k - 1) as f64 / n as f64);

    let mut points = Vec::with_capacity(slice_waypoint_count(n, midpoints));
    let start = PolarPoint::new(0.0, base);
    points.push((start, WaypointPhase::OutboundStart));

    let mut previous = start;
    for k in 1..=n {
        let bounce = PolarPoint::new(radius(k), edge(k));
        push_segment(&mut points, previous, bounce, midpoints, |index| {
            WaypointPhase::OutboundMid { bounce: k, index }
        });
        points.push((bounce, WaypointPhase::OutboundBounce { bounce: k }));
        previous = bounce;
    }

    let hold = PolarPoint::new(params.r_hold_ft, edge(n + 1));
    push_segment(&mut points, previous, hold, midpoints, |index| {
        WaypointPhase::HoldMid { index }
    });
    points.push((hold, WaypointPhase::HoldEnd));
    previous = hold;

    for j in 1..=n {
        let mirrored = n + 1 - j;
        let bounce = PolarPoint::new(radius(mirrored), edge(mirrored + 1));
        push_segment(&mut points, previous, bounce, midpoints, |index| {
            WaypointPhase::InboundMid { bounce: j, index }
        });
        points.push((bounce, WaypointPhase::InboundBounce { bounce: j }));
        previous = bounce;
    }

    points
}

fn push_segment<F>(
    points: &mut Vec<(PolarPoint, WaypointPhase)>,
    from: PolarPoint,
    to: PolarPoint,
    midpoints: usize,
    phase: F,
) where
    F: Fn(u32) -> WaypointPhase,
{
    for (i, polar) in sample_spiral(from, to, midpoints).into_iter().enumerate() {
        points.push((polar, phase(i as u32 + 1)));
    }
}

/// Emits the waypoint sequence of each battery slice around a center.
#[derive(Debug, Clone)]
pub struct PathBuilder {
    frame: LocalFrame,
    heights: HeightBounds,
    midpoints_per_segment: usize,
}

impl PathBuilder {
    pub fn new(center: GeoPoint, heights: HeightBounds, midpoints_per_segment: usize) -> PlanResult<Self> {
        heights.validate(f64::INFINITY)?;
        Ok(Self {
            frame: LocalFrame::new(center)?,
            heights,
            midpoints_per_segment,
        })
    }

    pub fn midpoints_per_segment(&self) -> usize {
        self.midpoints_per_segment
    }

    /// Build the ordered waypoints of slice `slice_index`.
    ///
    /// Parameters are validated before anything is emitted, so an error
    /// never comes with partial output.
    pub fn build_slice(&self, slice_index: u32, params: &SpiralParameters) -> PlanResult<Vec<Waypoint>> {
        params.validate()?;
        if slice_index >= params.slices {
            return Err(PlanError::InvalidSpiralParameters(format!(
                "slice index {} outside {} slices",
                slice_index, params.slices
            )));
        }

        let waypoints: Vec<Waypoint> = trace_slice(slice_index, params, self.midpoints_per_segment)
            .into_iter()
            .map(|(polar, phase)| {
                let local = polar.to_planar();
                Waypoint::new(
                    self.frame.unproject(local),
                    local,
                    self.heights.altitude_at(polar.radius_ft, params.r_hold_ft),
                    phase,
                )
            })
            .collect();

        debug_assert_eq!(
            waypoints.len(),
            slice_waypoint_count(params.bounces, self.midpoints_per_segment)
        );
        Ok(waypoints)
    }
}
