//! Terrain hazard detection between waypoints.
//!
//! Straight-line interpolation between two waypoint elevations hides any
//! ridge, tower or tree line that sits between them. The ground under every
//! planned waypoint is sampled, and for every segment longer than
//! `safe_distance_ft` so is the ground along the segment. Waypoints sitting
//! lower than terrain plus the safety buffer are raised in place. Samples
//! rising above the straight-line terrain profile get safety waypoints, and
//! the flown line is then refined until it clears every sample by the
//! buffer.
//!
//! Analysis only adds waypoints and raises low ones in place. Segments are
//! measured between consecutive non-safety waypoints (anchors), so safety
//! waypoints from an earlier pass are part of the flown line and a second
//! pass over the same terrain adds nothing.

use crate::config::TerrainSafetyConfig;
use crate::elevation::{ElevationError, ElevationSource};
use crate::error::PlanResult;
use crate::models::{GeoPoint, HazardSeverity, MissionWarning, SafetyNote, Waypoint};
use crate::observer::{PlanEvent, PlanObserver};
use crate::spatial::{haversine_distance_ft, interpolate_geo, meters_to_feet, PlanarPoint};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

/// Existing safety waypoints closer than this to a hazard sample count as
/// mitigating it.
const MITIGATION_RADIUS_FT: f64 = 1.0;

/// Clearance shortfalls below this are float noise.
const CLEARANCE_TOLERANCE_FT: f64 = 1e-6;

/// A segment whose terrain could not be sampled.
#[derive(Debug, Clone, PartialEq)]
pub struct UnverifiedSegment {
    pub slice: u32,
    pub start_index: usize,
    pub end_index: usize,
    pub detail: String,
}

impl UnverifiedSegment {
    pub fn to_warning(&self) -> MissionWarning {
        MissionWarning::TerrainDataUnavailable {
            slice: self.slice,
            start_index: self.start_index,
            end_index: self.end_index,
            detail: self.detail.clone(),
        }
    }
}

/// A safety waypoint waiting to be spliced into its slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyInsertion {
    pub slice: u32,
    /// Index of the segment's first waypoint in the analyzed sequence
    pub anchor_index: usize,
    /// Position along the segment, 0..1
    pub fraction: f64,
    pub severity: HazardSeverity,
    pub deviation_ft: f64,
    pub waypoint: Waypoint,
}

impl SafetyInsertion {
    fn path_order(&self, other: &Self) -> Ordering {
        self.slice
            .cmp(&other.slice)
            .then(self.anchor_index.cmp(&other.anchor_index))
            .then(self.fraction.total_cmp(&other.fraction))
    }
}

/// A planned waypoint that must climb to keep its clearance above the
/// ground directly beneath it. Lifts cost no waypoints and are never
/// dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct AltitudeLift {
    pub slice: u32,
    /// Index in the analyzed sequence
    pub index: usize,
    pub altitude_ft: f64,
}

/// Everything one pass over a slice found.
#[derive(Debug, Clone, Default)]
pub struct TerrainScan {
    pub candidates: Vec<SafetyInsertion>,
    pub lifts: Vec<AltitudeLift>,
    pub unverified: Vec<UnverifiedSegment>,
    /// Segments long enough to need interior samples
    pub sampled_segments: usize,
    /// Calls made to the elevation source
    pub requests: usize,
}

/// Result of analyzing a single slice against its own budget.
#[derive(Debug, Clone, Default)]
pub struct TerrainSamplingOutcome {
    pub insertions: Vec<SafetyInsertion>,
    pub lifts: Vec<AltitudeLift>,
    pub dropped: Vec<SafetyInsertion>,
    pub unverified: Vec<UnverifiedSegment>,
}

struct SegmentPlan {
    start: usize,
    end: usize,
    start_slot: usize,
    end_slot: usize,
    /// Interior samples as (fraction, request slot); empty for short segments
    samples: Vec<(f64, usize)>,
}

/// Coalesced elevation request for one slice. Each waypoint is requested
/// once however many segments share it.
#[derive(Default)]
struct SampleRequest {
    points: Vec<GeoPoint>,
    by_waypoint: HashMap<usize, usize>,
}

impl SampleRequest {
    fn push(&mut self, point: GeoPoint) -> usize {
        self.points.push(point);
        self.points.len() - 1
    }

    fn waypoint_slot(&mut self, index: usize, point: GeoPoint) -> usize {
        if let Some(&slot) = self.by_waypoint.get(&index) {
            return slot;
        }
        let slot = self.push(point);
        self.by_waypoint.insert(index, slot);
        slot
    }
}

/// Elevations by request slot; failed chunks leave `None`.
struct SampledTerrain {
    elevations_m: Vec<Option<f64>>,
    failures: Vec<(Range<usize>, String)>,
}

impl SampledTerrain {
    fn get(&self, slot: usize) -> Result<f64, &str> {
        match self.elevations_m.get(slot).copied().flatten() {
            Some(value) => Ok(value),
            None => Err(self
                .failures
                .iter()
                .find(|(range, _)| range.contains(&slot))
                .map(|(_, detail)| detail.as_str())
                .unwrap_or("elevation sample missing")),
        }
    }
}

/// Ground under one interior sample, relative to the home point.
#[derive(Debug, Clone, Copy)]
struct GroundSample {
    t: f64,
    elevation_m: f64,
    terrain_ft: f64,
    /// Rise above the straight line between the segment's endpoint elevations
    deviation_ft: f64,
}

/// Altitude flown along one segment as (fraction, altitude) vertices,
/// sorted by fraction.
struct FlownLine {
    vertices: Vec<(f64, f64)>,
}

impl FlownLine {
    fn new(start_ft: f64, end_ft: f64) -> Self {
        Self {
            vertices: vec![(0.0, start_ft), (1.0, end_ft)],
        }
    }

    /// Add a vertex; one already at `t` keeps the higher altitude.
    fn insert(&mut self, t: f64, altitude_ft: f64) {
        let at = self.vertices.partition_point(|&(vt, _)| vt < t);
        match self.vertices.get_mut(at) {
            Some(vertex) if vertex.0 == t => vertex.1 = vertex.1.max(altitude_ft),
            _ => self.vertices.insert(at, (t, altitude_ft)),
        }
    }

    fn altitude_at(&self, t: f64) -> f64 {
        for pair in self.vertices.windows(2) {
            let ((t0, a0), (t1, a1)) = (pair[0], pair[1]);
            if t <= t1 {
                if t1 - t0 <= f64::EPSILON {
                    return a0.max(a1);
                }
                return a0 + (a1 - a0) * ((t - t0) / (t1 - t0)).clamp(0.0, 1.0);
            }
        }
        self.vertices.last().map_or(0.0, |&(_, altitude)| altitude)
    }
}

/// A hazard found on a segment, before it becomes a [`SafetyInsertion`].
struct Hazard {
    sample: GroundSample,
    altitude_ft: f64,
    severity: HazardSeverity,
    magnitude_ft: f64,
    reason: String,
}

pub struct TerrainSafetyAnalyzer<'a> {
    source: &'a dyn ElevationSource,
    config: &'a TerrainSafetyConfig,
    observer: &'a dyn PlanObserver,
}

impl<'a> TerrainSafetyAnalyzer<'a> {
    pub fn new(
        source: &'a dyn ElevationSource,
        config: &'a TerrainSafetyConfig,
        observer: &'a dyn PlanObserver,
    ) -> Self {
        Self {
            source,
            config,
            observer,
        }
    }

    /// Analyze one slice and keep at most `budget` safety waypoints,
    /// critical hazards first. Dropped hazards are reported to the observer.
    /// Altitude lifts are always kept.
    pub fn adaptive_terrain_sampling(
        &self,
        slice: u32,
        waypoints: &[Waypoint],
        budget: usize,
    ) -> PlanResult<TerrainSamplingOutcome> {
        let scan = self.scan(slice, waypoints)?;
        let (insertions, dropped) = select_within_budget(scan.candidates, budget);
        self.report_dropped(&dropped);
        Ok(TerrainSamplingOutcome {
            insertions,
            lifts: scan.lifts,
            dropped,
            unverified: scan.unverified,
        })
    }

    /// Find every waypoint below its clearance and every unmitigated hazard
    /// along a slice.
    ///
    /// Altitudes are relative to the ground at `waypoints[0]`. Every anchor
    /// is sampled once; only segments longer than the safe distance get
    /// interior samples.
    pub fn scan(&self, slice: u32, waypoints: &[Waypoint]) -> PlanResult<TerrainScan> {
        let anchors: Vec<usize> = waypoints
            .iter()
            .enumerate()
            .filter(|(_, wp)| !wp.is_safety())
            .map(|(index, _)| index)
            .collect();
        if anchors.len() < 2 {
            return Ok(TerrainScan::default());
        }

        let mut request = SampleRequest::default();
        request.waypoint_slot(0, waypoints[0].position());
        let mut plans = Vec::with_capacity(anchors.len() - 1);
        for pair in anchors.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let (a, b) = (&waypoints[start], &waypoints[end]);
            let start_slot = request.waypoint_slot(start, a.position());
            let end_slot = request.waypoint_slot(end, b.position());

            let distance_ft = haversine_distance_ft(a.position(), b.position())?;
            let samples = if distance_ft > self.config.safe_distance_ft {
                let count = self.sample_count(distance_ft);
                (1..=count)
                    .map(|i| {
                        let t = i as f64 / (count + 1) as f64;
                        (t, request.push(interpolate_geo(a.position(), b.position(), t)))
                    })
                    .collect()
            } else {
                Vec::new()
            };
            plans.push(SegmentPlan {
                start,
                end,
                start_slot,
                end_slot,
                samples,
            });
        }

        let (terrain, requests) = self.fetch(&request.points);
        let mut scan = TerrainScan {
            sampled_segments: plans.iter().filter(|plan| !plan.samples.is_empty()).count(),
            requests,
            ..TerrainScan::default()
        };

        let reference = terrain.get(0);
        let mut altitudes: Vec<f64> = waypoints.iter().map(Waypoint::altitude_ft).collect();
        if let Ok(home_m) = reference {
            for &index in &anchors {
                let Some(elevation_m) = request
                    .by_waypoint
                    .get(&index)
                    .and_then(|&slot| terrain.get(slot).ok())
                else {
                    continue;
                };
                let required_ft = meters_to_feet(elevation_m - home_m) + self.config.safety_buffer_ft;
                let current_ft = waypoints[index].altitude_ft();
                if current_ft < required_ft - CLEARANCE_TOLERANCE_FT {
                    self.observer.on_event(&PlanEvent::WaypointRaised {
                        slice,
                        index,
                        from_ft: current_ft,
                        to_ft: required_ft,
                    });
                    altitudes[index] = required_ft;
                    scan.lifts.push(AltitudeLift {
                        slice,
                        index,
                        altitude_ft: required_ft,
                    });
                }
            }
        }

        for plan in &plans {
            let endpoints = reference.and_then(|home| {
                Ok((home, terrain.get(plan.start_slot)?, terrain.get(plan.end_slot)?))
            });
            let samples: Result<Vec<(f64, f64)>, &str> = plan
                .samples
                .iter()
                .map(|&(t, slot)| terrain.get(slot).map(|elevation| (t, elevation)))
                .collect();

            match endpoints.and_then(|ends| samples.map(|samples| (ends, samples))) {
                Ok(((home_m, start_m, end_m), samples)) => {
                    if samples.is_empty() {
                        continue;
                    }
                    let ground: Vec<GroundSample> = samples
                        .into_iter()
                        .map(|(t, elevation_m)| GroundSample {
                            t,
                            elevation_m,
                            terrain_ft: meters_to_feet(elevation_m - home_m),
                            deviation_ft: meters_to_feet(
                                elevation_m - (start_m + (end_m - start_m) * t),
                            ),
                        })
                        .collect();
                    self.detect(slice, waypoints, &altitudes, plan, &ground, &mut scan);
                }
                Err(detail) => {
                    self.observer.on_event(&PlanEvent::SegmentUnverified {
                        slice,
                        start_index: plan.start,
                        end_index: plan.end,
                        detail,
                    });
                    scan.unverified.push(UnverifiedSegment {
                        slice,
                        start_index: plan.start,
                        end_index: plan.end,
                        detail: detail.to_string(),
                    });
                }
            }
        }

        Ok(scan)
    }

    /// Emit one observer event per slice and severity and return the
    /// matching mission warnings.
    pub fn report_dropped(&self, dropped: &[SafetyInsertion]) -> Vec<MissionWarning> {
        let mut groups: BTreeMap<(u32, HazardSeverity), (usize, f64)> = BTreeMap::new();
        for insertion in dropped {
            let entry = groups
                .entry((insertion.slice, insertion.severity))
                .or_insert((0, f64::MIN));
            entry.0 += 1;
            entry.1 = entry.1.max(insertion.deviation_ft);
        }

        groups
            .into_iter()
            .map(|((slice, severity), (count, max_deviation_ft))| {
                self.observer.on_event(&PlanEvent::SafetyWaypointsDropped {
                    slice,
                    severity,
                    count,
                });
                MissionWarning::SafetyWaypointsDropped {
                    slice,
                    severity,
                    count,
                    max_deviation_ft,
                }
            })
            .collect()
    }

    fn sample_count(&self, distance_ft: f64) -> usize {
        let spaced = (distance_ft / self.config.sample_spacing_ft).ceil() as usize;
        spaced
            .saturating_sub(1)
            .clamp(1, self.config.max_samples_per_segment.max(1))
    }

    fn classify(&self, deviation_ft: f64) -> Option<HazardSeverity> {
        if deviation_ft > self.config.critical_threshold_ft {
            Some(HazardSeverity::Critical)
        } else if deviation_ft > self.config.anomaly_threshold_ft {
            Some(HazardSeverity::Anomaly)
        } else {
            None
        }
    }

    /// Query the source in chunks of at most `max_batch_size()` points.
    fn fetch(&self, points: &[GeoPoint]) -> (SampledTerrain, usize) {
        let batch = self.source.max_batch_size().max(1);
        let mut terrain = SampledTerrain {
            elevations_m: vec![None; points.len()],
            failures: Vec::new(),
        };
        let mut requests = 0;

        for (chunk_index, chunk) in points.chunks(batch).enumerate() {
            let offset = chunk_index * batch;
            let range = offset..offset + chunk.len();
            requests += 1;
            match self.source.sample(chunk).and_then(|values| validate_chunk(chunk.len(), values)) {
                Ok(values) => {
                    for (slot, value) in range.zip(values) {
                        terrain.elevations_m[slot] = Some(value);
                    }
                }
                Err(err) => {
                    tracing::debug!(
                        offset,
                        points = chunk.len(),
                        error = %err,
                        "elevation chunk failed"
                    );
                    terrain.failures.push((range, err.to_string()));
                }
            }
        }

        (terrain, requests)
    }

    /// Mark every flagged run at its first sample, its peak and its last
    /// sample, then add waypoints until the flown line clears every sample
    /// by the safety buffer.
    fn detect(
        &self,
        slice: u32,
        waypoints: &[Waypoint],
        altitudes: &[f64],
        plan: &SegmentPlan,
        ground: &[GroundSample],
        scan: &mut TerrainScan,
    ) {
        let (a, b) = (&waypoints[plan.start], &waypoints[plan.end]);
        let mut flown = FlownLine::new(altitudes[plan.start], altitudes[plan.end]);
        for existing in &waypoints[plan.start + 1..plan.end] {
            let t = fraction_along(a.local(), b.local(), existing.local()).clamp(0.0, 1.0);
            flown.insert(t, existing.altitude_ft());
        }
        let buffer_ft = self.config.safety_buffer_ft;

        let mut marked: Vec<usize> = Vec::new();
        let mut run: Option<(usize, usize, usize)> = None;
        for (i, sample) in ground.iter().enumerate() {
            if self.classify(sample.deviation_ft).is_some() {
                run = Some(match run {
                    None => (i, i, i),
                    Some((first, peak, _)) if sample.deviation_ft > ground[peak].deviation_ft => {
                        (first, i, i)
                    }
                    Some((first, peak, _)) => (first, peak, i),
                });
            } else if let Some((first, peak, last)) = run.take() {
                marked.extend([first, peak, last]);
            }
        }
        if let Some((first, peak, last)) = run {
            marked.extend([first, peak, last]);
        }
        marked.dedup();

        // Targets come from the line as it was before this pass.
        let mut hazards: Vec<Hazard> = Vec::new();
        for &i in &marked {
            let sample = ground[i];
            let Some(severity) = self.classify(sample.deviation_ft) else {
                continue;
            };
            let altitude_ft = (sample.terrain_ft + buffer_ft).max(flown.altitude_at(sample.t));
            let local = a.local().lerp(&b.local(), sample.t);
            let mitigated = waypoints[plan.start + 1..plan.end].iter().any(|existing| {
                existing.local().distance_to(&local) <= MITIGATION_RADIUS_FT
                    && existing.altitude_ft() >= altitude_ft - CLEARANCE_TOLERANCE_FT
            });
            if mitigated {
                continue;
            }
            hazards.push(Hazard {
                sample,
                altitude_ft,
                severity,
                magnitude_ft: sample.deviation_ft,
                reason: format!(
                    "{severity}: terrain rises {:.0}ft above the straight-line profile",
                    sample.deviation_ft
                ),
            });
        }
        for hazard in &hazards {
            flown.insert(hazard.sample.t, hazard.altitude_ft);
        }

        // Each round pins the worst sample to its clearance, so it ends
        // after at most one round per sample.
        loop {
            let worst = ground
                .iter()
                .map(|sample| {
                    let shortfall = sample.terrain_ft + buffer_ft - flown.altitude_at(sample.t);
                    (sample, shortfall)
                })
                .filter(|&(_, shortfall)| shortfall > CLEARANCE_TOLERANCE_FT)
                .max_by(|x, y| x.1.total_cmp(&y.1));
            let Some((&sample, shortfall_ft)) = worst else {
                break;
            };
            let below_ground = flown.altitude_at(sample.t) < sample.terrain_ft;
            let severity = if below_ground {
                HazardSeverity::Critical
            } else {
                self.classify(sample.deviation_ft)
                    .unwrap_or(HazardSeverity::Anomaly)
            };
            let altitude_ft = sample.terrain_ft + buffer_ft;
            flown.insert(sample.t, altitude_ft);
            hazards.push(Hazard {
                sample,
                altitude_ft,
                severity,
                magnitude_ft: shortfall_ft,
                reason: format!(
                    "{severity}: flight path {shortfall_ft:.0}ft inside the {buffer_ft:.0}ft terrain clearance"
                ),
            });
        }

        hazards.sort_by(|x, y| x.sample.t.total_cmp(&y.sample.t));
        for hazard in hazards {
            self.propose(slice, a, b, plan.start, hazard, scan);
        }
    }

    fn propose(
        &self,
        slice: u32,
        a: &Waypoint,
        b: &Waypoint,
        anchor_index: usize,
        hazard: Hazard,
        scan: &mut TerrainScan,
    ) {
        let t = hazard.sample.t;
        let position = interpolate_geo(a.position(), b.position(), t);
        let local = a.local().lerp(&b.local(), t);
        self.observer.on_event(&PlanEvent::HazardDetected {
            slice,
            severity: hazard.severity,
            deviation_ft: hazard.magnitude_ft,
            latitude: position.latitude,
            longitude: position.longitude,
        });
        tracing::trace!(
            slice,
            anchor_index,
            t,
            elevation_m = hazard.sample.elevation_m,
            altitude_ft = hazard.altitude_ft,
            "safety waypoint proposed"
        );
        let note = SafetyNote {
            severity: hazard.severity,
            reason: hazard.reason,
            deviation_ft: hazard.magnitude_ft,
        };
        scan.candidates.push(SafetyInsertion {
            slice,
            anchor_index,
            fraction: t,
            severity: hazard.severity,
            deviation_ft: hazard.magnitude_ft,
            waypoint: Waypoint::safety(position, local, hazard.altitude_ft, note),
        });
    }
}

fn validate_chunk(expected: usize, values: Vec<f64>) -> Result<Vec<f64>, ElevationError> {
    if values.len() != expected {
        return Err(ElevationError::SampleCountMismatch {
            expected,
            actual: values.len(),
        });
    }
    if let Some(bad) = values.iter().find(|value| !value.is_finite()) {
        return Err(ElevationError::InvalidResponse(format!(
            "non-finite elevation {bad}"
        )));
    }
    Ok(values)
}

/// Apply altitude lifts to the sequence they were computed from.
pub fn raise_waypoints(waypoints: &[Waypoint], lifts: &[AltitudeLift]) -> Vec<Waypoint> {
    let mut out = waypoints.to_vec();
    for lift in lifts {
        if let Some(waypoint) = out.get_mut(lift.index) {
            *waypoint = waypoint.raised_to(lift.altitude_ft);
        }
    }
    out
}

/// Keep at most `budget` insertions: critical before anomaly, larger
/// deviation first. Both halves come back in path order.
pub fn select_within_budget(
    mut candidates: Vec<SafetyInsertion>,
    budget: usize,
) -> (Vec<SafetyInsertion>, Vec<SafetyInsertion>) {
    candidates.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.deviation_ft.total_cmp(&a.deviation_ft))
            .then(a.path_order(b))
    });
    let mut dropped = candidates.split_off(budget.min(candidates.len()));
    candidates.sort_by(SafetyInsertion::path_order);
    dropped.sort_by(SafetyInsertion::path_order);
    (candidates, dropped)
}

/// Splice insertions into the sequence they were computed from.
///
/// Existing waypoints keep their relative order. New safety waypoints land
/// between their anchor and the next non-safety waypoint, merged by
/// position with any safety waypoints already there.
pub fn insert_safety_waypoints(waypoints: &[Waypoint], insertions: &[SafetyInsertion]) -> Vec<Waypoint> {
    let mut by_anchor: BTreeMap<usize, Vec<&SafetyInsertion>> = BTreeMap::new();
    for insertion in insertions {
        by_anchor.entry(insertion.anchor_index).or_default().push(insertion);
    }

    let mut out = Vec::with_capacity(waypoints.len() + insertions.len());
    let mut index = 0;
    while index < waypoints.len() {
        let anchor = &waypoints[index];
        out.push(anchor.clone());
        let next = waypoints[index + 1..]
            .iter()
            .position(|wp| !wp.is_safety())
            .map_or(waypoints.len(), |offset| index + 1 + offset);

        let mut pending = by_anchor.remove(&index).unwrap_or_default();
        pending.sort_by(|a, b| a.fraction.total_cmp(&b.fraction));
        let mut pending = pending.into_iter().peekable();
        let end = waypoints.get(next).map(Waypoint::local);
        for existing in &waypoints[index + 1..next] {
            let at = end.map_or(1.0, |end| fraction_along(anchor.local(), end, existing.local()));
            while let Some(insertion) = pending.next_if(|ins| ins.fraction < at) {
                out.push(insertion.waypoint.clone());
            }
            out.push(existing.clone());
        }
        out.extend(pending.map(|insertion| insertion.waypoint.clone()));
        index = next;
    }

    // Anchors past the end of the sequence.
    for insertion in by_anchor.into_values().flatten() {
        out.push(insertion.waypoint.clone());
    }
    out
}

fn fraction_along(start: PlanarPoint, end: PlanarPoint, point: PlanarPoint) -> f64 {
    let (dx, dy) = (end.x_ft - start.x_ft, end.y_ft - start.y_ft);
    let length_sq = dx * dx + dy * dy;
    if length_sq == 0.0 {
        return 0.0;
    }
    ((point.x_ft - start.x_ft) * dx + (point.y_ft - start.y_ft) * dy) / length_sq
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WaypointPhase;
    use crate::observer::NoopObserver;
    use crate::spatial::LocalFrame;
    use std::cell::RefCell;

    const CENTER: (f64, f64) = (46.8523, -121.7603);

    struct Terrain<F: Fn(GeoPoint) -> f64> {
        elevation: F,
        batch: usize,
        calls: RefCell<Vec<usize>>,
    }

    impl<F: Fn(GeoPoint) -> f64> Terrain<F> {
        fn new(batch: usize, elevation: F) -> Self {
            Self {
                elevation,
                batch,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl<F: Fn(GeoPoint) -> f64> ElevationSource for Terrain<F> {
        fn sample(&self, points: &[GeoPoint]) -> Result<Vec<f64>, ElevationError> {
            assert!(points.len() <= self.batch, "batch size exceeded");
            self.calls.borrow_mut().push(points.len());
            Ok(points.iter().map(|p| (self.elevation)(*p)).collect())
        }

        fn max_batch_size(&self) -> usize {
            self.batch
        }
    }

    struct Offline;

    impl ElevationSource for Offline {
        fn sample(&self, _points: &[GeoPoint]) -> Result<Vec<f64>, ElevationError> {
            Err(ElevationError::Unavailable("connection refused".to_string()))
        }

        fn max_batch_size(&self) -> usize {
            100
        }
    }

    fn frame() -> LocalFrame {
        LocalFrame::new(GeoPoint::new(CENTER.0, CENTER.1)).unwrap()
    }

    /// Waypoints due north of the center at the given distances, 150ft up.
    fn northbound(distances_ft: &[f64]) -> Vec<Waypoint> {
        northbound_at(distances_ft, 150.0)
    }

    fn northbound_at(distances_ft: &[f64], altitude_ft: f64) -> Vec<Waypoint> {
        let frame = frame();
        distances_ft
            .iter()
            .enumerate()
            .map(|(i, &y)| {
                let local = PlanarPoint::new(0.0, y);
                Waypoint::new(
                    frame.unproject(local),
                    local,
                    altitude_ft,
                    WaypointPhase::OutboundBounce { bounce: i as u32 + 1 },
                )
            })
            .collect()
    }

    /// Lowest height above the ground flown between consecutive waypoints,
    /// checked every 5ft. Ground is relative to the ground under `path[0]`.
    fn lowest_clearance_ft(path: &[Waypoint], elevation: &impl Fn(GeoPoint) -> f64) -> f64 {
        let home_m = elevation(path[0].position());
        let mut lowest = f64::INFINITY;
        for pair in path.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let steps = (a.local().distance_to(&b.local()) / 5.0).ceil().max(1.0) as usize;
            for i in 0..=steps {
                let t = i as f64 / steps as f64;
                let flown = a.altitude_ft() + (b.altitude_ft() - a.altitude_ft()) * t;
                let ground = elevation(interpolate_geo(a.position(), b.position(), t));
                lowest = lowest.min(flown - meters_to_feet(ground - home_m));
            }
        }
        lowest
    }

    /// Analyze, then splice lifts and insertions into `path`.
    fn patched(analyzer: &TerrainSafetyAnalyzer<'_>, path: &[Waypoint]) -> Vec<Waypoint> {
        let outcome = analyzer.adaptive_terrain_sampling(0, path, 100).unwrap();
        assert!(outcome.dropped.is_empty());
        insert_safety_waypoints(&raise_waypoints(path, &outcome.lifts), &outcome.insertions)
    }

    /// Ground that rises `height_m` within `radius_ft` of a point `at_ft` north.
    fn spike(at_ft: f64, radius_ft: f64, height_m: f64) -> impl Fn(GeoPoint) -> f64 {
        let peak = frame().unproject(PlanarPoint::new(0.0, at_ft));
        move |p| {
            if haversine_distance_ft(p, peak).unwrap() <= radius_ft {
                height_m
            } else {
                0.0
            }
        }
    }

    fn analyzer<'a>(source: &'a dyn ElevationSource, config: &'a TerrainSafetyConfig) -> TerrainSafetyAnalyzer<'a> {
        TerrainSafetyAnalyzer::new(source, config, &NoopObserver)
    }

    #[test]
    fn short_segments_only_sample_the_waypoints() {
        let config = TerrainSafetyConfig::default();
        let source = Terrain::new(100, |_| 10.0);
        let path = northbound(&[0.0, 150.0, 300.0, 450.0]);
        let outcome = analyzer(&source, &config)
            .adaptive_terrain_sampling(0, &path, 15)
            .unwrap();
        assert_eq!(*source.calls.borrow(), vec![4]);
        assert!(outcome.insertions.is_empty());
        assert!(outcome.lifts.is_empty());
        assert!(outcome.unverified.is_empty());
    }

    #[test]
    fn flat_ground_is_clear() {
        let config = TerrainSafetyConfig::default();
        let flat = Terrain::new(100, |_| 250.0);
        let path = northbound(&[0.0, 1500.0, 3000.0]);
        let scan = analyzer(&flat, &config).scan(0, &path).unwrap();
        assert!(scan.candidates.is_empty());
        assert!(scan.lifts.is_empty());
        assert_eq!(scan.sampled_segments, 2);
    }

    #[test]
    fn rising_ground_raises_waypoints_to_clearance() {
        let config = TerrainSafetyConfig::default();
        let origin = frame();
        let slope = Terrain::new(100, move |p: GeoPoint| origin.project(p).y_ft * 0.05);
        let path = northbound(&[0.0, 1500.0, 3000.0]);
        let analyzer = analyzer(&slope, &config);

        // The slope matches the straight-line profile, so nothing is an
        // anomaly, but 150ft is far below the ground at 3000ft.
        let scan = analyzer.scan(0, &path).unwrap();
        assert!(scan.candidates.is_empty());
        let lifted: Vec<usize> = scan.lifts.iter().map(|lift| lift.index).collect();
        assert_eq!(lifted, vec![1, 2]);
        let top = meters_to_feet(3000.0 * 0.05) + config.safety_buffer_ft;
        assert!((scan.lifts[1].altitude_ft - top).abs() < 1e-6);

        let flown = patched(&analyzer, &path);
        assert_eq!(flown.len(), path.len());
        assert!(flown.iter().zip(&path).all(|(a, b)| a.position() == b.position()));
        assert!(lowest_clearance_ft(&flown, &slope.elevation) >= config.safety_buffer_ft - 1e-6);

        let again = analyzer.scan(0, &flown).unwrap();
        assert!(again.lifts.is_empty() && again.candidates.is_empty());
    }

    #[test]
    fn spike_at_midpoint_is_critical_and_cleared() {
        let config = TerrainSafetyConfig::default();
        let source = Terrain::new(100, spike(1000.0, 30.0, 30.0));
        let path = northbound(&[0.0, 2000.0]);
        let scan = analyzer(&source, &config).scan(0, &path).unwrap();

        assert_eq!(scan.candidates.len(), 1);
        let hazard = &scan.candidates[0];
        assert_eq!(hazard.severity, HazardSeverity::Critical);
        assert_eq!(hazard.waypoint.hazard_type(), Some(HazardSeverity::Critical));
        assert!((hazard.waypoint.local().y_ft - 1000.0).abs() <= 50.0);
        assert!(hazard.waypoint.altitude_ft() >= meters_to_feet(30.0) + config.safety_buffer_ft);
        assert!(hazard.waypoint.safety_note().unwrap().reason.contains("critical"));
    }

    #[test]
    fn moderate_bump_is_an_anomaly_and_dips_are_ignored() {
        let config = TerrainSafetyConfig::default();
        // 8m = 26ft: above the 15ft anomaly threshold, below 50ft critical.
        let bump = Terrain::new(100, spike(1000.0, 30.0, 8.0));
        let path = northbound(&[0.0, 2000.0]);
        let scan = analyzer(&bump, &config).scan(0, &path).unwrap();
        assert_eq!(scan.candidates.len(), 1);
        assert_eq!(scan.candidates[0].severity, HazardSeverity::Anomaly);
        // Flight altitude already clears terrain + buffer here.
        assert_eq!(scan.candidates[0].waypoint.altitude_ft(), 150.0);

        let dip = Terrain::new(100, spike(1000.0, 30.0, -40.0));
        assert!(analyzer(&dip, &config).scan(0, &path).unwrap().candidates.is_empty());
    }

    #[test]
    fn wide_ridge_is_marked_at_both_flanks_and_peak() {
        let config = TerrainSafetyConfig::default();
        let origin = frame();
        let ridge = Terrain::new(100, move |p: GeoPoint| {
            let y = origin.project(p).y_ft;
            (40.0 - (y - 1200.0).abs() * 0.2).max(0.0)
        });
        let path = northbound(&[0.0, 2400.0]);
        let analyzer = analyzer(&ridge, &config);
        let scan = analyzer.scan(0, &path).unwrap();

        let marks: Vec<(f64, HazardSeverity)> = scan
            .candidates
            .iter()
            .map(|c| (c.waypoint.local().y_ft.round(), c.severity))
            .collect();
        assert_eq!(
            marks,
            vec![
                (1050.0, HazardSeverity::Anomaly),
                (1200.0, HazardSeverity::Critical),
                (1350.0, HazardSeverity::Anomaly),
            ]
        );
        let flown = patched(&analyzer, &path);
        assert!(lowest_clearance_ft(&flown, &ridge.elevation) >= config.safety_buffer_ft - 1e-6);
    }

    #[test]
    fn plateau_is_held_across_its_whole_width() {
        let config = TerrainSafetyConfig::default();
        let origin = frame();
        let plateau = Terrain::new(100, move |p: GeoPoint| {
            if (790.0..=1610.0).contains(&origin.project(p).y_ft) {
                80.0
            } else {
                0.0
            }
        });
        let path = northbound(&[0.0, 2400.0]);
        let analyzer = analyzer(&plateau, &config);
        let required = meters_to_feet(80.0) + config.safety_buffer_ft;

        let scan = analyzer.scan(0, &path).unwrap();
        let ys: Vec<f64> = scan
            .candidates
            .iter()
            .map(|c| c.waypoint.local().y_ft.round())
            .collect();
        assert_eq!(ys, vec![800.0, 1600.0]);
        assert!(scan
            .candidates
            .iter()
            .all(|c| c.severity == HazardSeverity::Critical
                && (c.waypoint.altitude_ft() - required).abs() < 1e-6));

        // Every point over the plateau, not just its first edge, keeps the buffer.
        let flown = patched(&analyzer, &path);
        let over_plateau: Vec<f64> = (16..=32)
            .map(|i| {
                let y = i as f64 * 50.0;
                let (before, after) = flown
                    .windows(2)
                    .map(|pair| (&pair[0], &pair[1]))
                    .find(|(a, b)| a.local().y_ft <= y && y <= b.local().y_ft)
                    .unwrap();
                let t = (y - before.local().y_ft) / (after.local().y_ft - before.local().y_ft);
                before.altitude_ft() + (after.altitude_ft() - before.altitude_ft()) * t
            })
            .collect();
        assert!(over_plateau.iter().all(|&alt| alt >= required - 1e-6));
        assert!(lowest_clearance_ft(&flown, &plateau.elevation) >= config.safety_buffer_ft / 2.0);

        let second = analyzer.adaptive_terrain_sampling(0, &flown, 100).unwrap();
        assert!(second.insertions.is_empty());
        assert!(second.lifts.is_empty());
    }

    #[test]
    fn clearance_shortfall_below_anomaly_threshold_is_still_fixed() {
        let config = TerrainSafetyConfig::default();
        // 4m = 13ft: not an anomaly, but a 105ft line leaves 92ft of clearance.
        let bump = Terrain::new(100, spike(1000.0, 30.0, 4.0));
        let path = northbound_at(&[0.0, 2000.0], 105.0);
        let scan = analyzer(&bump, &config).scan(0, &path).unwrap();

        assert!(scan.lifts.is_empty());
        assert_eq!(scan.candidates.len(), 1);
        let fix = &scan.candidates[0];
        assert_eq!(fix.severity, HazardSeverity::Anomaly);
        assert!((fix.waypoint.altitude_ft() - (meters_to_feet(4.0) + 100.0)).abs() < 1e-6);
        assert!(fix.waypoint.safety_note().unwrap().reason.contains("clearance"));
    }

    #[test]
    fn requests_are_coalesced_and_chunked() {
        let config = TerrainSafetyConfig::default();
        let source = Terrain::new(7, |_| 10.0);
        let path = northbound(&[0.0, 520.0, 1040.0, 1560.0]);
        let scan = analyzer(&source, &config).scan(0, &path).unwrap();

        // Four anchors requested once each plus 10 interior samples per segment.
        let calls = source.calls.borrow();
        let total: usize = calls.iter().sum();
        assert_eq!(total, 4 + 3 * 10);
        assert!(calls.iter().all(|&n| n <= 7));
        assert_eq!(scan.requests, calls.len());
    }

    #[test]
    fn provider_failure_marks_segments_unverified() {
        let config = TerrainSafetyConfig::default();
        let path = northbound(&[0.0, 1000.0, 1100.0, 2000.0]);
        let outcome = analyzer(&Offline, &config)
            .adaptive_terrain_sampling(2, &path, 15)
            .unwrap();
        assert!(outcome.insertions.is_empty());
        let spans: Vec<(usize, usize)> = outcome
            .unverified
            .iter()
            .map(|s| (s.start_index, s.end_index))
            .collect();
        assert_eq!(spans, vec![(0, 1), (1, 2), (2, 3)]);
        assert!(outcome.unverified[0].detail.contains("connection refused"));
        assert!(matches!(
            outcome.unverified[0].to_warning(),
            MissionWarning::TerrainDataUnavailable { slice: 2, .. }
        ));
    }

    #[test]
    fn non_finite_samples_are_not_trusted() {
        let config = TerrainSafetyConfig::default();
        let source = Terrain::new(100, |_| f64::NAN);
        let path = northbound(&[0.0, 1000.0]);
        let scan = analyzer(&source, &config).scan(0, &path).unwrap();
        assert!(scan.candidates.is_empty());
        assert_eq!(scan.unverified.len(), 1);
    }

    #[test]
    fn second_pass_adds_nothing() {
        let config = TerrainSafetyConfig::default();
        let source = Terrain::new(100, spike(1000.0, 30.0, 30.0));
        let path = northbound(&[0.0, 2000.0, 2150.0]);
        let analyzer = analyzer(&source, &config);

        let first = analyzer.adaptive_terrain_sampling(0, &path, 15).unwrap();
        assert_eq!(first.insertions.len(), 1);
        let patched = insert_safety_waypoints(&path, &first.insertions);
        assert_eq!(patched.len(), 4);
        assert!(patched[1].is_safety());

        let second = analyzer.adaptive_terrain_sampling(0, &patched, 15).unwrap();
        assert!(second.insertions.is_empty());
        assert!(second.lifts.is_empty());
    }

    #[test]
    fn budget_keeps_critical_hazards_first() {
        let frame = frame();
        let candidate = |anchor_index: usize, severity: HazardSeverity, deviation_ft: f64| {
            let local = PlanarPoint::new(0.0, anchor_index as f64 * 100.0 + 50.0);
            SafetyInsertion {
                slice: 0,
                anchor_index,
                fraction: 0.5,
                severity,
                deviation_ft,
                waypoint: Waypoint::safety(
                    frame.unproject(local),
                    local,
                    200.0,
                    SafetyNote {
                        severity,
                        reason: String::new(),
                        deviation_ft,
                    },
                ),
            }
        };
        let candidates = vec![
            candidate(0, HazardSeverity::Anomaly, 40.0),
            candidate(1, HazardSeverity::Critical, 60.0),
            candidate(2, HazardSeverity::Anomaly, 20.0),
            candidate(3, HazardSeverity::Critical, 90.0),
        ];
        let (kept, dropped) = select_within_budget(candidates, 3);
        let kept: Vec<usize> = kept.iter().map(|c| c.anchor_index).collect();
        assert_eq!(kept, vec![0, 1, 3]);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].anchor_index, 2);

        let warnings = TerrainSafetyAnalyzer::new(&Offline, &TerrainSafetyConfig::default(), &NoopObserver)
            .report_dropped(&dropped);
        assert_eq!(
            warnings,
            vec![MissionWarning::SafetyWaypointsDropped {
                slice: 0,
                severity: HazardSeverity::Anomaly,
                count: 1,
                max_deviation_ft: 20.0,
            }]
        );
    }

    #[test]
    fn insertion_preserves_existing_order() {
        let path = northbound(&[0.0, 1000.0, 2000.0]);
        let frame = frame();
        // Anchor index in the sequence being patched, anchor y, safety y.
        let safety_at = |anchor_index: usize, from_y: f64, y: f64| {
            let local = PlanarPoint::new(0.0, y);
            SafetyInsertion {
                slice: 0,
                anchor_index,
                fraction: (y - from_y) / 1000.0,
                severity: HazardSeverity::Anomaly,
                deviation_ft: 20.0,
                waypoint: Waypoint::safety(
                    frame.unproject(local),
                    local,
                    180.0,
                    SafetyNote {
                        severity: HazardSeverity::Anomaly,
                        reason: format!("at {y}"),
                        deviation_ft: 20.0,
                    },
                ),
            }
        };

        let once = insert_safety_waypoints(
            &path,
            &[safety_at(0, 0.0, 500.0), safety_at(1, 1000.0, 1500.0)],
        );
        let twice = insert_safety_waypoints(
            &once,
            &[
                safety_at(2, 1000.0, 1200.0),
                safety_at(0, 0.0, 700.0),
                safety_at(0, 0.0, 300.0),
            ],
        );
        let ys: Vec<f64> = twice.iter().map(|wp| wp.local().y_ft).collect();
        assert_eq!(ys, vec![0.0, 300.0, 500.0, 700.0, 1000.0, 1200.0, 1500.0, 2000.0]);

        let originals: Vec<&Waypoint> = twice.iter().filter(|wp| !wp.is_safety()).collect();
        assert_eq!(originals.len(), path.len());
        assert!(originals.iter().zip(&path).all(|(a, b)| *a == b));
    }

    #[test]
    fn flown_line_merges_coincident_vertices() {
        let mut line = FlownLine::new(100.0, 100.0);
        line.insert(0.5, 120.0);
        line.insert(0.5, 180.0);
        line.insert(0.5, 150.0);
        assert_eq!(line.vertices.len(), 3);
        assert_eq!(line.altitude_at(0.5), 180.0);
        assert_eq!(line.altitude_at(0.25), 140.0);
    }
}
