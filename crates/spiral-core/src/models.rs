//! Core data models for spiral mission planning.

use crate::error::{PlanError, PlanResult};
use crate::spatial::{validate_coordinate, PlanarPoint};
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A WGS-84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon")]
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn validate(&self) -> PlanResult<()> {
        validate_coordinate(self.latitude, self.longitude)
    }
}

/// Severity class of a terrain hazard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HazardSeverity {
    /// Deviation above the anomaly threshold
    Anomaly,
    /// Deviation above the critical threshold
    Critical,
}

impl fmt::Display for HazardSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anomaly => f.write_str("anomaly"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

/// Generation stage that produced a waypoint.
///
/// Bounce indices are 1-based. Midpoints carry the bounce they lead to plus
/// their own 1-based position within the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaypointPhase {
    OutboundStart,
    OutboundMid { bounce: u32, index: u32 },
    OutboundBounce { bounce: u32 },
    HoldMid { index: u32 },
    HoldEnd,
    InboundMid { bounce: u32, index: u32 },
    InboundBounce { bounce: u32 },
    /// Inserted by terrain safety analysis
    TerrainSafety,
}

impl WaypointPhase {
    /// Tag used at the export boundary, e.g. `outbound_bounce_3`.
    pub fn label(&self) -> String {
        match self {
            Self::OutboundStart => "outbound_start".to_string(),
            Self::OutboundMid { bounce, .. } => format!("outbound_mid_{bounce}"),
            Self::OutboundBounce { bounce } => format!("outbound_bounce_{bounce}"),
            Self::HoldMid { .. } => "hold_mid".to_string(),
            Self::HoldEnd => "hold_end".to_string(),
            Self::InboundMid { bounce, .. } => format!("inbound_mid_{bounce}"),
            Self::InboundBounce { bounce } => format!("inbound_bounce_{bounce}"),
            Self::TerrainSafety => "terrain_safety".to_string(),
        }
    }

    pub fn is_bounce(&self) -> bool {
        matches!(
            self,
            Self::OutboundBounce { .. } | Self::InboundBounce { .. }
        )
    }

    pub fn is_safety(&self) -> bool {
        matches!(self, Self::TerrainSafety)
    }
}

impl fmt::Display for WaypointPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Why a safety waypoint exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyNote {
    pub severity: HazardSeverity,
    pub reason: String,
    /// Terrain rise above the straight-line terrain profile, or the
    /// clearance shortfall when the flown line was too low, feet
    pub deviation_ft: f64,
}

/// A single point of the flight path. Immutable once created.
///
/// `altitude_ft` is measured above the ground elevation of the slice's
/// home point (its first waypoint). The local `x`/`y` offsets are only
/// meaningful during generation and are not exported.
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    position: GeoPoint,
    local: PlanarPoint,
    altitude_ft: f64,
    phase: WaypointPhase,
    safety: Option<SafetyNote>,
}

impl Waypoint {
    pub fn new(position: GeoPoint, local: PlanarPoint, altitude_ft: f64, phase: WaypointPhase) -> Self {
        Self {
            position,
            local,
            altitude_ft,
            phase,
            safety: None,
        }
    }

    /// Waypoint synthesized to climb over a detected terrain hazard.
    pub fn safety(position: GeoPoint, local: PlanarPoint, altitude_ft: f64, note: SafetyNote) -> Self {
        Self {
            position,
            local,
            altitude_ft,
            phase: WaypointPhase::TerrainSafety,
            safety: Some(note),
        }
    }

    /// Same waypoint flown at `altitude_ft` when that is higher.
    pub fn raised_to(&self, altitude_ft: f64) -> Self {
        Self {
            altitude_ft: self.altitude_ft.max(altitude_ft),
            ..self.clone()
        }
    }

    pub fn position(&self) -> GeoPoint {
        self.position
    }

    pub fn latitude(&self) -> f64 {
        self.position.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.position.longitude
    }

    pub fn local(&self) -> PlanarPoint {
        self.local
    }

    pub fn altitude_ft(&self) -> f64 {
        self.altitude_ft
    }

    pub fn phase(&self) -> WaypointPhase {
        self.phase
    }

    pub fn safety_note(&self) -> Option<&SafetyNote> {
        self.safety.as_ref()
    }

    pub fn is_safety(&self) -> bool {
        self.phase.is_safety()
    }

    /// Severity class for safety waypoints (`type` at the export boundary).
    pub fn hazard_type(&self) -> Option<HazardSeverity> {
        self.safety.as_ref().map(|note| note.severity)
    }
}

impl Serialize for Waypoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = if self.safety.is_some() { 6 } else { 4 };
        let mut state = serializer.serialize_struct("Waypoint", fields)?;
        state.serialize_field("latitude", &self.position.latitude)?;
        state.serialize_field("longitude", &self.position.longitude)?;
        state.serialize_field("altitude_ft", &self.altitude_ft)?;
        state.serialize_field("phase", &self.phase.label())?;
        if let Some(note) = &self.safety {
            state.serialize_field("reason", &note.reason)?;
            state.serialize_field("type", &note.severity)?;
        }
        state.end()
    }
}

/// Shape of one battery's spiral.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpiralParameters {
    /// Pie-wedge battery segments in the whole mission
    pub slices: u32,
    /// Outward/inward radial excursions per slice (N)
    pub bounces: u32,
    /// Innermost bounce radius, feet
    pub r0_ft: f64,
    /// Outer holding radius, feet
    pub r_hold_ft: f64,
}

impl SpiralParameters {
    /// Check `slices >= 1`, `N >= 1` and `rHold > r0 > 0`.
    pub fn validate(&self) -> PlanResult<()> {
        if self.slices < 1 {
            return Err(PlanError::InvalidSpiralParameters(
                "slice count must be at least 1".to_string(),
            ));
        }
        if self.bounces < 1 {
            return Err(PlanError::InvalidSpiralParameters(format!(
                "bounce count must be at least 1, got {}",
                self.bounces
            )));
        }
        if !self.r0_ft.is_finite() || !self.r_hold_ft.is_finite() {
            return Err(PlanError::InvalidSpiralParameters(
                "radii must be finite".to_string(),
            ));
        }
        if self.r0_ft <= 0.0 {
            return Err(PlanError::InvalidSpiralParameters(format!(
                "r0 must be positive, got {:.2}ft",
                self.r0_ft
            )));
        }
        if self.r0_ft >= self.r_hold_ft {
            return Err(PlanError::InvalidSpiralParameters(format!(
                "r0 ({:.2}ft) must be below rHold ({:.2}ft)",
                self.r0_ft, self.r_hold_ft
            )));
        }
        Ok(())
    }
}

/// Vertical envelope of the mission, feet above home.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeightBounds {
    pub min_ft: f64,
    pub max_ft: f64,
}

impl HeightBounds {
    pub fn new(min_ft: f64, max_ft: f64) -> Self {
        Self { min_ft, max_ft }
    }

    pub fn validate(&self, ceiling_ft: f64) -> PlanResult<()> {
        if !self.min_ft.is_finite() || !self.max_ft.is_finite() {
            return Err(PlanError::InvalidRequest(
                "flight heights must be finite".to_string(),
            ));
        }
        if self.min_ft <= 0.0 {
            return Err(PlanError::InvalidRequest(format!(
                "minimum height must be above ground, got {}ft",
                self.min_ft
            )));
        }
        if self.min_ft > self.max_ft {
            return Err(PlanError::InvalidRequest(format!(
                "minimum height ({}ft) exceeds maximum height ({}ft)",
                self.min_ft, self.max_ft
            )));
        }
        if self.max_ft > ceiling_ft {
            return Err(PlanError::InvalidRequest(format!(
                "maximum height ({}ft) exceeds the {}ft ceiling",
                self.max_ft, ceiling_ft
            )));
        }
        Ok(())
    }

    /// Altitude for a point at `radius_ft`, ramping from min at the center
    /// to max at the hold radius.
    pub fn altitude_at(&self, radius_ft: f64, r_hold_ft: f64) -> f64 {
        let ratio = if r_hold_ft > 0.0 {
            (radius_ft / r_hold_ft).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.min_ft + (self.max_ft - self.min_ft) * ratio
    }
}

/// Request accepted at the system boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionRequest {
    pub center: GeoPoint,
    pub batteries: u32,
    pub battery_minutes: f64,
    pub min_height_ft: f64,
    pub max_height_ft: f64,
}

impl MissionRequest {
    pub fn heights(&self) -> HeightBounds {
        HeightBounds::new(self.min_height_ft, self.max_height_ft)
    }
}

/// Waypoints flown on one battery.
#[derive(Debug, Clone, Serialize)]
pub struct FlightSlice {
    pub index: u32,
    pub parameters: SpiralParameters,
    pub waypoints: Vec<Waypoint>,
    /// Planned horizontal length including the return-to-home leg
    pub length_ft: f64,
    pub estimated_minutes: f64,
    pub safety_waypoints: usize,
    /// Planned waypoints that climbed to clear the ground beneath them
    pub raised_waypoints: usize,
    pub unverified_segments: usize,
}

/// Non-fatal conditions attached to a mission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissionWarning {
    /// Terrain between two waypoints could not be sampled; the segment is
    /// unverified, not assumed safe.
    TerrainDataUnavailable {
        slice: u32,
        start_index: usize,
        end_index: usize,
        detail: String,
    },
    /// The reserved safety pool ran out before every hazard was mitigated.
    SafetyWaypointsDropped {
        slice: u32,
        severity: HazardSeverity,
        count: usize,
        max_deviation_ft: f64,
    },
}

/// A complete generated mission, ready for the export boundary.
#[derive(Debug, Clone, Serialize)]
pub struct Mission {
    pub center: GeoPoint,
    pub heights: HeightBounds,
    pub slices: Vec<FlightSlice>,
    pub warnings: Vec<MissionWarning>,
    pub generated_at: DateTime<Utc>,
}

impl Mission {
    pub fn total_waypoints(&self) -> usize {
        self.slices.iter().map(|slice| slice.waypoints.len()).sum()
    }

    pub fn has_unverified_segments(&self) -> bool {
        self.slices.iter().any(|slice| slice.unverified_segments > 0)
    }
}
