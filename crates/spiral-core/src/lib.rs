pub mod battery;
pub mod config;
pub mod elevation;
pub mod error;
pub mod mission;
pub mod models;
pub mod observer;
pub mod path_builder;
pub mod spatial;
pub mod terrain_safety;

pub use battery::{BatteryOptimizer, OptimizedSpiral};
pub use config::{PlannerConfig, TerrainSafetyConfig};
pub use elevation::{ElevationError, ElevationSource};
pub use error::{PlanError, PlanResult};
pub use mission::MissionPlanner;
pub use models::{
    FlightSlice, GeoPoint, HazardSeverity, HeightBounds, Mission, MissionRequest, MissionWarning,
    SafetyNote, SpiralParameters, Waypoint, WaypointPhase,
};
pub use observer::{NoopObserver, PlanEvent, PlanObserver, TracingObserver};
pub use path_builder::{path_length_ft, slice_length_ft, slice_waypoint_count, PathBuilder};
pub use spatial::{haversine_distance, haversine_distance_ft, LocalFrame};
pub use terrain_safety::{
    insert_safety_waypoints, raise_waypoints, select_within_budget, AltitudeLift, SafetyInsertion,
    TerrainSafetyAnalyzer, TerrainSamplingOutcome, TerrainScan, UnverifiedSegment,
};
