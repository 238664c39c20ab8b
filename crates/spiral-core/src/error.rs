//! Error taxonomy for mission planning.

use thiserror::Error;

/// Errors that abort mission generation.
///
/// Geometry and parameter-search failures are always fatal. Terrain
/// provider failures only surface here when the strict safety policy is
/// enabled; otherwise they are reported as mission warnings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    /// Latitude outside [-90, 90] or longitude outside [-180, 180].
    #[error("invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    /// Spiral parameters violate `rHold > r0 > 0` or `N >= 1`.
    #[error("invalid spiral parameters: {0}")]
    InvalidSpiralParameters(String),

    /// Not even a single bounce fits the waypoint budget.
    #[error(
        "waypoint budget exceeded: a slice needs at least {required} waypoints but only \
         {available} are available per battery; reduce battery count or duration"
    )]
    BudgetExceeded { required: usize, available: usize },

    /// Elevation data could not be obtained and the strict policy is on.
    #[error("terrain data unavailable for {segments} segment(s): {detail}")]
    TerrainDataUnavailable { segments: usize, detail: String },

    /// Malformed mission request (battery count, duration, heights).
    #[error("invalid mission request: {0}")]
    InvalidRequest(String),

    /// Inconsistent planner configuration.
    #[error("invalid planner configuration: {0}")]
    InvalidConfig(String),

    /// Planning ran past its configured time budget.
    #[error("mission planning exceeded its time budget of {budget_ms}ms")]
    DeadlineExceeded { budget_ms: u64 },
}

pub type PlanResult<T> = Result<T, PlanError>;
