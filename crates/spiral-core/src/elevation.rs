//! Contract for elevation providers.

use crate::models::GeoPoint;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ElevationError {
    #[error("elevation provider unavailable: {0}")]
    Unavailable(String),

    #[error("elevation provider returned {actual} samples for {expected} points")]
    SampleCountMismatch { expected: usize, actual: usize },

    #[error("elevation provider returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// A source of ground elevation samples.
///
/// Implementations return meters above sea level, one value per input
/// point, in input order. Callers must not pass more than
/// [`max_batch_size`](ElevationSource::max_batch_size) points per call.
pub trait ElevationSource {
    fn sample(&self, points: &[GeoPoint]) -> Result<Vec<f64>, ElevationError>;

    fn max_batch_size(&self) -> usize;
}

impl<T: ElevationSource + ?Sized> ElevationSource for &T {
    fn sample(&self, points: &[GeoPoint]) -> Result<Vec<f64>, ElevationError> {
        (**self).sample(points)
    }

    fn max_batch_size(&self) -> usize {
        (**self).max_batch_size()
    }
}
