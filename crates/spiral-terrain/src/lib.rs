//! Elevation data for spiral mission terrain analysis.
//!
//! [`OpenMeteoElevation`] implements `spiral_core::ElevationSource` on top
//! of an Open-Meteo compatible HTTP API.

pub mod backoff;
pub mod config;
pub mod open_meteo;

pub use config::ElevationConfig;
pub use open_meteo::OpenMeteoElevation;
