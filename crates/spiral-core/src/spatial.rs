//! Geometry kernel: great-circle distance, bearings, local planar
//! projection and spiral-curve sampling.

use crate::error::{PlanError, PlanResult};
use crate::models::GeoPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub const FEET_PER_METER: f64 = 3.280_839_895;

pub fn meters_to_feet(meters: f64) -> f64 {
    meters * FEET_PER_METER
}

pub fn feet_to_meters(feet: f64) -> f64 {
    feet / FEET_PER_METER
}

/// Reject coordinates outside the WGS-84 domain.
pub fn validate_coordinate(latitude: f64, longitude: f64) -> PlanResult<()> {
    let lat_ok = latitude.is_finite() && (-90.0..=90.0).contains(&latitude);
    let lon_ok = longitude.is_finite() && (-180.0..=180.0).contains(&longitude);
    if lat_ok && lon_ok {
        Ok(())
    } else {
        Err(PlanError::InvalidCoordinate {
            latitude,
            longitude,
        })
    }
}

/// Calculate distance between two points in meters using the Haversine formula.
///
/// # Arguments
/// * `lat1`, `lon1` - First point coordinates in decimal degrees
/// * `lat2`, `lon2` - Second point coordinates in decimal degrees
///
/// # Returns
/// Distance in meters, or `InvalidCoordinate` for out-of-range input.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> PlanResult<f64> {
    validate_coordinate(lat1, lon1)?;
    validate_coordinate(lat2, lon2)?;
    Ok(great_circle_m(lat1, lon1, lat2, lon2))
}

/// Haversine distance in feet.
pub fn haversine_distance_ft(a: GeoPoint, b: GeoPoint) -> PlanResult<f64> {
    haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude).map(meters_to_feet)
}

fn great_circle_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Calculate bearing from point 1 to point 2 in radians.
/// Returns bearing in radians, 0 = north, π/2 = east.
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let x = delta_lambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    x.atan2(y)
}

/// Meters per degree of latitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lat(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_132.954 - 559.822 * (2.0 * lat_rad).cos() + 1.175 * (4.0 * lat_rad).cos()
        - 0.0023 * (6.0 * lat_rad).cos()
}

/// Meters per degree of longitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lon(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_412.84 * lat_rad.cos() - 93.5 * (3.0 * lat_rad).cos() + 0.118 * (5.0 * lat_rad).cos()
}

/// Planar offset in feet from a local origin (x = east, y = north).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlanarPoint {
    pub x_ft: f64,
    pub y_ft: f64,
}

impl PlanarPoint {
    pub fn new(x_ft: f64, y_ft: f64) -> Self {
        Self { x_ft, y_ft }
    }

    pub fn distance_to(&self, other: &PlanarPoint) -> f64 {
        (self.x_ft - other.x_ft).hypot(self.y_ft - other.y_ft)
    }

    pub fn lerp(&self, other: &PlanarPoint, t: f64) -> PlanarPoint {
        PlanarPoint {
            x_ft: self.x_ft + (other.x_ft - self.x_ft) * t,
            y_ft: self.y_ft + (other.y_ft - self.y_ft) * t,
        }
    }
}

/// Equirectangular projection around a fixed origin.
///
/// The meters-per-degree scale is frozen at the origin latitude, so this is
/// an approximation: error grows with distance from the origin and stays
/// within a few feet for mission radii below about a mile. It is not
/// geodesically exact.
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    origin: GeoPoint,
    feet_per_deg_lat: f64,
    feet_per_deg_lon: f64,
}

impl LocalFrame {
    pub fn new(origin: GeoPoint) -> PlanResult<Self> {
        validate_coordinate(origin.latitude, origin.longitude)?;
        let feet_per_deg_lon = meters_to_feet(meters_per_deg_lon(origin.latitude));
        if feet_per_deg_lon < 1.0 {
            // Longitude collapses at the poles.
            return Err(PlanError::InvalidCoordinate {
                latitude: origin.latitude,
                longitude: origin.longitude,
            });
        }
        Ok(Self {
            origin,
            feet_per_deg_lat: meters_to_feet(meters_per_deg_lat(origin.latitude)),
            feet_per_deg_lon,
        })
    }

    pub fn origin(&self) -> GeoPoint {
        self.origin
    }

    pub fn project(&self, point: GeoPoint) -> PlanarPoint {
        PlanarPoint {
            x_ft: (point.longitude - self.origin.longitude) * self.feet_per_deg_lon,
            y_ft: (point.latitude - self.origin.latitude) * self.feet_per_deg_lat,
        }
    }

    pub fn unproject(&self, point: PlanarPoint) -> GeoPoint {
        GeoPoint {
            latitude: self.origin.latitude + point.y_ft / self.feet_per_deg_lat,
            longitude: self.origin.longitude + point.x_ft / self.feet_per_deg_lon,
        }
    }
}

/// Point on a spiral in polar form around the slice center.
///
/// `bearing_rad` is measured clockwise from north and is not wrapped, so a
/// sweep from 0 to 2π walks a full revolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarPoint {
    pub radius_ft: f64,
    pub bearing_rad: f64,
}

impl PolarPoint {
    pub fn new(radius_ft: f64, bearing_rad: f64) -> Self {
        Self {
            radius_ft,
            bearing_rad,
        }
    }

    pub fn to_planar(self) -> PlanarPoint {
        PlanarPoint {
            x_ft: self.radius_ft * self.bearing_rad.sin(),
            y_ft: self.radius_ft * self.bearing_rad.cos(),
        }
    }
}

/// Sample `count` interior points along the spiral curve from `from` to `to`.
///
/// Radius and bearing are interpolated linearly at `i / (count + 1)`, so the
/// endpoints themselves are never returned.
pub fn sample_spiral(from: PolarPoint, to: PolarPoint, count: usize) -> Vec<PolarPoint> {
    let steps = (count + 1) as f64;
    (1..=count)
        .map(|i| {
            let t = i as f64 / steps;
            PolarPoint {
                radius_ft: from.radius_ft + (to.radius_ft - from.radius_ft) * t,
                bearing_rad: from.bearing_rad + (to.bearing_rad - from.bearing_rad) * t,
            }
        })
        .collect()
}

/// Linear interpolation between two coordinates.
///
/// Adequate for the sub-mile segments of a mission; not a geodesic.
pub fn interpolate_geo(a: GeoPoint, b: GeoPoint, t: f64) -> GeoPoint {
    GeoPoint {
        latitude: a.latitude + (b.latitude - a.latitude) * t,
        longitude: a.longitude + (b.longitude - a.longitude) * t,
    }
}
