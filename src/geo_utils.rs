//! # Geographic Utilities
//!
//! Pure distance and bearing computation over latitude/longitude pairs.
//!
//! Everything in this module is side-effect free. The session uses
//! [`distance_km`] for two things: the drift between the GPS and IP estimates,
//! and the movement gate that decides when a new insight is worth requesting.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`distance_km`] | Great-circle distance between two points, in kilometres |
//! | [`bearing_deg`] | Initial great-circle bearing from one point to another |
//! | [`track_length_km`] | Total length of an ordered track, in kilometres |
//!
//! ## Example
//!
//! ```rust
//! use location_telemetry::{GpsPoint, geo_utils};
//!
//! let equator = GpsPoint::new(0.0, 0.0);
//! let one_east = GpsPoint::new(0.0, 1.0);
//!
//! let d = geo_utils::distance_km(&equator, &one_east);
//! assert!((d - 111.19).abs() < 0.1);
//!
//! let heading = geo_utils::bearing_deg(&equator, &one_east);
//! assert!((heading - 90.0).abs() < 1e-6);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Haversine Formula
//!
//! Distances assume a spherical Earth with radius [`EARTH_RADIUS_KM`] (6371 km),
//! not the 6371.0088 km mean radius `geo` uses internally. Results agree with
//! the reference formula to 1e-6 relative.
//!
//! Reference: [Haversine formula (Wikipedia)](https://en.wikipedia.org/wiki/Haversine_formula)
//!
//! ### Coordinate System
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).

use geo::{Bearing, Haversine, Point};
use crate::GpsPoint;

/// Mean Earth radius used by [`distance_km`].
pub const EARTH_RADIUS_KM: f64 = 6371.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two points using the Haversine formula.
///
/// Total for all valid coordinate pairs: identical points return exactly `0.0`,
/// the result is symmetric in its arguments and never negative.
///
/// # Example
///
/// ```rust
/// use location_telemetry::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::distance_km(&london, &paris);
/// assert!((distance - 343.5).abs() < 1.0);
/// ```
#[inline]
pub fn distance_km(a: &GpsPoint, b: &GpsPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1.0 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

/// Initial bearing from `from` towards `to`, in degrees clockwise from north.
///
/// The result is normalized to `[0, 360)`. For identical points the bearing is
/// undefined and this returns `0.0`.
pub fn bearing_deg(from: &GpsPoint, to: &GpsPoint) -> f64 {
    if from == to {
        return 0.0;
    }
    let origin = Point::new(from.longitude, from.latitude);
    let destination = Point::new(to.longitude, to.latitude);
    Haversine::bearing(origin, destination).rem_euclid(360.0)
}

/// Total length of an ordered track in kilometres.
///
/// Sums [`distance_km`] between consecutive points. Empty or single-point
/// tracks return 0.0.
pub fn track_length_km(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| distance_km(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Unit Tests
// =============================================================================
