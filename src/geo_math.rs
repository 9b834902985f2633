//! Spherical-Earth geodesy helpers.
//!
//! All functions are pure. Distances are great-circle distances on a sphere
//! of mean radius `EARTH_RADIUS_M`.

use crate::types::Fix;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial bearing from point 1 to point 2, degrees clockwise from north in [0, 360).
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let y = d_lon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * d_lon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Destination reached by travelling `distance_m` along a great circle.
pub fn destination(lat: f64, lon: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let lat_rad = lat.to_radians();
    let lon_rad = lon.to_radians();
    let bearing_rad = bearing_deg.to_radians();
    let angular = distance_m / EARTH_RADIUS_M;

    let new_lat = (lat_rad.sin() * angular.cos()
        + lat_rad.cos() * angular.sin() * bearing_rad.cos())
    .clamp(-1.0, 1.0)
    .asin();
    let new_lon = lon_rad
        + (bearing_rad.sin() * angular.sin() * lat_rad.cos())
            .atan2(angular.cos() - lat_rad.sin() * new_lat.sin());

    (new_lat.to_degrees(), normalize_longitude(new_lon.to_degrees()))
}

/// Wrap a longitude into [-180, 180).
pub fn normalize_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

pub fn validate_coordinates(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Great-circle distance between two fixes (meters).
pub fn distance(a: &Fix, b: &Fix) -> f64 {
    haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Initial bearing from `a` to `b` in degrees [0, 360).
pub fn bearing(a: &Fix, b: &Fix) -> f64 {
    initial_bearing(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Forward-project `origin` along `bearing_deg` for `distance_m` meters.
///
/// The result keeps the origin's timestamp and carries no speed or heading;
/// callers stamp those themselves.
pub fn project(origin: &Fix, bearing_deg: f64, distance_m: f64) -> Fix {
    let (latitude, longitude) =
        destination(origin.latitude, origin.longitude, bearing_deg, distance_m);
    Fix {
        latitude,
        longitude,
        timestamp: origin.timestamp,
        speed: None,
        heading: None,
    }
}

/// Implied ground speed between two fixes, `None` when the interval is not positive.
pub fn implied_speed(a: &Fix, b: &Fix) -> Option<f64> {
    let dt = b.timestamp - a.timestamp;
    if dt > 0.0 {
        Some(distance(a, b) / dt)
    } else {
        None
    }
}
