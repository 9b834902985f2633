//! Vector aliases for inertial data.
//!
//! IMU vectors are expressed in a local level frame aligned to magnetic
//! north: x = east, y = north, z = up.

use nalgebra::{Rotation3, Vector2, Vector3};

// ===== Axis Indices =====
pub const AXIS_EAST: usize = 0;
pub const AXIS_NORTH: usize = 1;
pub const AXIS_UP: usize = 2;

/// Acceleration (m/s²) or angular rate (rad/s) on the three IMU axes.
pub type Vec3 = Vector3<f64>;

/// Horizontal (east, north) component of a vector.
pub type Horizontal = Vector2<f64>;

pub fn horizontal(v: &Vec3) -> Horizontal {
    Horizontal::new(v[AXIS_EAST], v[AXIS_NORTH])
}

/// Rotation taking a magnetic-north-aligned vector into the true-north frame.
///
/// Declination is positive east: a vector pointing at magnetic north ends up
/// at bearing `declination_deg` from true north.
pub fn declination_rotation(declination_deg: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vec3::z_axis(), -declination_deg.to_radians())
}

/// Compass bearing (degrees clockwise from north, [0, 360)) of a horizontal vector.
pub fn bearing_of(v: &Horizontal) -> f64 {
    let deg = v.x.atan2(v.y).to_degrees();
    (deg + 360.0) % 360.0
}

/// Unit horizontal vector for a compass bearing.
pub fn unit_from_bearing(bearing_deg: f64) -> Horizontal {
    let rad = bearing_deg.to_radians();
    Horizontal::new(rad.sin(), rad.cos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_declination_rotates_north_east() {
        let rot = declination_rotation(10.0);
        let rotated = rot * Vec3::new(0.0, 1.0, 0.0);
        assert_abs_diff_eq!(bearing_of(&horizontal(&rotated)), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_negative_declination() {
        let rot = declination_rotation(-15.0);
        let rotated = rot * Vec3::new(0.0, 2.0, 0.0);
        assert_abs_diff_eq!(bearing_of(&horizontal(&rotated)), 345.0, epsilon = 1e-9);
        assert_abs_diff_eq!(rotated.norm(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bearing_unit_roundtrip() {
        for b in [0.0, 45.0, 90.0, 180.0, 270.0, 359.0] {
            assert_abs_diff_eq!(bearing_of(&unit_from_bearing(b)), b, epsilon = 1e-9);
        }
    }
}
