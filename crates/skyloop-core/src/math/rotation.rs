//! Rotation and angle utilities
//!
//! Frame rotations between world (ENU), heading and body (FLU) frames,
//! and angle wrapping.

use std::f64::consts::PI;

use nalgebra::{UnitQuaternion, Vector2, Vector3};

/// Rotate a vector from body to world frame
///
/// v' = R(q) * v
pub fn rotate_vector(q: &UnitQuaternion<f64>, v: &Vector3<f64>) -> Vector3<f64> {
    q.transform_vector(v)
}

/// Rotate a vector from world to body frame
///
/// v' = R(q)^T * v
pub fn rotate_vector_inverse(q: &UnitQuaternion<f64>, v: &Vector3<f64>) -> Vector3<f64> {
    q.inverse_transform_vector(v)
}

/// Body z-axis in world frame (thrust direction)
pub fn body_z_axis(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    rotate_vector(q, &Vector3::new(0.0, 0.0, 1.0))
}

/// Wrap an angle to (-π, π]
pub fn wrap_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a <= -PI {
        a += 2.0 * PI;
    }
    a
}

/// Express a horizontal world-frame vector in the heading frame
///
/// Returns (forward, left) components for a vehicle whose yaw is `yaw`
/// (counter-clockwise from East).
pub fn world_to_heading(v: &Vector2<f64>, yaw: f64) -> Vector2<f64> {
    let (s, c) = yaw.sin_cos();
    Vector2::new(c * v.x + s * v.y, -s * v.x + c * v.y)
}

/// Heading of a horizontal direction, counter-clockwise from East [rad]
pub fn heading_of(v: &Vector2<f64>) -> f64 {
    v.y.atan2(v.x)
}
