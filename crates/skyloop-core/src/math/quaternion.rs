//! Quaternion operations for attitude representation
//!
//! - Quaternion derivative: q̇ = 1/2 Λ(q)[0;ω]
//! - Integration over an arbitrary, measured time step
//! - Euler (roll, pitch, yaw) conversions, ZYX order

use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector3, Vector4};

/// Compute the quaternion derivative given angular velocity
///
/// q̇ = 1/2 Λ(q)[0;ω]
///
/// # Arguments
/// * `q` - Current orientation as unit quaternion (body to world)
/// * `omega` - Angular velocity in body frame [rad/s]
///
/// # Returns
/// Quaternion derivative as Vector4 (w, x, y, z)
pub fn quaternion_derivative(q: &UnitQuaternion<f64>, omega: &Vector3<f64>) -> Vector4<f64> {
    let w = q.w;
    let x = q.i;
    let y = q.j;
    let z = q.k;

    let omega_quat = Vector4::new(0.0, omega.x, omega.y, omega.z);

    // Left multiplication matrix Λ(q)
    let lambda = Matrix4::new(
        w, -x, -y, -z,
        x,  w, -z,  y,
        y,  z,  w, -x,
        z, -y,  x,  w,
    );

    0.5 * lambda * omega_quat
}

/// Integrate a body rate over `dt` seconds
///
/// q_new = normalize(q + q̇ * dt). The step is whatever time actually
/// elapsed, so jittery sample intervals integrate to the same attitude
/// as a perfectly regular stream.
pub fn integrate_body_rate(
    q: &UnitQuaternion<f64>,
    omega: &Vector3<f64>,
    dt: f64,
) -> UnitQuaternion<f64> {
    if dt <= 0.0 {
        return *q;
    }
    let q_dot = quaternion_derivative(q, omega);
    let q_vec = Vector4::new(q.w, q.i, q.j, q.k) + q_dot * dt;

    UnitQuaternion::from_quaternion(Quaternion::new(q_vec[0], q_vec[1], q_vec[2], q_vec[3]))
}

/// Roll, pitch, yaw [rad] of a body-to-world quaternion
pub fn euler_from_quaternion(q: &UnitQuaternion<f64>) -> (f64, f64, f64) {
    q.euler_angles()
}

/// Body-to-world quaternion from roll, pitch, yaw [rad]
pub fn quaternion_from_euler(roll: f64, pitch: f64, yaw: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_euler_angles(roll, pitch, yaw)
}
