//! Geodetic ↔ local ENU conversion
//!
//! Equirectangular small-area approximation about a fixed origin:
//!
//! east  = Δλ · R · cos φ₀
//! north = Δφ · R
//! up    = h − h₀
//!
//! Accurate to well under a metre within a few kilometres of the origin,
//! which covers any mission inside a geofence.

use serde::{Deserialize, Serialize};

use crate::sensors::GpsFix;
use crate::Vec3;

/// Mean Earth radius [m]
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Origin of the local ENU frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoOrigin {
    /// Latitude [rad]
    lat0: f64,
    /// Longitude [rad]
    lon0: f64,
    /// Altitude above mean sea level [m]
    alt0: f64,
    cos_lat0: f64,
}

impl GeoOrigin {
    pub fn new(fix: &GpsFix) -> Self {
        let lat0 = fix.latitude.to_radians();
        Self {
            lat0,
            lon0: fix.longitude.to_radians(),
            alt0: fix.altitude,
            cos_lat0: lat0.cos(),
        }
    }

    /// The origin as a geodetic fix
    pub fn fix(&self) -> GpsFix {
        GpsFix::new(self.lat0.to_degrees(), self.lon0.to_degrees(), self.alt0)
    }

    /// Geodetic position → local ENU [m]
    pub fn to_enu(&self, latitude: f64, longitude: f64, altitude: f64) -> Vec3 {
        let d_lat = latitude.to_radians() - self.lat0;
        let d_lon = longitude.to_radians() - self.lon0;
        Vec3::new(
            d_lon * EARTH_RADIUS * self.cos_lat0,
            d_lat * EARTH_RADIUS,
            altitude - self.alt0,
        )
    }

    pub fn fix_to_enu(&self, fix: &GpsFix) -> Vec3 {
        self.to_enu(fix.latitude, fix.longitude, fix.altitude)
    }

    /// Local ENU [m] → geodetic position
    pub fn from_enu(&self, enu: &Vec3) -> GpsFix {
        let lat = self.lat0 + enu.y / EARTH_RADIUS;
        let lon = self.lon0 + enu.x / (EARTH_RADIUS * self.cos_lat0);
        GpsFix::new(lat.to_degrees(), lon.to_degrees(), self.alt0 + enu.z)
    }
}

/// Great-circle distance between two positions [m]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = phi2 - phi1;
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS * a.sqrt().atan2((1.0 - a).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_origin_maps_to_zero() {
        let origin = GeoOrigin::new(&GpsFix::new(47.3977, 8.5456, 488.0));
        let enu = origin.to_enu(47.3977, 8.5456, 488.0);
        assert_relative_eq!(enu.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_north_and_east_offsets() {
        let origin = GeoOrigin::new(&GpsFix::new(0.0, 0.0, 0.0));
        // One arc-minute of latitude at the equator ≈ 1853 m
        let north = origin.to_enu(1.0 / 60.0, 0.0, 10.0);
        assert_relative_eq!(north.y, 1853.2, epsilon = 0.1);
        assert_relative_eq!(north.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(north.z, 10.0);

        let east = origin.to_enu(0.0, 1.0 / 60.0, 0.0);
        assert_relative_eq!(east.x, 1853.2, epsilon = 0.1);
    }

    #[test]
    fn test_enu_round_trip() {
        let origin = GeoOrigin::new(&GpsFix::new(47.3977, 8.5456, 488.0));
        let enu = Vec3::new(120.0, -75.0, 30.0);
        let fix = origin.from_enu(&enu);
        assert_relative_eq!(origin.fix_to_enu(&fix), enu, epsilon = 1e-6);
    }

    #[test]
    fn test_haversine_agrees_with_local_frame() {
        let origin = GeoOrigin::new(&GpsFix::new(47.3977, 8.5456, 0.0));
        let target = origin.from_enu(&Vec3::new(300.0, 400.0, 0.0));
        let distance = haversine_distance(47.3977, 8.5456, target.latitude, target.longitude);
        assert_relative_eq!(distance, 500.0, epsilon = 0.5);
    }
}
