//! WGS84 helpers shared by the position and troposphere contributors.

use map_3d::{ecef2geodetic, Ellipsoid};
use nalgebra::Vector3;

/// Geodetic latitude/longitude (radians) and line-of-sight unit vector
/// (ECEF) from a receiver's nominal position towards a satellite at the
/// given elevation/azimuth (degrees).
pub(crate) fn line_of_sight_ecef(
    nominal_position: Vector3<f64>,
    elevation_deg: f64,
    azimuth_deg: f64,
) -> Vector3<f64> {
    let (lat_rad, lon_rad, _alt) = ecef2geodetic(
        nominal_position.x,
        nominal_position.y,
        nominal_position.z,
        Ellipsoid::WGS84,
    );

    let el = elevation_deg.to_radians();
    let az = azimuth_deg.to_radians();

    // ENU unit vector from receiver towards the satellite.
    let east = el.cos() * az.sin();
    let north = el.cos() * az.cos();
    let up = el.sin();

    let (sin_lat, cos_lat) = lat_rad.sin_cos();
    let (sin_lon, cos_lon) = lon_rad.sin_cos();

    Vector3::new(
        -sin_lon * east - sin_lat * cos_lon * north + cos_lat * cos_lon * up,
        cos_lon * east - sin_lat * sin_lon * north + cos_lat * sin_lon * up,
        cos_lat * north + sin_lat * up,
    )
}

/// Geodetic latitude/longitude/altitude (radians, radians, meters) of a
/// receiver's nominal ECEF position.
pub(crate) fn geodetic(nominal_position: Vector3<f64>) -> (f64, f64, f64) {
    ecef2geodetic(
        nominal_position.x,
        nominal_position.y,
        nominal_position.z,
        Ellipsoid::WGS84,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zenith_sv_is_pure_up() {
        // A receiver on the equator at the prime meridian: up is +x.
        let nominal = Vector3::new(6378137.0, 0.0, 0.0);
        let los = line_of_sight_ecef(nominal, 90.0, 0.0);
        assert!((los.x - 1.0).abs() < 1e-9);
        assert!(los.y.abs() < 1e-9);
        assert!(los.z.abs() < 1e-9);
    }
}
