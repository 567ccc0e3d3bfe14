//! # bobcat-orbit
//!
//! Position and propagator models for the bobcat simulator.
//!
//! This crate provides:
//! - WGS84 geodesy ([`geodetic_to_ecef`], [`ecef_to_geodetic`])
//! - Earth rotation ([`gmst_rad`], [`ecef_to_eci`], [`eci_to_ecef`])
//! - Position providers ([`PositionModel`]): fixed geopoints and TLE orbits
//! - CZML trajectory documents ([`czml`])
//!
//! All queries map a simtime offset through the scenario epoch to an
//! absolute UTC instant; a meta-node's position is a pure function of that
//! instant.

use bobcat_core::{utc_at, GeodeticFix, PositionProvider, SimError, SimTime};
use hifitime::Epoch;
use serde::{Deserialize, Serialize};

pub mod czml;

// ============================================================================
// WGS84 Geodesy
// ============================================================================

/// WGS84 equatorial radius in kilometers.
pub const WGS84_A_KM: f64 = 6378.137;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257223563;

/// A geodetic location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geodetic {
    /// Latitude in degrees.
    pub lat_deg: f64,
    /// Longitude in degrees.
    pub lon_deg: f64,
    /// Altitude above the ellipsoid in kilometers.
    pub alt_km: f64,
}

impl Geodetic {
    /// Create a new geodetic location.
    pub fn new(lat_deg: f64, lon_deg: f64, alt_km: f64) -> Self {
        Geodetic { lat_deg, lon_deg, alt_km }
    }
}

/// Geodetic location to Earth-fixed cartesian coordinates (km).
pub fn geodetic_to_ecef(point: &Geodetic) -> [f64; 3] {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let lat = point.lat_deg.to_radians();
    let lon = point.lon_deg.to_radians();
    let sin_lat = lat.sin();
    let n = WGS84_A_KM / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    [
        (n + point.alt_km) * lat.cos() * lon.cos(),
        (n + point.alt_km) * lat.cos() * lon.sin(),
        (n * (1.0 - e2) + point.alt_km) * sin_lat,
    ]
}

/// Earth-fixed cartesian coordinates (km) to geodetic, via Bowring's method.
pub fn ecef_to_geodetic(ecef: [f64; 3]) -> Geodetic {
    let [x, y, z] = ecef;
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let b = WGS84_A_KM * (1.0 - WGS84_F);
    let ep2 = (WGS84_A_KM * WGS84_A_KM - b * b) / (b * b);

    let p = (x * x + y * y).sqrt();
    let lon = y.atan2(x);

    if p < 1e-9 {
        // On the polar axis.
        let lat = if z >= 0.0 { 90.0 } else { -90.0 };
        return Geodetic::new(lat, lon.to_degrees(), z.abs() - b);
    }

    let theta = (z * WGS84_A_KM).atan2(p * b);
    let lat = (z + ep2 * b * theta.sin().powi(3))
        .atan2(p - e2 * WGS84_A_KM * theta.cos().powi(3));
    let sin_lat = lat.sin();
    let n = WGS84_A_KM / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let alt = p / lat.cos() - n;

    Geodetic::new(lat.to_degrees(), lon.to_degrees(), alt)
}

/// Greenwich mean sidereal time in radians at the given UTC instant
/// (IAU 1982, UT1 approximated by UTC).
pub fn gmst_rad(at: Epoch) -> f64 {
    let jd = at.to_jde_utc_days();
    let d = jd - 2451545.0;
    let t = d / 36525.0;
    let gmst_deg = 280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t
        - t * t * t / 38_710_000.0;
    gmst_deg.rem_euclid(360.0).to_radians()
}

/// Rotate Earth-fixed coordinates into the inertial frame at the given GMST.
pub fn ecef_to_eci(ecef: [f64; 3], gmst: f64) -> [f64; 3] {
    let (sin_g, cos_g) = gmst.sin_cos();
    [
        cos_g * ecef[0] - sin_g * ecef[1],
        sin_g * ecef[0] + cos_g * ecef[1],
        ecef[2],
    ]
}

/// Rotate inertial coordinates into the Earth-fixed frame at the given GMST.
pub fn eci_to_ecef(eci: [f64; 3], gmst: f64) -> [f64; 3] {
    let (sin_g, cos_g) = gmst.sin_cos();
    [
        cos_g * eci[0] + sin_g * eci[1],
        -sin_g * eci[0] + cos_g * eci[1],
        eci[2],
    ]
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

// ============================================================================
// Position Models
// ============================================================================

/// UTC instant of the J2000 reference (2000-01-01 12:00 UTC), which the TLE
/// epoch accessor counts years from.
fn j2000() -> Epoch {
    Epoch::from_gregorian_utc(2000, 1, 1, 12, 0, 0, 0)
}

/// A concrete position provider attached to a meta-node.
pub enum PositionModel {
    /// Constant geodetic location.
    Geopoint {
        /// The fixed point.
        point: Geodetic,
    },
    /// Two-line element set propagated with SGP4.
    Orbital {
        /// Display name (satellite name or meta-node name).
        name: String,
        /// First TLE line as loaded.
        line1: String,
        /// Second TLE line as loaded.
        line2: String,
        /// Parsed elements.
        elements: sgp4::Elements,
        /// UTC instant of the element set epoch.
        tle_epoch: Epoch,
    },
}

impl PositionModel {
    /// Fixed geopoint provider.
    pub fn geopoint(lat_deg: f64, lon_deg: f64, alt_km: f64) -> Self {
        PositionModel::Geopoint {
            point: Geodetic::new(lat_deg, lon_deg, alt_km),
        }
    }

    /// Orbital provider from a two-line element set.
    pub fn orbital(name: &str, line1: &str, line2: &str) -> Result<Self, SimError> {
        let elements = sgp4::Elements::from_tle(
            Some(name.to_string()),
            line1.as_bytes(),
            line2.as_bytes(),
        )
        .map_err(|e| SimError::Position {
            name: name.to_string(),
            message: format!("TLE parse failed: {e:?}"),
        })?;

        // elements.epoch() is years since J2000 on the 365.25-day convention.
        let tle_epoch = {
            use hifitime::TimeUnits;
            j2000() + (elements.epoch() * 365.25 * 86_400.0).seconds()
        };

        Ok(PositionModel::Orbital {
            name: name.to_string(),
            line1: line1.to_string(),
            line2: line2.to_string(),
            elements,
            tle_epoch,
        })
    }

    fn propagate(&self, at: Epoch) -> Result<([f64; 3], [f64; 3]), SimError> {
        match self {
            PositionModel::Geopoint { .. } => unreachable!("geopoints are not propagated"),
            PositionModel::Orbital { name, elements, tle_epoch, .. } => {
                let constants = sgp4::Constants::from_elements(elements).map_err(|e| {
                    SimError::Position {
                        name: name.clone(),
                        message: format!("SGP4 initialization failed: {e:?}"),
                    }
                })?;
                let minutes = (at - *tle_epoch).to_seconds() / 60.0;
                let prediction = constants.propagate(minutes).map_err(|e| SimError::Position {
                    name: name.clone(),
                    message: format!("propagation failed at {minutes:.3} min: {e:?}"),
                })?;
                Ok((prediction.position, prediction.velocity))
            }
        }
    }
}

impl PositionProvider for PositionModel {
    fn location(&self, simtime: SimTime, epoch: Epoch) -> Result<GeodeticFix, SimError> {
        match self {
            PositionModel::Geopoint { point } => Ok(GeodeticFix {
                lat_deg: point.lat_deg,
                lon_deg: point.lon_deg,
                alt_km: point.alt_km,
                velocity_km_s: 0.0,
            }),
            PositionModel::Orbital { .. } => {
                let at = utc_at(epoch, simtime);
                let (position, velocity) = self.propagate(at)?;
                let geodetic = ecef_to_geodetic(eci_to_ecef(position, gmst_rad(at)));
                Ok(GeodeticFix {
                    lat_deg: geodetic.lat_deg,
                    lon_deg: geodetic.lon_deg,
                    alt_km: geodetic.alt_km,
                    velocity_km_s: norm(velocity),
                })
            }
        }
    }

    fn coords(&self, simtime: SimTime, epoch: Epoch) -> Result<([f64; 3], [f64; 3]), SimError> {
        let at = utc_at(epoch, simtime);
        match self {
            PositionModel::Geopoint { point } => {
                let eci = ecef_to_eci(geodetic_to_ecef(point), gmst_rad(at));
                Ok((eci, [0.0, 0.0, 0.0]))
            }
            PositionModel::Orbital { .. } => self.propagate(at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bobcat_core::parse_epoch;

    const ISS_TLE1: &str =
        "1 25544U 98067A   20194.88612269 -.00002218  00000-0 -31515-4 0  9992";
    const ISS_TLE2: &str =
        "2 25544  51.6461 221.2784 0001413  89.1723 280.4612 15.49507896236008";

    #[test]
    fn test_geodetic_ecef_round_trip() {
        let point = Geodetic::new(37.7749, -122.4194, 0.25);
        let back = ecef_to_geodetic(geodetic_to_ecef(&point));
        assert!((back.lat_deg - point.lat_deg).abs() < 1e-6);
        assert!((back.lon_deg - point.lon_deg).abs() < 1e-6);
        assert!((back.alt_km - point.alt_km).abs() < 1e-6);
    }

    #[test]
    fn test_equator_is_one_earth_radius_out() {
        let ecef = geodetic_to_ecef(&Geodetic::new(0.0, 0.0, 0.0));
        assert!((norm(ecef) - WGS84_A_KM).abs() < 1e-9);
    }

    #[test]
    fn test_gmst_j2000() {
        // Meeus: GMST at 2000-01-01T12:00 UTC is about 280.46 degrees.
        let gmst = gmst_rad(Epoch::from_gregorian_utc(2000, 1, 1, 12, 0, 0, 0));
        assert!((gmst.to_degrees() - 280.46).abs() < 0.01);
    }

    #[test]
    fn test_eci_ecef_inverse() {
        let gmst = 1.234;
        let ecef = [3000.0, -5000.0, 2000.0];
        let back = eci_to_ecef(ecef_to_eci(ecef, gmst), gmst);
        for (a, b) in back.iter().zip(ecef.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_geopoint_coords_rotate_with_earth() {
        let epoch = parse_epoch("2024-01-01T00:00:00Z").unwrap();
        let model = PositionModel::geopoint(0.0, 0.0, 0.0);

        let (at_zero, vel) = model.coords(SimTime::ZERO, epoch).unwrap();
        let (at_hour, _) = model.coords(SimTime::from_secs(3600.0), epoch).unwrap();
        assert_eq!(vel, [0.0, 0.0, 0.0]);
        // The norm is pinned to the ellipsoid radius...
        assert!((norm(at_zero) - WGS84_A_KM).abs() < 1e-6);
        assert!((norm(at_hour) - WGS84_A_KM).abs() < 1e-6);
        // ...but the direction moves by roughly 15 degrees per hour.
        let dot = (at_zero[0] * at_hour[0] + at_zero[1] * at_hour[1] + at_zero[2] * at_hour[2])
            / (norm(at_zero) * norm(at_hour));
        let angle_deg = dot.clamp(-1.0, 1.0).acos().to_degrees();
        assert!((angle_deg - 15.04).abs() < 0.1, "rotated {angle_deg} degrees");
    }

    #[test]
    fn test_geopoint_location_is_constant() {
        let epoch = parse_epoch("2024-01-01T00:00:00Z").unwrap();
        let model = PositionModel::geopoint(12.5, -45.0, 0.8);
        let fix = model.location(SimTime::from_secs(500.0), epoch).unwrap();
        assert_eq!(fix.lat_deg, 12.5);
        assert_eq!(fix.lon_deg, -45.0);
        assert_eq!(fix.alt_km, 0.8);
        assert_eq!(fix.velocity_km_s, 0.0);
    }

    #[test]
    fn test_orbital_propagates_to_leo_altitude() {
        let epoch = parse_epoch("2020-07-12T21:00:00Z").unwrap();
        let model = PositionModel::orbital("ISS", ISS_TLE1, ISS_TLE2).unwrap();

        let (position, velocity) = model.coords(SimTime::ZERO, epoch).unwrap();
        let radius = norm(position);
        assert!(radius > 6500.0 && radius < 7100.0, "radius {radius} km");
        let speed = norm(velocity);
        assert!(speed > 7.0 && speed < 8.0, "speed {speed} km/s");

        let fix = model.location(SimTime::ZERO, epoch).unwrap();
        assert!(fix.alt_km > 300.0 && fix.alt_km < 500.0, "altitude {}", fix.alt_km);
        assert!(fix.lat_deg.abs() <= 51.7);
    }

    #[test]
    fn test_bad_tle_is_a_load_error() {
        assert!(PositionModel::orbital("junk", "garbage", "lines").is_err());
    }
}
