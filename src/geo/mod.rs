//! Great-circle distance on a spherical Earth
//!
//! Two formulas are provided: haversine (the default, numerically stable
//! for short distances) and the spherical law of cosines, which serves as
//! the reference the haversine result is checked against.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS-84 position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Which formula the controller uses to measure distance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceFormula {
    #[default]
    Haversine,
    Cosines,
}

impl DistanceFormula {
    /// Distance in meters between `a` and `b`
    pub fn distance(self, a: Coordinate, b: Coordinate) -> f64 {
        match self {
            DistanceFormula::Haversine => haversine_m(a, b),
            DistanceFormula::Cosines => law_of_cosines_m(a, b),
        }
    }
}

impl std::str::FromStr for DistanceFormula {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "haversine" => Ok(Self::Haversine),
            "cosines" | "law_of_cosines" => Ok(Self::Cosines),
            other => Err(format!("unknown distance formula '{other}'")),
        }
    }
}

/// Haversine great-circle distance in meters
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points
    2.0 * EARTH_RADIUS_M * h.min(1.0).sqrt().asin()
}

/// Spherical law of cosines distance in meters
pub fn law_of_cosines_m(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let cos_c = lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * d_lon.cos();
    EARTH_RADIUS_M * cos_c.clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relative_error(a: f64, b: f64) -> f64 {
        (a - b).abs() / b.abs().max(f64::EPSILON)
    }

    #[test]
    fn test_one_degree_of_longitude_at_equator() {
        let d = haversine_m(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0));
        assert!((d - 111_195.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let p = Coordinate::new(48.8584, 2.2945);
        assert_eq!(haversine_m(p, p), 0.0);
        assert_eq!(DistanceFormula::Haversine.distance(p, p), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let pairs = [
            (Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)),
            (Coordinate::new(51.5007, -0.1246), Coordinate::new(48.8584, 2.2945)),
            (Coordinate::new(-33.8568, 151.2153), Coordinate::new(-37.8136, 144.9631)),
            (Coordinate::new(89.9, 10.0), Coordinate::new(89.9, -170.0)),
        ];
        for (a, b) in pairs {
            assert!((haversine_m(a, b) - haversine_m(b, a)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_haversine_matches_reference_below_1000_km() {
        let origin = Coordinate::new(20.5937, 78.9629);
        let targets = [
            Coordinate::new(20.6037, 78.9629),
            Coordinate::new(21.0, 79.5),
            Coordinate::new(25.0, 80.0),
            Coordinate::new(28.6139, 77.2090),
        ];
        for target in targets {
            let h = haversine_m(origin, target);
            let c = law_of_cosines_m(origin, target);
            assert!(h < 1_000_000.0);
            assert!(relative_error(h, c) < 0.001, "haversine {h} vs cosines {c}");
        }
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = DistanceFormula::Cosines
            .distance(Coordinate::new(35.0, 139.0), Coordinate::new(36.0, 139.0));
        assert!((d - 111_195.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn test_formula_from_str() {
        assert_eq!("haversine".parse::<DistanceFormula>(), Ok(DistanceFormula::Haversine));
        assert_eq!(" Cosines ".parse::<DistanceFormula>(), Ok(DistanceFormula::Cosines));
        assert!("vincenty".parse::<DistanceFormula>().is_err());
    }
}
