//! Bearings, cardinal directions and distances.
//!
//! Ranging hardware reports a device-frame vector where `-z` points forward;
//! everything else in the app works in compass degrees. This module is the
//! single place where raw vectors and GPS fixes become bearings, sectors and
//! display strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::EARTH_RADIUS_METERS;
use crate::types::PeerId;

/// A GPS fix. Immutable once created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UserLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters, never negative.
    pub horizontal_accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

impl UserLocation {
    pub fn new(latitude: f64, longitude: f64, horizontal_accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            horizontal_accuracy: horizontal_accuracy.max(0.0),
            timestamp: Utc::now(),
        }
    }
}

/// A raw 3D ranging vector in the device's local frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DirectionVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl DirectionVector {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Compass bearing in degrees, [0, 360).
    ///
    /// Convention: `-z` is forward/north in the device frame, so the bearing
    /// is `atan2(x, -z)`. Magnitude-invariant.
    pub fn bearing_degrees(&self) -> f64 {
        let degrees = self.x.atan2(-self.z).to_degrees();
        degrees.rem_euclid(360.0)
    }
}

/// 8-way compass sector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CardinalDirection {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl CardinalDirection {
    /// Classify a bearing into one of eight 45-degree sectors, each centred
    /// on its compass point. North covers [337.5, 360) and [0, 22.5).
    pub fn from_bearing(bearing: f64) -> Self {
        const SECTORS: [CardinalDirection; 8] = [
            CardinalDirection::North,
            CardinalDirection::NorthEast,
            CardinalDirection::East,
            CardinalDirection::SouthEast,
            CardinalDirection::South,
            CardinalDirection::SouthWest,
            CardinalDirection::West,
            CardinalDirection::NorthWest,
        ];
        let normalized = bearing.rem_euclid(360.0);
        let index = ((normalized + 22.5) / 45.0).floor() as usize % 8;
        SECTORS[index]
    }

    pub fn abbreviation(&self) -> &'static str {
        match self {
            Self::North => "N",
            Self::NorthEast => "NE",
            Self::East => "E",
            Self::SouthEast => "SE",
            Self::South => "S",
            Self::SouthWest => "SW",
            Self::West => "W",
            Self::NorthWest => "NW",
        }
    }
}

impl std::fmt::Display for CardinalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

/// "Target is `distance` meters at `direction` from `intermediary`, whose own
/// fix is `intermediary_location`."
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelativeLocation {
    pub intermediary: PeerId,
    pub intermediary_location: UserLocation,
    /// Ranging distance in meters, never negative.
    pub distance: f64,
    /// Absent in ranging-distance-only mode.
    pub direction: Option<DirectionVector>,
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

impl RelativeLocation {
    /// Bearing toward the target as seen from the intermediary, when the
    /// ranging session produced a direction.
    pub fn bearing_degrees(&self) -> Option<f64> {
        self.direction.map(|v| v.bearing_degrees())
    }

    /// Human-readable summary, e.g. `"41.5 m NE"` or `"41.5 m"` when the
    /// session measured distance only.
    pub fn describe(&self) -> String {
        match self.bearing_degrees() {
            Some(bearing) => format!(
                "{} {}",
                format_distance(self.distance),
                CardinalDirection::from_bearing(bearing)
            ),
            None => format_distance(self.distance),
        }
    }
}

/// Great-circle distance between two GPS fixes, in meters (haversine).
pub fn great_circle_distance(a: &UserLocation, b: &UserLocation) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Human-readable distance string, shared by UI and log lines.
///
/// Sub-meter in centimeters with one decimal, under 100 m with one decimal,
/// under 1 km as whole meters, beyond that kilometers with one decimal.
pub fn format_distance(meters: f64) -> String {
    if meters < 1.0 {
        format!("{:.1} cm", meters * 100.0)
    } else if meters < 100.0 {
        format!("{meters:.1} m")
    } else if meters < 1000.0 {
        format!("{meters:.0} m")
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearing_cardinal_points() {
        // -z forward: straight ahead is north
        let cases = [
            (DirectionVector::new(0.0, 0.0, -1.0), 0.0),
            (DirectionVector::new(1.0, 0.0, 0.0), 90.0),
            (DirectionVector::new(0.0, 0.0, 1.0), 180.0),
            (DirectionVector::new(-1.0, 0.0, 0.0), 270.0),
        ];
        for (vector, expected) in cases {
            assert!(
                (vector.bearing_degrees() - expected).abs() < 1e-9,
                "expected {expected}, got {}",
                vector.bearing_degrees()
            );
        }
    }

    #[test]
    fn test_bearing_magnitude_invariant() {
        let unit = DirectionVector::new(0.3, 0.0, -0.7);
        let scaled = DirectionVector::new(3.0, 0.0, -7.0);
        assert!((unit.bearing_degrees() - scaled.bearing_degrees()).abs() < 1e-9);
    }

    #[test]
    fn test_bearing_always_in_range() {
        let samples = [
            DirectionVector::new(-0.5, 0.2, -0.5),
            DirectionVector::new(-1.0, 0.0, 0.001),
            DirectionVector::new(0.0001, 0.0, 1.0),
        ];
        for v in samples {
            let b = v.bearing_degrees();
            assert!((0.0..360.0).contains(&b), "bearing {b} out of range");
        }
    }

    #[test]
    fn test_cardinal_sector_boundaries() {
        use CardinalDirection::*;
        // Boundaries land in the clockwise-next sector; both 337.5 and 0 are N.
        assert_eq!(CardinalDirection::from_bearing(0.0), North);
        assert_eq!(CardinalDirection::from_bearing(337.5), North);
        assert_eq!(CardinalDirection::from_bearing(22.4), North);
        assert_eq!(CardinalDirection::from_bearing(22.5), NorthEast);
        assert_eq!(CardinalDirection::from_bearing(45.0), NorthEast);
        assert_eq!(CardinalDirection::from_bearing(90.0), East);
        assert_eq!(CardinalDirection::from_bearing(135.0), SouthEast);
        assert_eq!(CardinalDirection::from_bearing(180.0), South);
        assert_eq!(CardinalDirection::from_bearing(225.0), SouthWest);
        assert_eq!(CardinalDirection::from_bearing(270.0), West);
        assert_eq!(CardinalDirection::from_bearing(315.0), NorthWest);
        assert_eq!(CardinalDirection::from_bearing(337.4), NorthWest);
    }

    #[test]
    fn test_cardinal_partition_covers_circle() {
        // Whole degrees sit strictly inside sectors (boundaries are at .5),
        // so every sector must claim exactly 45 of them.
        let mut counts = std::collections::HashMap::new();
        for degree in 0..360 {
            *counts
                .entry(CardinalDirection::from_bearing(degree as f64).abbreviation())
                .or_insert(0u32) += 1;
        }
        assert_eq!(counts.len(), 8);
        for (_, count) in counts {
            assert_eq!(count, 45);
        }
    }

    #[test]
    fn test_great_circle_distance_known_pair() {
        // Paris to London, roughly 344 km
        let paris = UserLocation::new(48.8566, 2.3522, 5.0);
        let london = UserLocation::new(51.5074, -0.1278, 5.0);
        let d = great_circle_distance(&paris, &london);
        assert!((d - 344_000.0).abs() < 2_000.0, "got {d}");
    }

    #[test]
    fn test_great_circle_distance_zero_for_same_fix() {
        let fix = UserLocation::new(12.34, 56.78, 3.0);
        assert_eq!(great_circle_distance(&fix, &fix), 0.0);
    }

    #[test]
    fn test_format_distance_thresholds() {
        assert_eq!(format_distance(0.437), "43.7 cm");
        assert_eq!(format_distance(1.0), "1.0 m");
        assert_eq!(format_distance(57.21), "57.2 m");
        assert_eq!(format_distance(99.91), "99.9 m");
        assert_eq!(format_distance(100.0), "100 m");
        assert_eq!(format_distance(999.4), "999 m");
        assert_eq!(format_distance(1000.0), "1.0 km");
        assert_eq!(format_distance(12_345.0), "12.3 km");
    }

    #[test]
    fn test_relative_location_describe() {
        let mut relative = RelativeLocation {
            intermediary: PeerId::from("peer-i"),
            intermediary_location: UserLocation::new(59.33, 18.07, 4.0),
            distance: 41.5,
            direction: Some(DirectionVector::new(1.0, 0.0, -1.0)), // 45 degrees
            accuracy: 0.5,
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(relative.describe(), "41.5 m NE");

        relative.direction = None;
        assert_eq!(relative.describe(), "41.5 m");
    }

    #[test]
    fn test_accuracy_clamped_non_negative() {
        let fix = UserLocation::new(0.0, 0.0, -4.0);
        assert_eq!(fix.horizontal_accuracy, 0.0);
    }
}
