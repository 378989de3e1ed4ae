//! Shared value types for the location pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean earth radius in meters (IUGG)
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Zone id of the configurable home zone
pub const HOME_ZONE_ID: &str = "HOME";
/// Zone id of the configurable college zone
pub const COLLEGE_ZONE_ID: &str = "COLLEGE";

#[derive(Debug, Error, PartialEq)]
pub enum CoordinateError {
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("invalid coordinates format")]
    Unparseable,
}

/// WGS84 position in decimal degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// Unchecked wire shape; deserialization goes through `Coordinate::new`
#[derive(Deserialize)]
struct RawCoordinate {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.latitude, raw.longitude)
    }
}

impl Coordinate {
    /// Create a coordinate, rejecting values outside the valid ranges
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::LongitudeOutOfRange(longitude));
        }
        Ok(Self { latitude, longitude })
    }

    /// Parse user-entered latitude/longitude strings
    pub fn parse(latitude: &str, longitude: &str) -> Result<Self, CoordinateError> {
        let lat = latitude.trim().parse::<f64>().map_err(|_| CoordinateError::Unparseable)?;
        let lon = longitude.trim().parse::<f64>().map_err(|_| CoordinateError::Unparseable)?;
        Self::new(lat, lon)
    }

    /// Great-circle distance in meters (haversine)
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.latitude, self.longitude)
    }
}

/// Circular zone watched by the geofence detector. Zones never expire.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneDefinition {
    pub id: String,
    pub center: Coordinate,
    pub radius_m: f64,
}

impl ZoneDefinition {
    pub fn new(id: &str, center: Coordinate, radius_m: f64) -> Self {
        Self { id: id.to_string(), center, radius_m }
    }

    pub fn contains(&self, point: &Coordinate) -> bool {
        self.center.distance_m(point) <= self.radius_m
    }
}

/// Zone boundary crossing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Enter,
    Exit,
    /// Loitering inside a zone; produced by detectors but never reported
    Dwell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Enter => "enter",
            Direction::Exit => "exit",
            Direction::Dwell => "dwell",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneTransitionEvent {
    pub zone_id: String,
    pub direction: Direction,
}

impl ZoneTransitionEvent {
    pub fn new(zone_id: &str, direction: Direction) -> Self {
        Self { zone_id: zone_id.to_string(), direction }
    }
}

/// A single position fix, stamped when it was received
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub coordinate: Coordinate,
    pub received_at: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(coordinate: Coordinate) -> Self {
        Self { coordinate, received_at: Utc::now() }
    }
}

/// Phone number messages are sent to. Empty means "do not send".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchTarget {
    phone_number: String,
}

impl DispatchTarget {
    pub fn new(phone_number: &str) -> Self {
        Self { phone_number: phone_number.trim().to_string() }
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub fn is_empty(&self) -> bool {
        self.phone_number.is_empty()
    }
}

impl std::fmt::Display for DispatchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.phone_number)
    }
}

/// Dot-dash payload ready for the messaging channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage(String);

impl EncodedMessage {
    pub(crate) fn new(payload: String) -> Self {
        Self(payload)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for EncodedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_range_validation() {
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(Coordinate::new(-90.0, -180.0).is_ok());
        assert_eq!(Coordinate::new(90.5, 0.0), Err(CoordinateError::LatitudeOutOfRange(90.5)));
        assert_eq!(
            Coordinate::new(0.0, -181.0),
            Err(CoordinateError::LongitudeOutOfRange(-181.0))
        );
    }

    #[test]
    fn test_coordinate_deserialize_checks_range() {
        let ok: Coordinate =
            serde_json::from_str(r#"{"latitude":37.5,"longitude":-122.0}"#).unwrap();
        assert_eq!(ok, Coordinate::new(37.5, -122.0).unwrap());

        let err = serde_json::from_str::<Coordinate>(r#"{"latitude":500.0,"longitude":-999.0}"#)
            .unwrap_err();
        assert!(err.to_string().contains("latitude 500 outside"));
    }

    #[test]
    fn test_coordinate_parse() {
        let c = Coordinate::parse(" 37.422 ", "-122.084").unwrap();
        assert_eq!(c, Coordinate { latitude: 37.422, longitude: -122.084 });
        assert_eq!(Coordinate::parse("abc", "1.0"), Err(CoordinateError::Unparseable));
        assert_eq!(Coordinate::parse("", "1.0"), Err(CoordinateError::Unparseable));
    }

    #[test]
    fn test_distance_known_values() {
        let a = Coordinate::new(0.0, 0.0).unwrap();
        let b = Coordinate::new(0.0, 1.0).unwrap();
        // One degree of longitude on the equator is ~111.2 km
        let d = a.distance_m(&b);
        assert!((d - 111_195.0).abs() < 100.0, "distance was {d}");
        assert_eq!(a.distance_m(&a), 0.0);
    }

    #[test]
    fn test_zone_contains() {
        let zone = ZoneDefinition::new(HOME_ZONE_ID, Coordinate::new(0.0, 0.0).unwrap(), 1000.0);
        assert!(zone.contains(&Coordinate::new(0.005, 0.0).unwrap())); // ~556 m
        assert!(!zone.contains(&Coordinate::new(0.01, 0.0).unwrap())); // ~1112 m
    }

    #[test]
    fn test_dispatch_target_trims() {
        assert!(DispatchTarget::new("   ").is_empty());
        assert_eq!(DispatchTarget::new(" +15551234 ").phone_number(), "+15551234");
    }
}
