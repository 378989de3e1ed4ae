//! Canonical report texts built from domain events before encoding

use crate::domain::types::{Coordinate, Direction, ZoneTransitionEvent};

/// `LAT <lat> LON <lon>`, both fixed to six decimal places
pub fn build_coordinate_report(coordinate: &Coordinate) -> String {
    format!("LAT {:.6} LON {:.6}", coordinate.latitude, coordinate.longitude)
}

/// `ENTERED <zone>` or `EXITED <zone>`; other directions are not reportable
pub fn build_zone_event_report(zone_id: &str, direction: Direction) -> Option<String> {
    let word = match direction {
        Direction::Enter => "ENTERED",
        Direction::Exit => "EXITED",
        Direction::Dwell => return None,
    };
    Some(format!("{} {}", word, zone_id))
}

/// A domain event headed for the dispatch pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Coordinate(Coordinate),
    Zone(ZoneTransitionEvent),
}

impl Report {
    pub fn kind(&self) -> &'static str {
        match self {
            Report::Coordinate(_) => "coordinate",
            Report::Zone(_) => "zone",
        }
    }

    /// Text handed whole to the encoder, or None if the event must not be sent
    pub fn canonical_text(&self) -> Option<String> {
        match self {
            Report::Coordinate(c) => Some(build_coordinate_report(c)),
            Report::Zone(e) => build_zone_event_report(&e.zone_id, e.direction),
        }
    }

    /// Human-readable notice shown after a successful dispatch
    pub fn notice_text(&self) -> String {
        match self {
            Report::Coordinate(c) => format!("Location shared: {}", c),
            Report::Zone(e) => build_zone_event_report(&e.zone_id, e.direction)
                .unwrap_or_else(|| format!("{} {}", e.direction, e.zone_id)),
        }
    }
}
