//! Domain models - value types, report templates and the dot-dash encoder
//!
//! This module contains the pure, side-effect free parts of the pipeline:
//! - `types` - Coordinate, zones, transitions, fixes, targets, encoded payloads
//! - `report` - Canonical report texts built before encoding
//! - `morse` - Character table and encoder

pub mod morse;
pub mod report;
pub mod types;

// Re-export commonly used types at module level
pub use morse::{encode, Encoder};
pub use report::{build_coordinate_report, build_zone_event_report, Report};
pub use types::{
    Coordinate, CoordinateError, DispatchTarget, Direction, EncodedMessage, LocationFix,
    ZoneDefinition, ZoneTransitionEvent, COLLEGE_ZONE_ID, HOME_ZONE_ID,
};
